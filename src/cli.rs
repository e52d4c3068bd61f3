//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::sync::Arc;

use crate::ServerConfig;
use crate::db::{Database, UserRole};
use crate::license::{HttpLicenseVendor, LicenseVendor};
use crate::mail::{HttpMailer, LogMailer, Mailer, signed_link};
use crate::otp::CooldownPolicy;
use crate::rate_limit::RateLimitConfig;
use crate::signature::{INVITE_TTL_SECS, RESET_PASSWORD_TTL_SECS, SignatureCodec, SignedPayload};
use clap::Parser;
use tracing::{error, info};
use url::Url;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Header a reverse proxy puts the client address in.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// X-Forwarded-For, first entry
    XForwardFor,
    /// X-Real-IP
    XRealIp,
    /// CF-Connecting-IP
    CfConnectingIp,
}

/// How to read the client IP from a request header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    pub header_name: &'static str,
    parse: fn(&str) -> Result<String, &'static str>,
}

impl IpExtractor {
    pub fn extract(&self, header_value: &str) -> Result<String, &'static str> {
        (self.parse)(header_value)
    }
}

fn parse_single_ip(value: &str) -> Result<String, &'static str> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| "IP header is not an IP address")
}

fn parse_forwarded_for(value: &str) -> Result<String, &'static str> {
    let first = value.split(',').next().ok_or("IP header is empty")?;
    parse_single_ip(first)
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        match header {
            ClientIpHeader::XForwardFor => IpExtractor {
                header_name: "x-forwarded-for",
                parse: parse_forwarded_for,
            },
            ClientIpHeader::XRealIp => IpExtractor {
                header_name: "x-real-ip",
                parse: parse_single_ip,
            },
            ClientIpHeader::CfConnectingIp => IpExtractor {
                header_name: "cf-connecting-ip",
                parse: parse_single_ip,
            },
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "assetgate",
    about = "Asset marketplace with license-gated access"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7390")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "assetgate.db")]
    pub database: String,

    /// Public URL of the site, used in emailed links (e.g., "https://assets.example.com")
    #[arg(long, default_value = "http://localhost:7390")]
    pub public_url: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Path to file containing the link signing secret. Prefer using SIGNATURE_SECRET env var instead
    #[arg(long)]
    pub signature_secret_file: Option<String>,

    /// Base URL of the license vendor API
    #[arg(long, default_value = "https://api.lemonsqueezy.com")]
    pub vendor_api_url: String,

    /// License vendor API key, used to look up order totals
    #[arg(long, env = "VENDOR_API_KEY", hide_env_values = true)]
    pub vendor_api_key: Option<String>,

    /// Mail API endpoint
    #[arg(long, default_value = "https://api.resend.com/emails")]
    pub mail_api_url: String,

    /// Mail API key. Without it emails are logged instead of sent
    #[arg(long, env = "MAIL_API_KEY", hide_env_values = true)]
    pub mail_api_key: Option<String>,

    /// Sender address for outgoing email
    #[arg(long, default_value = "Assetgate <noreply@localhost>")]
    pub mail_from: String,

    /// Read the client IP from this header (requires running behind a proxy)
    #[arg(long, value_enum)]
    pub ip_header: Option<ClientIpHeader>,

    /// Grant superadmin to this email on startup and print a sign-in link
    #[arg(long, value_name = "EMAIL")]
    pub create_superadmin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a secret from an environment variable or a file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>, flag: &str) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the {} environment variable (recommended) or use {}",
            env_var, env_var, flag
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse and validate the public URL.
/// Returns None and logs an error if validation fails.
pub fn validate_public_url(public_url: &str) -> Option<Url> {
    let url = match Url::parse(public_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %public_url, error = %e, "Invalid public URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("public-url must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Outcome of `--create-superadmin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuperadminGrant {
    /// The account exists and was promoted; the link resets its password.
    Promoted { reset_link: String },
    /// No account yet; the link accepts an invite as superadmin.
    Invited { invite_link: String },
}

/// Grant superadmin to `email`, promoting an existing account or issuing an invite.
pub async fn create_superadmin(
    db: &Database,
    codec: &SignatureCodec,
    public_url: &Url,
    email: &str,
) -> Result<SuperadminGrant, Box<dyn std::error::Error>> {
    let email = email.trim();

    match db.users().get_by_email(email).await? {
        Some(user) => {
            db.users().set_role(user.id, UserRole::Superadmin).await?;
            let signature = codec.issue(
                &SignedPayload::ResetPassword {
                    email: user.email.clone(),
                },
                RESET_PASSWORD_TTL_SECS,
            )?;
            Ok(SuperadminGrant::Promoted {
                reset_link: signed_link(public_url, "/reset-password", &signature),
            })
        }
        None => {
            let signature = codec.issue(
                &SignedPayload::Invite {
                    email: email.to_string(),
                    role: UserRole::Superadmin,
                },
                INVITE_TTL_SECS,
            )?;
            Ok(SuperadminGrant::Invited {
                invite_link: signed_link(public_url, "/invite", &signature),
            })
        }
    }
}

/// Handle the --create-superadmin flag, exiting the process on failure.
pub async fn handle_create_superadmin(
    db: &Database,
    signature_secret: &str,
    public_url: &Url,
    email: &str,
) {
    let codec = SignatureCodec::new(signature_secret.as_bytes());
    match create_superadmin(db, &codec, public_url, email).await {
        Ok(SuperadminGrant::Promoted { reset_link }) => {
            println!();
            println!("{} is now a superadmin", email);
            println!("Set a password: {}", reset_link);
            println!();
        }
        Ok(SuperadminGrant::Invited { invite_link }) => {
            println!();
            println!("Superadmin invite created for {}", email);
            println!("Invite URL: {}", invite_link);
            println!();
        }
        Err(e) => {
            error!(email = %email, error = %e, "Failed to create superadmin");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
/// Returns None and logs an error if an HTTP client cannot be built.
pub fn build_config(
    args: &Args,
    db: Database,
    public_url: Url,
    jwt_secret: String,
    signature_secret: String,
) -> Option<ServerConfig> {
    let secure_cookies = public_url.scheme() == "https";

    let vendor: Arc<dyn LicenseVendor> =
        match HttpLicenseVendor::new(&args.vendor_api_url, args.vendor_api_key.clone()) {
            Ok(vendor) => Arc::new(vendor),
            Err(e) => {
                error!(error = %e, "Failed to build license vendor client");
                return None;
            }
        };

    let mailer: Arc<dyn Mailer> = match &args.mail_api_key {
        Some(key) => match HttpMailer::new(&args.mail_api_url, key.clone()) {
            Ok(mailer) => Arc::new(mailer),
            Err(e) => {
                error!(error = %e, "Failed to build mail client");
                return None;
            }
        },
        None => {
            info!("MAIL_API_KEY not set, emails will be logged instead of sent");
            Arc::new(LogMailer)
        }
    };

    Some(ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        signature_secret: signature_secret.into_bytes(),
        public_url,
        secure_cookies,
        ip_extractor: args.ip_header.map(IpExtractor::from),
        vendor,
        mailer,
        mail_from: args.mail_from.clone(),
        rate_limits: RateLimitConfig::default(),
        cooldown: CooldownPolicy::default(),
    })
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureKind;

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let extractor = IpExtractor::from(ClientIpHeader::XForwardFor);
        assert_eq!(extractor.header_name, "x-forwarded-for");
        assert_eq!(
            extractor.extract("203.0.113.7, 10.0.0.1").unwrap(),
            "203.0.113.7"
        );
        assert!(extractor.extract("not-an-ip").is_err());
    }

    #[test]
    fn test_real_ip_accepts_ipv6() {
        let extractor = IpExtractor::from(ClientIpHeader::XRealIp);
        assert_eq!(extractor.extract(" ::1 ").unwrap(), "::1");
    }

    #[test]
    fn test_public_url_requires_https_off_localhost() {
        assert!(validate_public_url("http://localhost:7390").is_some());
        assert!(validate_public_url("https://assets.example.com").is_some());
        assert!(validate_public_url("http://assets.example.com").is_none());
        assert!(validate_public_url("not a url").is_none());
    }

    #[tokio::test]
    async fn test_create_superadmin_invites_unknown_email() {
        let db = Database::open(":memory:").await.unwrap();
        let codec = SignatureCodec::new(b"sig-secret");
        let url = Url::parse("https://assets.example.com").unwrap();

        let grant = create_superadmin(&db, &codec, &url, "root@example.com")
            .await
            .unwrap();
        let SuperadminGrant::Invited { invite_link } = grant else {
            panic!("expected an invite");
        };

        let signature = Url::parse(&invite_link)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "signature")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let payload = codec
            .verify_kind(&signature, SignatureKind::Invite)
            .unwrap();
        assert_eq!(
            payload,
            SignedPayload::Invite {
                email: "root@example.com".into(),
                role: UserRole::Superadmin,
            }
        );
        assert!(db.users().get_by_email("root@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_superadmin_promotes_existing_user() {
        let db = Database::open(":memory:").await.unwrap();
        let codec = SignatureCodec::new(b"sig-secret");
        let url = Url::parse("https://assets.example.com").unwrap();
        db.users()
            .create("uuid-1", "root@example.com", UserRole::User, None, true)
            .await
            .unwrap();

        let grant = create_superadmin(&db, &codec, &url, "ROOT@example.com")
            .await
            .unwrap();
        assert!(matches!(grant, SuperadminGrant::Promoted { .. }));

        let user = db
            .users()
            .get_by_email("root@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, UserRole::Superadmin);
    }
}
