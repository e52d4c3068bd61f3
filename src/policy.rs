//! Request-level access policy for page routes.
//!
//! [`decide`] is a pure function of who is asking and for which path.
//! [`access_policy`] runs it for every page request, then checks the
//! `?signature=` of the multi-step flow pages before the handler sees them.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::auth::{AuthenticatedUser, authenticate_request};
use crate::db::{Database, Tier, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::signature::{SignatureCodec, SignatureKind, SignatureRejection, SignedPayload};

pub const SIGN_IN_PATH: &str = "/sign-in";
pub const ADMIN_LOGIN_PATH: &str = "/admin/login";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const TRIAL_PATH: &str = "/trial";
pub const ADMIN_PATH: &str = "/admin";

const AUTH_REQUIRED: [&str; 4] = [DASHBOARD_PATH, TRIAL_PATH, "/account", ADMIN_PATH];

const SUPERADMIN_ONLY: [&str; 2] = ["/admin/admins", "/admin/settings"];

pub const INVALID_LINK_MESSAGE: &str = "Invalid or expired link";
pub const EXPIRED_LINK_MESSAGE: &str = "This link has expired. Please request a new one.";

/// Who is asking for which page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyInput<'a> {
    pub logged_in: bool,
    pub role: UserRole,
    pub tier: Tier,
    pub path: &'a str,
    pub query: Option<&'a str>,
}

impl<'a> PolicyInput<'a> {
    pub fn anonymous(path: &'a str, query: Option<&'a str>) -> Self {
        Self {
            logged_in: false,
            role: UserRole::User,
            tier: Tier::Free,
            path,
            query,
        }
    }

    pub fn signed_in(role: UserRole, tier: Tier, path: &'a str, query: Option<&'a str>) -> Self {
        Self {
            logged_in: true,
            role,
            tier,
            path,
            query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Redirect(String),
}

/// True if `path` is `prefix` or lies below it.
fn under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn is_login_page(path: &str) -> bool {
    under(path, SIGN_IN_PATH) || under(path, ADMIN_LOGIN_PATH)
}

fn is_admin_area(path: &str) -> bool {
    under(path, ADMIN_PATH) && !under(path, ADMIN_LOGIN_PATH)
}

pub fn requires_auth(path: &str) -> bool {
    AUTH_REQUIRED.iter().any(|prefix| under(path, prefix)) && !under(path, ADMIN_LOGIN_PATH)
}

pub fn is_superadmin_only(path: &str) -> bool {
    SUPERADMIN_ONLY.iter().any(|prefix| under(path, prefix))
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `/sign-in?callbackUrl=...` preserving the original path and query.
pub fn sign_in_redirect(path: &str, query: Option<&str>) -> String {
    let target = match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    };
    format!("{}?callbackUrl={}", SIGN_IN_PATH, encode(&target))
}

/// Decide whether a page request proceeds or where it is sent instead.
pub fn decide(input: &PolicyInput<'_>) -> Decision {
    let path = input.path;

    if !input.logged_in {
        if requires_auth(path) {
            return Decision::Redirect(sign_in_redirect(path, input.query));
        }
        return Decision::Allow;
    }

    if input.role.is_staff() {
        if is_login_page(path) {
            return Decision::Redirect(ADMIN_PATH.to_string());
        }
        if input.role != UserRole::Superadmin && is_superadmin_only(path) {
            return Decision::Redirect(ADMIN_PATH.to_string());
        }
        return Decision::Allow;
    }

    if is_login_page(path) || is_admin_area(path) {
        return Decision::Redirect(DASHBOARD_PATH.to_string());
    }

    let paid = input.tier.is_paid();
    if under(path, DASHBOARD_PATH) && !paid {
        return Decision::Redirect(TRIAL_PATH.to_string());
    }
    if under(path, TRIAL_PATH) && paid {
        return Decision::Redirect(DASHBOARD_PATH.to_string());
    }

    Decision::Allow
}

/// A flow page and the token kind its link must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureGate {
    pub kind: SignatureKind,
    /// Where to send the user to start the flow over.
    pub start_page: &'static str,
}

pub fn signature_gate(path: &str) -> Option<SignatureGate> {
    let (kind, start_page) = match path {
        "/invite" => (SignatureKind::Invite, SIGN_IN_PATH),
        "/reset-password" => (SignatureKind::ResetPassword, "/forgot-password"),
        "/license-verify" => (SignatureKind::LicenseVerify, "/license"),
        _ => return None,
    };
    Some(SignatureGate { kind, start_page })
}

/// Redirect to a page with `?error=<message>`.
pub fn error_redirect(page: &str, message: &str) -> String {
    format!("{}?error={}", page, encode(message))
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Check a flow page's signature. Returns the payload or the redirect to take.
pub fn check_signature(
    codec: &SignatureCodec,
    gate: SignatureGate,
    query: Option<&str>,
) -> Result<SignedPayload, String> {
    let Some(signature) = query_param(query, "signature") else {
        return Err(error_redirect(gate.start_page, INVALID_LINK_MESSAGE));
    };

    match codec.verify_kind(&signature, gate.kind) {
        Ok(payload) => Ok(payload),
        Err(SignatureRejection::Expired(_)) => {
            Err(error_redirect(gate.start_page, EXPIRED_LINK_MESSAGE))
        }
        Err(SignatureRejection::Invalid) => {
            Err(error_redirect(gate.start_page, INVALID_LINK_MESSAGE))
        }
    }
}

/// Payload of a flow page's verified signature, for the page handler.
#[derive(Debug, Clone)]
pub struct VerifiedSignature(pub SignedPayload);

#[derive(Clone)]
pub struct PolicyState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub codec: Arc<SignatureCodec>,
}

impl_has_auth_backend!(PolicyState);

/// Middleware applying [`decide`] and the signature gate to page routes.
///
/// The signed-in user, if any, is left in the request extensions as an
/// [`AuthenticatedUser`].
pub async fn access_policy(
    State(state): State<PolicyState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let user: Option<AuthenticatedUser> = authenticate_request(&parts, &state).await.ok();

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);

    let input = match &user {
        Some(u) => PolicyInput::signed_in(u.role(), u.tier(), &path, query.as_deref()),
        None => PolicyInput::anonymous(&path, query.as_deref()),
    };

    if let Decision::Redirect(target) = decide(&input) {
        tracing::debug!(path = %path, target = %target, "Access policy redirect");
        return Redirect::temporary(&target).into_response();
    }

    if let Some(gate) = signature_gate(&path) {
        match check_signature(&state.codec, gate, query.as_deref()) {
            Ok(payload) => {
                parts.extensions.insert(VerifiedSignature(payload));
            }
            Err(target) => {
                tracing::info!(path = %path, "Rejected flow link");
                return Redirect::temporary(&target).into_response();
            }
        }
    }

    if let Some(user) = user {
        parts.extensions.insert(user);
    }

    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(tier: Tier, path: &str) -> Decision {
        decide(&PolicyInput::signed_in(UserRole::User, tier, path, None))
    }

    fn redirect(to: &str) -> Decision {
        Decision::Redirect(to.to_string())
    }

    #[test]
    fn test_anonymous_needs_sign_in_for_protected_pages() {
        assert_eq!(
            decide(&PolicyInput::anonymous("/dashboard", None)),
            redirect("/sign-in?callbackUrl=%2Fdashboard")
        );
        assert_eq!(
            decide(&PolicyInput::anonymous("/admin/users", Some("page=2"))),
            redirect("/sign-in?callbackUrl=%2Fadmin%2Fusers%3Fpage%3D2")
        );
        assert_eq!(decide(&PolicyInput::anonymous("/admin/login", None)), Decision::Allow);
        assert_eq!(decide(&PolicyInput::anonymous("/sign-in", None)), Decision::Allow);
        assert_eq!(decide(&PolicyInput::anonymous("/", None)), Decision::Allow);
    }

    #[test]
    fn test_prefix_match_is_per_segment() {
        assert!(requires_auth("/account"));
        assert!(requires_auth("/account/billing"));
        assert!(!requires_auth("/accounting"));
        assert!(!requires_auth("/trialware"));
    }

    #[test]
    fn test_staff_routing() {
        for role in [UserRole::Admin, UserRole::Superadmin] {
            let at = |path| decide(&PolicyInput::signed_in(role, Tier::Free, path, None));
            assert_eq!(at("/sign-in"), redirect("/admin"));
            assert_eq!(at("/admin/login"), redirect("/admin"));
            assert_eq!(at("/admin"), Decision::Allow);
            assert_eq!(at("/dashboard"), Decision::Allow);
            assert_eq!(at("/trial"), Decision::Allow);
        }
    }

    #[test]
    fn test_superadmin_only_pages() {
        let admin = |path| decide(&PolicyInput::signed_in(UserRole::Admin, Tier::Free, path, None));
        let root =
            |path| decide(&PolicyInput::signed_in(UserRole::Superadmin, Tier::Free, path, None));

        assert_eq!(admin("/admin/admins"), redirect("/admin"));
        assert_eq!(admin("/admin/settings/mail"), redirect("/admin"));
        assert_eq!(root("/admin/admins"), Decision::Allow);
        assert_eq!(root("/admin/settings"), Decision::Allow);
    }

    #[test]
    fn test_user_tier_routing() {
        assert_eq!(user(Tier::Free, "/dashboard"), redirect("/trial"));
        assert_eq!(user(Tier::Free, "/dashboard/assets"), redirect("/trial"));
        assert_eq!(user(Tier::Free, "/trial"), Decision::Allow);
        assert_eq!(user(Tier::Pro, "/trial"), redirect("/dashboard"));
        assert_eq!(user(Tier::ProPlus, "/dashboard"), Decision::Allow);
        assert_eq!(user(Tier::Pro, "/account"), Decision::Allow);
    }

    #[test]
    fn test_user_kept_out_of_login_and_admin() {
        assert_eq!(user(Tier::Pro, "/sign-in"), redirect("/dashboard"));
        assert_eq!(user(Tier::Free, "/admin"), redirect("/dashboard"));
        assert_eq!(user(Tier::Free, "/admin/login"), redirect("/dashboard"));
    }

    #[test]
    fn test_signature_gate_pages() {
        assert_eq!(
            signature_gate("/reset-password").map(|g| g.start_page),
            Some("/forgot-password")
        );
        assert_eq!(
            signature_gate("/license-verify").map(|g| g.kind),
            Some(SignatureKind::LicenseVerify)
        );
        assert!(signature_gate("/license").is_none());
    }

    #[test]
    fn test_check_signature_outcomes() {
        let codec = SignatureCodec::new(b"sig-secret");
        let gate = SignatureGate {
            kind: SignatureKind::ResetPassword,
            start_page: "/forgot-password",
        };
        let payload = SignedPayload::ResetPassword {
            email: "a@example.com".into(),
        };

        let token = codec.issue(&payload, 3600).unwrap();
        let query = format!("signature={}", token);
        assert_eq!(check_signature(&codec, gate, Some(&query)), Ok(payload.clone()));

        assert_eq!(
            check_signature(&codec, gate, None),
            Err("/forgot-password?error=Invalid+or+expired+link".to_string())
        );

        let invite = codec
            .issue(
                &SignedPayload::Invite {
                    email: "a@example.com".into(),
                    role: UserRole::Admin,
                },
                3600,
            )
            .unwrap();
        let query = format!("signature={}", invite);
        assert_eq!(
            check_signature(&codec, gate, Some(&query)),
            Err("/forgot-password?error=Invalid+or+expired+link".to_string())
        );

        let old = codec.issue_at(&payload, 1, 1_000).unwrap();
        let query = format!("signature={}", old);
        let target = check_signature(&codec, gate, Some(&query)).unwrap_err();
        assert!(target.starts_with("/forgot-password?error=This+link+has+expired"));
    }
}
