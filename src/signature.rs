//! Signed, time-bound tokens for stateless multi-step flows.
//!
//! A token is a compact JWS (HS256) over `{pld, iat, exp}` where `pld` is a
//! [`SignedPayload`] tagged by flow kind. Verification distinguishes a bad tag
//! (invalid) from a good tag past its expiry (expired), and still hands back
//! the payload of an expired token so the caller can offer to re-send.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::UserRole;
use crate::time::unix_now;

/// Invite links stay valid for a week.
pub const INVITE_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Password reset links stay valid for an hour.
pub const RESET_PASSWORD_TTL_SECS: i64 = 60 * 60;

/// License verification tokens live as long as the code sent with them.
pub const LICENSE_VERIFY_TTL_SECS: i64 = 10 * 60;

/// Flow kind carried by every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Invite,
    ResetPassword,
    LicenseVerify,
}

impl SignatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::Invite => "invite",
            SignatureKind::ResetPassword => "reset_password",
            SignatureKind::LicenseVerify => "license_verify",
        }
    }
}

/// Payload of a signed token, one variant per flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignedPayload {
    Invite {
        email: String,
        role: UserRole,
    },
    ResetPassword {
        email: String,
    },
    LicenseVerify {
        email: String,
        license_key: String,
        /// Set when a one-time code was issued alongside the token.
        otp: bool,
    },
}

impl SignedPayload {
    pub fn kind(&self) -> SignatureKind {
        match self {
            SignedPayload::Invite { .. } => SignatureKind::Invite,
            SignedPayload::ResetPassword { .. } => SignatureKind::ResetPassword,
            SignedPayload::LicenseVerify { .. } => SignatureKind::LicenseVerify,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            SignedPayload::Invite { email, .. }
            | SignedPayload::ResetPassword { email }
            | SignedPayload::LicenseVerify { email, .. } => email,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureClaims {
    pld: SignedPayload,
    iat: i64,
    exp: i64,
}

/// Outcome of [`SignatureCodec::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub expired: bool,
    pub payload: Option<SignedPayload>,
}

impl Verification {
    fn invalid() -> Self {
        Self {
            valid: false,
            expired: false,
            payload: None,
        }
    }
}

/// Why a token was refused for a particular flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureRejection {
    /// Bad format, bad tag, or issued for another flow.
    Invalid,
    /// Good tag, past expiry. The payload is still available.
    Expired(SignedPayload),
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Failed to encode signature: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// Issues and verifies signed tokens with a server-held secret.
#[derive(Clone)]
pub struct SignatureCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SignatureCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, payload: &SignedPayload, ttl_secs: i64) -> Result<String, SignatureError> {
        self.issue_at(payload, ttl_secs, unix_now())
    }

    pub fn issue_at(
        &self,
        payload: &SignedPayload,
        ttl_secs: i64,
        now: i64,
    ) -> Result<String, SignatureError> {
        let claims = SignatureClaims {
            pld: payload.clone(),
            iat: now,
            exp: now + ttl_secs,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    pub fn verify(&self, token: &str) -> Verification {
        self.verify_at(token, unix_now())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Verification {
        // Expiry is checked here rather than by the decoder so an expired
        // token with a good tag can still report its payload.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        let claims = match jsonwebtoken::decode::<SignatureClaims>(
            token,
            &self.decoding_key,
            &validation,
        ) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected signature");
                return Verification::invalid();
            }
        };

        Verification {
            valid: true,
            expired: now > claims.exp,
            payload: Some(claims.pld),
        }
    }

    /// Verify a token for one flow. Tokens issued for another flow are invalid.
    pub fn verify_kind(
        &self,
        token: &str,
        kind: SignatureKind,
    ) -> Result<SignedPayload, SignatureRejection> {
        self.verify_kind_at(token, kind, unix_now())
    }

    pub fn verify_kind_at(
        &self,
        token: &str,
        kind: SignatureKind,
        now: i64,
    ) -> Result<SignedPayload, SignatureRejection> {
        let verification = self.verify_at(token, now);
        let payload = match verification.payload {
            Some(payload) if verification.valid && payload.kind() == kind => payload,
            _ => return Err(SignatureRejection::Invalid),
        };

        if verification.expired {
            Err(SignatureRejection::Expired(payload))
        } else {
            Ok(payload)
        }
    }
}
