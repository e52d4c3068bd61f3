//! One-time codes with exponential-backoff cooldown and a daily quota.
//!
//! Codes live for ten minutes under an identity key and are consumed by an
//! atomic check-and-delete. Every issue is throttled server-side: the n-th
//! send in a session opens a cooldown of `base * 2^min(n, cap)` seconds, and
//! each identity gets a fixed number of sends per UTC day.

use chrono::NaiveDate;
use rand::Rng;
use std::sync::Arc;

use crate::db::Database;
use crate::signature::{
    LICENSE_VERIFY_TTL_SECS, SignatureCodec, SignatureError, SignatureKind, SignatureRejection,
    SignedPayload,
};
use crate::time::{unix_now, utc_day};

/// Lifetime of a stored code.
pub const OTP_TTL_SECS: i64 = 600;

/// Backoff and quota parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub base_delay_secs: u64,
    pub cap_exponent: u32,
    pub daily_limit: u32,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            cap_exponent: 9,
            daily_limit: 10,
        }
    }
}

impl CooldownPolicy {
    /// Cooldown opened by the `attempt`-th send (zero based).
    pub fn compute_delay(&self, attempt: u32) -> u64 {
        self.base_delay_secs << attempt.min(self.cap_exponent)
    }
}

/// Why a send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpThrottle {
    Cooldown { remaining_secs: u64 },
    DailyLimit,
}

/// Per-identity throttle state. All methods take the current time so the
/// state can be driven by a fake clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownState {
    pub session_attempts: u32,
    pub daily_attempts: u32,
    pub day: NaiveDate,
    pub cooldown_started_at: i64,
    pub cooldown_secs: u64,
}

impl CooldownState {
    pub fn new(now: i64) -> Self {
        Self {
            session_attempts: 0,
            daily_attempts: 0,
            day: utc_day(now),
            cooldown_started_at: 0,
            cooldown_secs: 0,
        }
    }

    fn roll_day(&mut self, now: i64) {
        let today = utc_day(now);
        if today != self.day {
            self.day = today;
            self.daily_attempts = 0;
        }
    }

    /// Seconds left on the current cooldown, zero if none.
    pub fn remaining_cooldown(&self, now: i64) -> u64 {
        let ends_at = self.cooldown_started_at + self.cooldown_secs as i64;
        (ends_at - now).max(0) as u64
    }

    pub fn check(&self, now: i64, policy: &CooldownPolicy) -> Result<(), OtpThrottle> {
        let remaining_secs = self.remaining_cooldown(now);
        if remaining_secs > 0 {
            return Err(OtpThrottle::Cooldown { remaining_secs });
        }

        let daily_attempts = if utc_day(now) == self.day {
            self.daily_attempts
        } else {
            0
        };
        if daily_attempts >= policy.daily_limit {
            return Err(OtpThrottle::DailyLimit);
        }

        Ok(())
    }

    /// Count a send and open its cooldown. Returns the cooldown length.
    pub fn record_attempt(&mut self, now: i64, policy: &CooldownPolicy) -> u64 {
        self.roll_day(now);
        let delay = policy.compute_delay(self.session_attempts);
        self.cooldown_started_at = now;
        self.cooldown_secs = delay;
        self.session_attempts = self.session_attempts.saturating_add(1);
        self.daily_attempts = self.daily_attempts.saturating_add(1);
        delay
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Verification link is invalid")]
    TokenInvalid,
    #[error("Verification link has expired")]
    TokenExpired,
    #[error("Incorrect code")]
    Incorrect,
    #[error("Please wait {remaining_secs} seconds before requesting another code")]
    Cooldown { remaining_secs: u64 },
    #[error("Daily code limit reached")]
    DailyLimit,
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<OtpThrottle> for OtpError {
    fn from(throttle: OtpThrottle) -> Self {
        match throttle {
            OtpThrottle::Cooldown { remaining_secs } => OtpError::Cooldown { remaining_secs },
            OtpThrottle::DailyLimit => OtpError::DailyLimit,
        }
    }
}

/// A freshly issued code and the token that travels with it.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    /// Address the code goes to.
    pub email: String,
    pub code: String,
    pub signature: String,
    /// Cooldown opened by this send.
    pub cooldown_secs: u64,
}

/// Generate a uniformly random 6-digit code.
pub fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

/// Issues and verifies license verification codes.
#[derive(Clone)]
pub struct OtpIssuer {
    db: Database,
    codec: Arc<SignatureCodec>,
    policy: CooldownPolicy,
}

impl OtpIssuer {
    pub fn new(db: Database, codec: Arc<SignatureCodec>, policy: CooldownPolicy) -> Self {
        Self { db, codec, policy }
    }

    /// Key under which the code and throttle state for a license live.
    pub fn identity_key(license_key: &str) -> String {
        format!("license:{}", license_key)
    }

    pub async fn issue(&self, email: &str, license_key: &str) -> Result<IssuedOtp, OtpError> {
        self.issue_at(email, license_key, unix_now()).await
    }

    pub async fn issue_at(
        &self,
        email: &str,
        license_key: &str,
        now: i64,
    ) -> Result<IssuedOtp, OtpError> {
        let identity_key = Self::identity_key(license_key);
        let attempts = self.db.otp_attempts();

        // Reserve the send before a code exists. The write only lands if the
        // state is unchanged since it was read; a concurrent send that got
        // there first makes this one re-read and hit its cooldown.
        let (state, cooldown_secs) = loop {
            let current = attempts.find(&identity_key).await?;
            let mut next = current
                .clone()
                .unwrap_or_else(|| CooldownState::new(now));
            next.check(now, &self.policy)?;
            let cooldown_secs = next.record_attempt(now, &self.policy);
            if attempts
                .compare_and_swap(&identity_key, current.as_ref(), &next, now)
                .await?
            {
                break (next, cooldown_secs);
            }
        };

        let code = generate_code();
        self.db
            .otps()
            .put(&identity_key, &code, OTP_TTL_SECS, now)
            .await?;

        let payload = SignedPayload::LicenseVerify {
            email: email.to_string(),
            license_key: license_key.to_string(),
            otp: true,
        };
        let signature = self
            .codec
            .issue_at(&payload, LICENSE_VERIFY_TTL_SECS, now)?;

        tracing::info!(
            identity_key = %identity_key,
            session_attempts = state.session_attempts,
            cooldown_secs,
            "Issued one-time code"
        );

        Ok(IssuedOtp {
            email: email.to_string(),
            code,
            signature,
            cooldown_secs,
        })
    }

    /// Issue a new code for the flow a previous token belongs to.
    /// The previous token may be expired but must carry a valid tag.
    pub async fn resend(&self, previous_signature: &str) -> Result<IssuedOtp, OtpError> {
        self.resend_at(previous_signature, unix_now()).await
    }

    pub async fn resend_at(
        &self,
        previous_signature: &str,
        now: i64,
    ) -> Result<IssuedOtp, OtpError> {
        let payload = match self.codec.verify_kind_at(
            previous_signature,
            SignatureKind::LicenseVerify,
            now,
        ) {
            Ok(payload) | Err(SignatureRejection::Expired(payload)) => payload,
            Err(SignatureRejection::Invalid) => return Err(OtpError::TokenInvalid),
        };

        let SignedPayload::LicenseVerify {
            email, license_key, ..
        } = payload
        else {
            return Err(OtpError::TokenInvalid);
        };

        self.issue_at(&email, &license_key, now).await
    }

    pub async fn verify(&self, signature: &str, submitted: &str) -> Result<SignedPayload, OtpError> {
        self.verify_at(signature, submitted, unix_now()).await
    }

    /// Check a submitted code against the token's identity. A match consumes
    /// the code; a mismatch leaves it for another try until it expires.
    pub async fn verify_at(
        &self,
        signature: &str,
        submitted: &str,
        now: i64,
    ) -> Result<SignedPayload, OtpError> {
        let payload = match self
            .codec
            .verify_kind_at(signature, SignatureKind::LicenseVerify, now)
        {
            Ok(payload) => payload,
            Err(SignatureRejection::Expired(_)) => return Err(OtpError::TokenExpired),
            Err(SignatureRejection::Invalid) => return Err(OtpError::TokenInvalid),
        };

        let SignedPayload::LicenseVerify { license_key, .. } = &payload else {
            return Err(OtpError::TokenInvalid);
        };
        let identity_key = Self::identity_key(license_key);

        let consumed = self
            .db
            .otps()
            .take_if_matches(&identity_key, submitted.trim(), now)
            .await?;
        if !consumed {
            tracing::info!(identity_key = %identity_key, "One-time code mismatch");
            return Err(OtpError::Incorrect);
        }

        // A successful proof ends the backoff session.
        if let Err(e) = self.db.otp_attempts().reset_session(&identity_key, now).await {
            tracing::warn!(error = %e, "Failed to reset code cooldown");
        }

        Ok(payload)
    }
}
