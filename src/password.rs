//! Password hashing via bcrypt.

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Shortest password accepted when one is set.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Longest password accepted. bcrypt ignores input past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password must be between {MIN_PASSWORD_LENGTH} and {MAX_PASSWORD_LENGTH} characters")]
    InvalidLength,
    #[error("bcrypt: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Check a new password against the length rules.
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.len() < MIN_PASSWORD_LENGTH || password.len() > MAX_PASSWORD_LENGTH {
        return Err(PasswordError::InvalidLength);
    }
    Ok(())
}

/// Validate and hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    validate_password(password)?;
    Ok(bcrypt::hash(password, BCRYPT_COST)?)
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    Ok(bcrypt::verify(password, hash)?)
}
