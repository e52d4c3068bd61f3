//! Global server configuration initialized once at startup.
//!
//! These values are immutable after initialization and shared across all request handlers.

use std::sync::OnceLock;

use crate::cli::IpExtractor;

static SECURE_COOKIES: OnceLock<bool> = OnceLock::new();
static IP_EXTRACTOR: OnceLock<Option<IpExtractor>> = OnceLock::new();

/// Set the process-wide settings. Later calls are ignored.
pub fn init(secure_cookies: bool, ip_extractor: Option<IpExtractor>) {
    SECURE_COOKIES.get_or_init(|| secure_cookies);
    IP_EXTRACTOR.get_or_init(|| ip_extractor);
}

/// Whether cookies carry the Secure flag. Defaults to on until initialized.
pub fn secure_cookies() -> bool {
    SECURE_COOKIES.get().copied().unwrap_or(true)
}

pub fn ip_extractor() -> Option<IpExtractor> {
    IP_EXTRACTOR.get().cloned().flatten()
}
