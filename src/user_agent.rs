//! User-Agent string for upload traffic.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/uploader";

/// Default User-Agent for upload requests.
#[must_use]
pub(crate) fn default_upload_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("uploader/{version} (+{PROJECT_UA_URL})")
}
