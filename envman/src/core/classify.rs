//! Permission-denial detection on registry tool error text.
//!
//! `reg.exe` reports denials in the display language of the OS, so the
//! phrase list covers the English and Chinese wordings.

const DENIAL_PHRASES: &[&str] = &["Access is denied", "拒绝访问", "拒绝", "denied"];

/// Whether `error_text` reads like an access-denied failure.
pub fn is_permission_denied(error_text: &str) -> bool {
    DENIAL_PHRASES
        .iter()
        .any(|phrase| error_text.contains(phrase))
}
