//! Verification code extraction from decoded mail bodies

use once_cell::sync::Lazy;
use regex::Regex;

use veriflow_core::VerificationCode;

static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9]{6}\b").unwrap());

/// First standalone 6-digit run in `body`.
pub fn find_code(body: &str) -> Option<VerificationCode> {
    CODE_RE
        .find(body)
        .and_then(|m| VerificationCode::parse(m.as_str()).ok())
}

/// Like [`find_code`], but skips runs directly preceded by an ASCII letter,
/// `@` or `.` so digits inside addresses and domain names are not taken.
/// Only the preceding character is checked.
pub fn find_code_guarded(body: &str) -> Option<VerificationCode> {
    CODE_RE
        .find_iter(body)
        .find(|m| {
            !body[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '@' || c == '.')
        })
        .and_then(|m| VerificationCode::parse(m.as_str()).ok())
}
