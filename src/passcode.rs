use crate::error::{ClientError, Result};

pub const MIN_PASSCODE_LEN: usize = 4;

pub fn is_valid_passcode(code: &str) -> bool {
    code.len() >= MIN_PASSCODE_LEN && code.chars().all(|c| c.is_ascii_digit())
}

/// Checks the passcode form: at least four digits, typed twice.
pub fn validate_passcode(first: &str, second: &str) -> Result<String> {
    let first = first.trim();
    let second = second.trim();
    if !is_valid_passcode(first) {
        return Err(ClientError::validation("Passcode must be at least 4 digits."));
    }
    if first != second {
        return Err(ClientError::validation("Passcodes do not match."));
    }
    Ok(first.to_string())
}

/// The optional passcode on the sign-up form; anything invalid is dropped.
pub fn optional_signup_passcode(first: &str, second: &str) -> Option<String> {
    validate_passcode(first, second).ok()
}
