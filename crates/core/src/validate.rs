//! Structural payload validation.

use crate::error::{AdminError, AdminResult};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;

/// Normalise and validate an email address.
///
/// Addresses are trimmed and lower-cased so the Registry's uniqueness holds
/// regardless of how the caller spells them.
pub fn email(raw: &str) -> AdminResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(AdminError::invalid_input("email must be 1-254 characters"));
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AdminError::invalid_input("email must not contain whitespace"));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AdminError::invalid_input("email must contain '@'"));
    };
    let labels_ok = domain.split('.').all(|label| !label.is_empty());
    if local.is_empty() || domain.contains('@') || !domain.contains('.') || !labels_ok {
        return Err(AdminError::invalid_input("email is not well-formed"));
    }

    Ok(email)
}

/// Validate a display name (trimmed, non-empty, bounded).
pub fn name(field: &str, raw: &str) -> AdminResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AdminError::invalid_input(format!("{field} is required")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AdminError::invalid_input(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(AdminError::invalid_input(format!("{field} contains control characters")));
    }
    Ok(name.to_string())
}

/// Validate an optional free-text field; blank input becomes `None`.
pub fn optional_text(field: &str, raw: Option<&str>, max: usize) -> AdminResult<Option<String>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) if text.chars().count() > max => Err(AdminError::invalid_input(format!(
            "{field} must be at most {max} characters"
        ))),
        Some(text) => Ok(Some(text.to_string())),
    }
}
