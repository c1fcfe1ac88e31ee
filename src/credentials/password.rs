//! Password policy.

use crate::validation::{ValidationErrors, MIN};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

pub const UPPERCASE: &str = "uppercase";
pub const LOWERCASE: &str = "lowercase";
pub const NUMBER: &str = "number";
pub const SPECIAL: &str = "special";

/// Record one violation per unmet rule of the password policy.
pub fn check_password(field: &str, password: &str, errors: &mut ValidationErrors) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add_with_param(field, MIN, MIN_PASSWORD_LENGTH);
    }
    if !password.chars().any(char::is_uppercase) {
        errors.add(field, UPPERCASE);
    }
    if !password.chars().any(char::is_lowercase) {
        errors.add(field, LOWERCASE);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.add(field, NUMBER);
    }
    if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        errors.add(field, SPECIAL);
    }
}
