//! Field level validation that collects every violation before failing.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use url::Url;
use utoipa::ToSchema;

pub const REQUIRED: &str = "required";
pub const EMAIL: &str = "email";
pub const MIN: &str = "min";
pub const ALPHA_SPACE: &str = "alphaspace";
pub const URL: &str = "url";
pub const ONE_OF: &str = "oneof";
pub const SECRET_REF: &str = "secretref";
pub const LIFETIME: &str = "lifetime";
pub const RESERVED: &str = "reserved";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Violation {
    pub field: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ValidationErrors {
    violations: Vec<Violation>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, code: &str) {
        self.violations.push(Violation {
            field: field.to_string(),
            code: code.to_string(),
            param: None,
        });
    }

    pub fn add_with_param(&mut self, field: &str, code: &str, param: impl ToString) {
        self.violations.push(Violation {
            field: field.to_string(),
            code: code.to_string(),
            param: Some(param.to_string()),
        });
    }

    pub fn merge(&mut self, other: Self) {
        self.violations.extend(other.violations);
    }

    /// Prefix every field with `prefix.`, for payloads nested in a larger one.
    #[must_use]
    pub fn nest(mut self, prefix: &str) -> Self {
        for violation in &mut self.violations {
            violation.field = format!("{prefix}.{}", violation.field);
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    #[must_use]
    pub fn has(&self, field: &str, code: &str) -> bool {
        self.violations
            .iter()
            .any(|violation| violation.field == field && violation.code == code)
    }

    /// # Errors
    /// Returns `self` when at least one violation was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Record `required` for blank values; returns whether the value was present.
    pub fn required(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.add(field, REQUIRED);
            return false;
        }
        true
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if self.required(field, value) && !valid_email(value) {
            self.add(field, EMAIL);
        }
    }

    pub fn alpha_space(&mut self, field: &str, value: &str) {
        if !valid_alpha_space(value) {
            self.add(field, ALPHA_SPACE);
        }
    }

    pub fn min_chars(&mut self, field: &str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.add_with_param(field, MIN, min);
        }
    }

    pub fn absolute_url(&mut self, field: &str, value: &str) {
        if self.required(field, value) && !valid_absolute_url(value) {
            self.add(field, URL);
        }
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if self.required(field, value) && !allowed.contains(&value) {
            self.add_with_param(field, ONE_OF, allowed.join(" "));
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed:")?;
        for violation in &self.violations {
            write!(f, " {}={}", violation.field, violation.code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Trim and lowercase an email for lookups and uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

/// Letters and spaces only.
#[must_use]
pub fn valid_alpha_space(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_alphabetic() || c == ' ')
}

#[must_use]
pub fn valid_absolute_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| url.has_host())
}
