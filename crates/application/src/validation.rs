//! Request validation run by the mediator before any handler.

use serde::Serialize;

use content_core::{optional_text, required_text};

/// One failed rule: the offending field and a message key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub field: String,
    pub key: String,
}

impl ValidationFailure {
    pub fn new(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key: key.into(),
        }
    }
}

pub trait Validate {
    /// Empty when the request is valid.
    fn validate(&self) -> Vec<ValidationFailure> {
        Vec::new()
    }
}

/// Collects failures using the same text rules and keys as the domain.
#[derive(Debug, Default)]
pub struct Validator {
    failures: Vec<ValidationFailure>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, field: &str, value: &str, max_chars: usize) -> Self {
        if let Err(err) = required_text(value, max_chars, field) {
            self.failures.push(ValidationFailure::new(field, err.key()));
        }
        self
    }

    pub fn optional(mut self, field: &str, value: Option<&str>, max_chars: usize) -> Self {
        if let Err(err) = optional_text(value, max_chars, field) {
            self.failures.push(ValidationFailure::new(field, err.key()));
        }
        self
    }

    /// Adds `{field}.invalid` unless `ok`.
    pub fn check(mut self, field: &str, ok: bool) -> Self {
        if !ok {
            self.failures
                .push(ValidationFailure::new(field, format!("{field}.invalid")));
        }
        self
    }

    pub fn finish(self) -> Vec<ValidationFailure> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_failure_in_order() {
        let failures = Validator::new()
            .required("title", "   ", 200)
            .optional("summary", Some("abcdef"), 3)
            .check("page", false)
            .finish();

        assert_eq!(
            failures,
            vec![
                ValidationFailure::new("title", "title.required"),
                ValidationFailure::new("summary", "summary.too_long"),
                ValidationFailure::new("page", "page.invalid"),
            ]
        );
    }

    #[test]
    fn blank_optional_text_is_fine() {
        let failures = Validator::new().optional("description", Some("  "), 10).finish();

        assert!(failures.is_empty());
    }
}
