//! Text value objects and length rules shared by the content aggregates.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Non-empty, trimmed title of at most [`Title::MAX_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Title(String);

impl Title {
    pub const MAX_CHARS: usize = 200;

    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        required_text(raw.as_ref(), Self::MAX_CHARS, "title").map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Title {}

impl TryFrom<String> for Title {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Title> for String {
    fn from(value: Title) -> Self {
        value.0
    }
}

impl core::fmt::Display for Title {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim `raw` and require `1..=max_chars` characters.
///
/// Failures use the keys `{field}.required` and `{field}.too_long`.
pub fn required_text(raw: &str, max_chars: usize, field: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field}.required")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(DomainError::validation(format!("{field}.too_long")));
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`], but blank input becomes `None`.
pub fn optional_text(raw: Option<&str>, max_chars: usize, field: &str) -> DomainResult<Option<String>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => required_text(text, max_chars, field).map(Some),
    }
}
