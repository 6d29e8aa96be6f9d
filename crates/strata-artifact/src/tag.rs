//! Provides/requires tags
//!
//! A [`Tag`] is the unit of routing: reports declare the tags they provide,
//! tasks and hypotheses declare the tags they require.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Prefix used for focus-area tags
pub const FOCUS_PREFIX: &str = "focus:";

/// Ordered set of tags
pub type TagSet = BTreeSet<Tag>;

/// Routing tag
///
/// Normalized to lowercase; never empty and never contains whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// Parse a tag
    ///
    /// # Errors
    /// Returns error if the tag is empty or contains whitespace
    pub fn new(raw: impl AsRef<str>) -> Result<Self, TagError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TagError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TagError::Whitespace(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Tag naming a focus area
    ///
    /// Whitespace inside the name is replaced so the result is always valid.
    #[must_use]
    pub fn focus(name: &str) -> Self {
        let cleaned: String = name
            .trim()
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect();
        let cleaned = if cleaned.is_empty() {
            "root".to_string()
        } else {
            cleaned
        };
        Self(format!("{FOCUS_PREFIX}{}", cleaned.to_lowercase()))
    }

    /// String form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Focus-area name if this is a focus tag
    #[must_use]
    pub fn focus_name(&self) -> Option<&str> {
        self.0.strip_prefix(FOCUS_PREFIX)
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = TagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

/// Build a tag set from string literals, skipping invalid entries
#[must_use]
pub fn tag_set<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter().filter_map(|t| Tag::new(t).ok()).collect()
}

/// Tag parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// Tag was empty
    #[error("tag is empty")]
    Empty,

    /// Tag contained whitespace
    #[error("tag contains whitespace: {0:?}")]
    Whitespace(String),
}
