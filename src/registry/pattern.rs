//! Channel patterns
//!
//! A subscription matches channels either by exact name or by regular
//! expression. Regexes always match the whole channel name.

use std::fmt;

use regex::Regex;

use super::error::RegistryError;
use crate::codec::MAX_CHANNEL_LEN;

/// Characters that mark a pattern as a regular expression
const REGEX_METACHARACTERS: &[char] = &[
    '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\',
];

/// How a subscription selects channels
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches one channel name exactly
    Exact(String),
    /// Matches every channel the anchored regex accepts
    Regex { source: String, regex: Regex },
}

impl Pattern {
    /// Parse a pattern, treating it as a regex if it contains metacharacters
    pub fn parse(pattern: &str) -> Result<Self, RegistryError> {
        if pattern.contains(REGEX_METACHARACTERS) {
            Self::regex(pattern)
        } else {
            Self::exact(pattern)
        }
    }

    /// Exact channel pattern
    pub fn exact(channel: &str) -> Result<Self, RegistryError> {
        if channel.is_empty() {
            return Err(invalid(channel, "pattern is empty"));
        }
        if channel.len() > MAX_CHANNEL_LEN {
            return Err(invalid(
                channel,
                &format!("channel name longer than {} bytes", MAX_CHANNEL_LEN),
            ));
        }
        Ok(Pattern::Exact(channel.to_string()))
    }

    /// Regex pattern, anchored to the whole channel name
    pub fn regex(source: &str) -> Result<Self, RegistryError> {
        if source.is_empty() {
            return Err(invalid(source, "pattern is empty"));
        }
        let regex =
            Regex::new(&format!("^(?:{})$", source)).map_err(|e| invalid(source, &e.to_string()))?;
        Ok(Pattern::Regex {
            source: source.to_string(),
            regex,
        })
    }

    /// Whether `channel` is selected by this pattern
    pub fn matches(&self, channel: &str) -> bool {
        match self {
            Pattern::Exact(name) => name == channel,
            Pattern::Regex { regex, .. } => regex.is_match(channel),
        }
    }

    /// The pattern as written by the subscriber
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Exact(name) => name,
            Pattern::Regex { source, .. } => source,
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Pattern::Regex { .. })
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.is_regex() == other.is_regex() && self.as_str() == other.as_str()
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(name) => write!(f, "{}", name),
            Pattern::Regex { source, .. } => write!(f, "/{}/", source),
        }
    }
}

fn invalid(pattern: &str, reason: &str) -> RegistryError {
    RegistryError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}
