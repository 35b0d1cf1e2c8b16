//! HTTP header list with case-insensitive lookup.
//!
//! Webhook records carry their request headers as `Name: value` lines. The
//! order of the lines is preserved so that forwarded requests replay them in
//! the order they were received.

use std::fmt;

use thiserror::Error;

/// A header line that could not be split into a name and a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid header line (expected `Name: value`): {0}")]
pub struct InvalidHeader(pub String);

/// A single `Name: value` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Creates a header from a name and a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parses a `Name: value` line.
    ///
    /// The line is split on the first `:`; the value is trimmed. The name must
    /// not be empty.
    pub fn parse(line: &str) -> Result<Self, InvalidHeader> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| InvalidHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(InvalidHeader(line.to_string()));
        }
        Ok(Header::new(name, value.trim()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this header has the given name (case-insensitive).
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// An ordered list of headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Returns the value of the first header with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|h| h.is(name)).map(Header::value)
    }

    /// Replaces the value of the first header with the given name, or appends
    /// a new header if none exists.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|h| h.is(name)) {
            Some(header) => header.value = value,
            None => self.0.push(Header::new(name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
