//! Repository reference (path) rules.
//!
//! A repository path is a `/`-separated sequence of lowercase components,
//! e.g. `gitlab-org/build/foo`. The leading component is the top-level
//! namespace, which doubles as the physical partition key of every row the
//! repository owns.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted repository path, matching the distribution limit.
pub const MAX_PATH_LENGTH: usize = 255;

/// Errors raised while validating a repository reference.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReferenceError {
    #[error("invalid repository path: {0:?}")]
    BadReference(String),

    #[error("repository path too long: {actual} characters, maximum {MAX_PATH_LENGTH}")]
    TooLong { actual: usize },
}

/// A validated repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPath {
    path: String,
}

impl RepositoryPath {
    /// The full path, e.g. `gitlab-org/build/foo`.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The last path segment, used as the repository's short name.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The leading path segment: the top-level namespace.
    pub fn top_level(&self) -> &str {
        self.path.split('/').next().unwrap_or(&self.path)
    }

    /// Path of the parent repository, if the path is nested.
    pub fn parent(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// All ancestor paths, outermost first, excluding the path itself.
    ///
    /// `a/b/c` yields `a` then `a/b`.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        let path = self.path.as_str();
        path.match_indices('/').map(move |(i, _)| &path[..i])
    }
}

// One path component: alphanumerics separated by single `.`, one or two `_`,
// or runs of `-`. Matches the distribution reference grammar.
fn valid_component(c: &str) -> bool {
    let bytes = c.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b if alnum(b) => i += 1,
            // `.` must be single, followed by an alphanumeric
            b'.' => {
                if i + 1 >= bytes.len() || !alnum(bytes[i + 1]) {
                    return false;
                }
                i += 1;
            }
            // runs of `-` are fine, followed by an alphanumeric
            b'-' => {
                let run = bytes[i..].iter().take_while(|&&b| b == b'-').count();
                i += run;
                if i >= bytes.len() || !alnum(bytes[i]) {
                    return false;
                }
            }
            // at most `__`, followed by an alphanumeric
            b'_' => {
                let run = bytes[i..].iter().take_while(|&&b| b == b'_').count();
                if run > 2 {
                    return false;
                }
                i += run;
                if i >= bytes.len() || !alnum(bytes[i]) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

impl FromStr for RepositoryPath {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, ReferenceError> {
        if s.len() > MAX_PATH_LENGTH {
            return Err(ReferenceError::TooLong { actual: s.len() });
        }
        if s.is_empty() || !s.split('/').all(valid_component) {
            return Err(ReferenceError::BadReference(s.to_string()));
        }
        Ok(RepositoryPath {
            path: s.to_string(),
        })
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for RepositoryPath {
    fn as_ref(&self) -> &str {
        &self.path
    }
}
