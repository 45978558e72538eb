//! Absolute paths inside the drive tree.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// An absolute, `/`-separated path from the drive root.
///
/// Empty and `.` segments are dropped, so `/a//./b/` and `/a/b` are equal.
/// `..` is not a valid segment. The root has no components.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrivePath {
    components: Vec<String>,
}

impl DrivePath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an absolute path. Relative input and `..` segments are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(Error::InvalidPath(format!("not an absolute path: {s:?}")));
        }
        let mut components = Vec::new();
        for part in s.split('/').filter(|part| !part.is_empty() && *part != ".") {
            if part == ".." {
                return Err(Error::InvalidPath(format!("parent segment in path: {s:?}")));
            }
            components.push(part.to_string());
        }
        Ok(Self { components })
    }

    /// Build a path from names ordered root-to-leaf.
    pub fn from_components<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Last component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn join(&self, name: &str) -> Self {
        let mut components = self.components.clone();
        components.push(name.to_string());
        Self { components }
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for name in &self.components {
            write!(f, "/{name}")?;
        }
        Ok(())
    }
}

impl FromStr for DrivePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
