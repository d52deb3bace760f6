//! Core types shared by the registry, handlers and clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Value of a property.
///
/// `Unset` is the sentinel for "nothing read yet" and is never delivered to
/// clients as a change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Unset,
    Int(i64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Which of the two candidate files backs a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Per-user/session state directory. Always tried first.
    User,
    /// System-wide state directory.
    System,
}

impl Location {
    pub fn other(self) -> Self {
        match self {
            Location::User => Location::System,
            Location::System => Location::User,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::User => f.write_str("user"),
            Location::System => f.write_str("system"),
        }
    }
}

/// Candidate files for one key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Locations {
    pub user: Option<PathBuf>,
    pub system: Option<PathBuf>,
}

impl Locations {
    pub fn new(user: Option<PathBuf>, system: Option<PathBuf>) -> Self {
        Self { user, system }
    }

    /// True if the key has no candidate file at all.
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.system.is_none()
    }

    pub fn get(&self, location: Location) -> Option<&Path> {
        match location {
            Location::User => self.user.as_deref(),
            Location::System => self.system.as_deref(),
        }
    }

    /// Candidates in preference order: user first, then system.
    pub fn iter(&self) -> impl Iterator<Item = (Location, &Path)> {
        [Location::User, Location::System]
            .into_iter()
            .filter_map(move |loc| self.get(loc).map(|p| (loc, p)))
    }
}

/// Unique identifier for a client handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
