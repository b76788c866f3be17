//! Object references.
//!
//! A reference is a database number plus, when fully qualified, the creation
//! time of the object in milliseconds. Numbers are recycled when objects are
//! destroyed; the creation time disambiguates, so stored locks never match a
//! later object that happens to reuse the number. A bare reference (no
//! creation time) matches any object bearing that number; that form is only
//! meaningful while normalizing, never for final authorization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjRef {
    pub number: i32,
    pub created_millis: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjRefParseError {
    #[error("object reference must start with '#': {0}")]
    MissingHash(String),
    #[error("invalid object number: {0}")]
    BadNumber(String),
    #[error("invalid creation time: {0}")]
    BadCreation(String),
}

impl ObjRef {
    pub fn bare(number: i32) -> Self {
        Self {
            number,
            created_millis: None,
        }
    }

    pub fn qualified(number: i32, created_millis: i64) -> Self {
        Self {
            number,
            created_millis: Some(created_millis),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.created_millis.is_some()
    }

    /// Reference-matching used by lock evaluation: when both sides carry a
    /// creation time, both fields must agree; a bare side matches on number
    /// alone.
    pub fn matches(&self, other: &ObjRef) -> bool {
        if self.number != other.number {
            return false;
        }
        match (self.created_millis, other.created_millis) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.created_millis {
            Some(millis) => write!(f, "#{}:{}", self.number, millis),
            None => write!(f, "#{}", self.number),
        }
    }
}

impl FromStr for ObjRef {
    type Err = ObjRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('#')
            .ok_or_else(|| ObjRefParseError::MissingHash(s.to_string()))?;
        match rest.split_once(':') {
            None => {
                let number = rest
                    .parse::<i32>()
                    .map_err(|_| ObjRefParseError::BadNumber(s.to_string()))?;
                Ok(ObjRef::bare(number))
            }
            Some((num, created)) => {
                let number = num
                    .parse::<i32>()
                    .map_err(|_| ObjRefParseError::BadNumber(s.to_string()))?;
                let created_millis = created
                    .parse::<i64>()
                    .map_err(|_| ObjRefParseError::BadCreation(s.to_string()))?;
                Ok(ObjRef::qualified(number, created_millis))
            }
        }
    }
}

/// Whether a string is shaped like an object reference at all.
pub fn looks_like_ref(s: &str) -> bool {
    s.starts_with('#') && s.len() > 1
}
