//! Common types used across CLI modules

use std::str::FromStr;
use uuid::Uuid;

/// Task identifier as typed by the user: a full UUID or an unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrPrefix {
    Full(Uuid),
    /// Lowercased prefix of a UUID's hyphenated form
    Prefix(String),
}

impl IdOrPrefix {
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }

    pub fn as_str(&self) -> String {
        self.to_string()
    }
}

impl FromStr for IdOrPrefix {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if let Ok(uuid) = Uuid::parse_str(input) {
            return Ok(IdOrPrefix::Full(uuid));
        }

        if input.is_empty() {
            return Err("task id must not be empty".to_string());
        }
        if !input.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(format!("'{}' is not a task id or id prefix", input));
        }

        Ok(IdOrPrefix::Prefix(input.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}
