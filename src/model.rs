//! Board, list, and card entities held by the entity store.
//!
//! DESIGN
//! ======
//! Entities are plain owned data. Display order is the order of the `lists`
//! and `cards` vectors; `List::position` is only consulted when a board is
//! first loaded. Every entity carries `rev`, the store revision of the last
//! patch that wrote it (see `store`).

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque entity identifier.
///
/// The server hands out integers for some entities and strings for others;
/// both forms normalize to the same textual id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id from a JSON string or integer. Empty strings are rejected.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| D::Error::custom(format!("invalid entity id: {value}")))
    }
}

/// A user assigned to a card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub name: String,
    pub email: String,
}

/// A task item within a list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: EntityId,
    pub title: String,
    pub description: String,
    /// Calendar date only; any time component from the server is dropped.
    pub due_date: Option<NaiveDate>,
    pub labels: BTreeSet<String>,
    #[serde(rename = "assignedUsers")]
    pub assignees: Vec<User>,
    #[serde(skip)]
    pub rev: u64,
}

impl Card {
    #[must_use]
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Add an assignee unless one with the same id is already present.
    pub fn assign(&mut self, user: User) {
        if !self.assignees.iter().any(|u| u.id == user.id) {
            self.assignees.push(user);
        }
    }
}

/// A named, ordered column of cards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct List {
    pub id: EntityId,
    pub name: String,
    /// Advisory sort key from the server; the `cards` order is authoritative.
    pub position: i64,
    pub cards: Vec<Card>,
    #[serde(skip)]
    pub rev: u64,
}

impl List {
    #[must_use]
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, position: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn card_index(&self, card_id: &EntityId) -> Option<usize> {
        self.cards.iter().position(|c| &c.id == card_id)
    }
}

/// The currently open board with its full list/card tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Board {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub lists: Vec<List>,
    #[serde(skip)]
    pub rev: u64,
}

impl Board {
    #[must_use]
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sort lists by their server position. Only meaningful right after a load.
    pub fn sort_lists_by_position(&mut self) {
        self.lists.sort_by_key(|l| l.position);
    }

    #[must_use]
    pub fn summary(&self) -> BoardSummary {
        BoardSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Catalogue row for a board the user can open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoardSummary {
    pub id: EntityId,
    pub name: String,
    pub description: String,
}

/// Parse a due date from either `YYYY-MM-DD` or an ISO-8601 date-time.
#[must_use]
pub fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.split('T').next()?.trim();
    if date_part.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Format a due date as the ISO-8601 date-time the API expects (midnight UTC).
#[must_use]
pub fn due_date_to_api(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
