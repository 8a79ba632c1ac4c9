//! Message router: inbound push frames to entity-store patches.
//!
//! SYSTEM CONTEXT
//! ==============
//! Raw text from the push transport is decoded into a `frames::InboundFrame`,
//! normalized into one [`SyncEvent`] and applied to the [`EntityStore`] as a
//! remote-origin [`Patch`]. Nothing here touches the network.
//!
//! DESIGN
//! ======
//! Every wire alias and payload shape collapses into a single variant during
//! [`normalize`]: handlers never see the legacy nested `{boardId, listId,
//! card|list}` form separately from the flattened entity form. Ids are read
//! from camelCase or snake_case keys and accept strings or integers.
//!
//! ERROR HANDLING
//! ==============
//! [`dispatch`] returns `Err` for undecodable frames, unknown types and
//! payloads missing required fields. The caller logs and moves on; one bad
//! frame never stops the frames after it.

use std::collections::BTreeSet;

use frames::{CodecError, InboundFrame};
use serde_json::Value;

use crate::model::{Card, EntityId, List, User, parse_due_date};
use crate::store::{Applied, BoardChanges, CardChanges, CardMove, EntityStore, ListChanges, Noop, Origin, Patch};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unknown event type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {reason}")]
    Invalid { kind: &'static str, reason: &'static str },
}

impl crate::error::ErrorCode for RouteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Codec(_) => "E_ROUTE_DECODE",
            Self::UnknownType(_) => "E_ROUTE_UNKNOWN_TYPE",
            Self::Invalid { .. } => "E_ROUTE_INVALID",
        }
    }
}

// =============================================================================
// EVENT KINDS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    BoardUpdated,
    ListAdded,
    ListUpdated,
    ListDeleted,
    CardAdded,
    CardUpdated,
    CardDeleted,
    CardMoved,
}

impl EventKind {
    /// Map a wire `type`, hyphenated or underscored, to its kind.
    #[must_use]
    pub fn from_wire(kind: &str) -> Option<Self> {
        Some(match kind {
            "board-updated" | "board_updated" => Self::BoardUpdated,
            "list-added" | "list_added" | "list_created" => Self::ListAdded,
            "list-updated" | "list_updated" => Self::ListUpdated,
            "list-deleted" | "list_deleted" => Self::ListDeleted,
            "card-added" | "card_added" | "card_created" => Self::CardAdded,
            "card-updated" | "card_updated" => Self::CardUpdated,
            "card-deleted" | "card_deleted" => Self::CardDeleted,
            "card-moved" | "card_moved" => Self::CardMoved,
            _ => return None,
        })
    }

    /// Name used on outbound broadcasts.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::BoardUpdated => "board-updated",
            Self::ListAdded => "list-added",
            Self::ListUpdated => "list-updated",
            Self::ListDeleted => "list-deleted",
            Self::CardAdded => "card-added",
            Self::CardUpdated => "card-updated",
            Self::CardDeleted => "card-deleted",
            Self::CardMoved => "card-moved",
        }
    }
}

/// One inbound change in canonical form. `board_id` is the board the sender
/// addressed, when it said.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    BoardUpdated { board_id: EntityId, changes: BoardChanges },
    ListAdded { board_id: Option<EntityId>, list: List },
    ListUpdated { board_id: Option<EntityId>, list_id: EntityId, changes: ListChanges },
    ListDeleted { board_id: Option<EntityId>, list_id: EntityId },
    CardAdded { board_id: Option<EntityId>, list_id: EntityId, card: Card },
    CardUpdated { board_id: Option<EntityId>, card_id: EntityId, changes: CardChanges },
    CardDeleted { board_id: Option<EntityId>, card_id: EntityId },
    CardMoved { board_id: Option<EntityId>, mv: CardMove },
}

impl SyncEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BoardUpdated { .. } => EventKind::BoardUpdated,
            Self::ListAdded { .. } => EventKind::ListAdded,
            Self::ListUpdated { .. } => EventKind::ListUpdated,
            Self::ListDeleted { .. } => EventKind::ListDeleted,
            Self::CardAdded { .. } => EventKind::CardAdded,
            Self::CardUpdated { .. } => EventKind::CardUpdated,
            Self::CardDeleted { .. } => EventKind::CardDeleted,
            Self::CardMoved { .. } => EventKind::CardMoved,
        }
    }

    /// Board the event is scoped to. Board updates address the catalogue,
    /// so they are never scoped.
    #[must_use]
    pub fn scope(&self) -> Option<&EntityId> {
        match self {
            Self::BoardUpdated { .. } => None,
            Self::ListAdded { board_id, .. }
            | Self::ListUpdated { board_id, .. }
            | Self::ListDeleted { board_id, .. }
            | Self::CardAdded { board_id, .. }
            | Self::CardUpdated { board_id, .. }
            | Self::CardDeleted { board_id, .. }
            | Self::CardMoved { board_id, .. } => board_id.as_ref(),
        }
    }

    #[must_use]
    pub fn into_patch(self) -> Patch {
        match self {
            Self::BoardUpdated { board_id, changes } => Patch::UpdateBoard { board_id, changes },
            Self::ListAdded { list, .. } => Patch::UpsertList(list),
            Self::ListUpdated { list_id, changes, .. } => Patch::UpdateList { list_id, changes },
            Self::ListDeleted { list_id, .. } => Patch::RemoveList { list_id },
            Self::CardAdded { list_id, card, .. } => Patch::UpsertCard { list_id, card },
            Self::CardUpdated { card_id, changes, .. } => Patch::UpdateCard { card_id, changes },
            Self::CardDeleted { card_id, .. } => Patch::RemoveCard { card_id },
            Self::CardMoved { mv, .. } => Patch::MoveCard(mv),
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode, normalize and apply one raw inbound frame.
///
/// Events addressed to a board other than the open one are ignored.
///
/// # Errors
///
/// Returns [`RouteError`] when the frame cannot be decoded, names an unknown
/// type, or lacks required fields. The store is untouched in every error case.
pub fn dispatch(store: &mut EntityStore, raw: &str) -> Result<Applied, RouteError> {
    let frame = frames::decode_inbound(raw)?;
    let event = normalize(&frame)?;
    tracing::debug!(kind = event.kind().wire_name(), "inbound event");
    if let Some(board_id) = event.scope()
        && store.current_board_id() != Some(board_id)
    {
        tracing::debug!(board_id = %board_id, "event for another board ignored");
        return Ok(Applied::Unchanged(Noop::UnknownBoard));
    }
    Ok(store.apply(event.into_patch(), Origin::Remote))
}

/// Map a decoded frame onto its canonical event.
///
/// # Errors
///
/// Returns [`RouteError::UnknownType`] or [`RouteError::Invalid`].
pub fn normalize(frame: &InboundFrame) -> Result<SyncEvent, RouteError> {
    let kind = EventKind::from_wire(&frame.kind).ok_or_else(|| RouteError::UnknownType(frame.kind.clone()))?;
    let body = &frame.body;
    if !body.is_object() {
        return Err(invalid(kind, "payload is not an object"));
    }
    let board_id = pick_id(body, &["boardId", "board_id"]);

    let event = match kind {
        EventKind::BoardUpdated => {
            let board_id = pick_id(body, &["id"])
                .or(board_id)
                .ok_or_else(|| invalid(kind, "missing board id"))?;
            SyncEvent::BoardUpdated {
                board_id,
                changes: BoardChanges {
                    name: pick_str(body, &["name"]),
                    description: pick_str(body, &["description"]),
                },
            }
        }
        EventKind::ListAdded => {
            let entity = nested(body, "list");
            let list = list_from_value(entity).ok_or_else(|| invalid(kind, "list needs id and name"))?;
            SyncEvent::ListAdded { board_id, list }
        }
        EventKind::ListUpdated => {
            let entity = nested(body, "list");
            let list_id = pick_id(entity, &["id"])
                .or_else(|| pick_id(body, &["listId", "list_id"]))
                .ok_or_else(|| invalid(kind, "missing list id"))?;
            let changes = ListChanges {
                name: pick_str(entity, &["name"]),
                position: field(entity, &["position"]).and_then(Value::as_i64),
            };
            SyncEvent::ListUpdated { board_id, list_id, changes }
        }
        EventKind::ListDeleted => {
            let list_id = pick_id(body, &["listId", "list_id", "id"]).ok_or_else(|| invalid(kind, "missing list id"))?;
            SyncEvent::ListDeleted { board_id, list_id }
        }
        EventKind::CardAdded => {
            let entity = nested(body, "card");
            let list_id = pick_id(body, &["listId", "list_id"])
                .or_else(|| pick_id(entity, &["listId", "list_id"]))
                .ok_or_else(|| invalid(kind, "missing list id"))?;
            let card = card_from_value(entity).ok_or_else(|| invalid(kind, "card needs id and title"))?;
            SyncEvent::CardAdded { board_id, list_id, card }
        }
        EventKind::CardUpdated => {
            let entity = nested(body, "card");
            let card_id = pick_id(entity, &["id"])
                .or_else(|| pick_id(body, &["cardId", "card_id"]))
                .ok_or_else(|| invalid(kind, "missing card id"))?;
            SyncEvent::CardUpdated { board_id, card_id, changes: card_changes(entity) }
        }
        EventKind::CardDeleted => {
            let card_id = pick_id(body, &["cardId", "card_id", "id"]).ok_or_else(|| invalid(kind, "missing card id"))?;
            SyncEvent::CardDeleted { board_id, card_id }
        }
        EventKind::CardMoved => {
            let mv = CardMove {
                source_list_id: pick_id(body, &["sourceListId", "source_list_id"])
                    .ok_or_else(|| invalid(kind, "missing source list id"))?,
                target_list_id: pick_id(body, &["targetListId", "target_list_id"])
                    .ok_or_else(|| invalid(kind, "missing target list id"))?,
                card_id: pick_id(body, &["cardId", "card_id"]).ok_or_else(|| invalid(kind, "missing card id"))?,
                new_index: field(body, &["newIndex", "new_index"])
                    .and_then(index_from_value)
                    .ok_or_else(|| invalid(kind, "missing or non-integer index"))?,
            };
            SyncEvent::CardMoved { board_id, mv }
        }
    };
    Ok(event)
}

fn invalid(kind: EventKind, reason: &'static str) -> RouteError {
    RouteError::Invalid { kind: kind.wire_name(), reason }
}

// =============================================================================
// PAYLOAD HELPERS
// =============================================================================

/// The nested entity under `key` when present, otherwise the body itself.
fn nested<'a>(body: &'a Value, key: &str) -> &'a Value {
    body.get(key).filter(|v| v.is_object()).unwrap_or(body)
}

fn field<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| body.get(*key).filter(|v| !v.is_null()))
}

fn pick_id(body: &Value, keys: &[&str]) -> Option<EntityId> {
    field(body, keys).and_then(EntityId::from_value)
}

fn pick_str(body: &Value, keys: &[&str]) -> Option<String> {
    field(body, keys).and_then(Value::as_str).map(str::to_owned)
}

/// Non-negative integers map directly; negative ones clamp to zero.
fn index_from_value(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return Some(usize::try_from(n).unwrap_or(usize::MAX));
    }
    value.as_i64().map(|_| 0)
}

fn list_from_value(value: &Value) -> Option<List> {
    let id = pick_id(value, &["id"])?;
    let name = pick_str(value, &["name"]).filter(|n| !n.is_empty())?;
    let position = field(value, &["position"]).and_then(Value::as_i64).unwrap_or(0);
    let mut list = List::new(id, name, position);
    if let Some(cards) = value.get("cards").and_then(Value::as_array) {
        list.cards = cards.iter().filter_map(card_from_value).collect();
    }
    Some(list)
}

/// Build a card from either the client shape (`dueDate`, `assignedUsers`,
/// label strings) or the API shape (`due_date`, `assignments`, label objects).
pub(crate) fn card_from_value(value: &Value) -> Option<Card> {
    let id = pick_id(value, &["id"])?;
    let title = pick_str(value, &["title"]).filter(|t| !t.is_empty())?;
    let mut card = Card::new(id, title);
    card.description = pick_str(value, &["description"]).unwrap_or_default();
    card.due_date = pick_str(value, &["dueDate", "due_date"]).and_then(|raw| parse_due_date(&raw));
    card.labels = labels_from_value(value).unwrap_or_default();
    for user in users_from_value(value).unwrap_or_default() {
        card.assign(user);
    }
    Some(card)
}

/// Fields present on a card payload, as a partial update.
fn card_changes(value: &Value) -> CardChanges {
    let due_date = ["dueDate", "due_date"]
        .iter()
        .find_map(|key| value.get(*key))
        .map(|raw| raw.as_str().and_then(parse_due_date));
    CardChanges {
        title: pick_str(value, &["title"]),
        description: pick_str(value, &["description"]),
        due_date,
        labels: labels_from_value(value),
        assignees: users_from_value(value),
    }
}

fn labels_from_value(value: &Value) -> Option<BTreeSet<String>> {
    let labels = value.get("labels")?.as_array()?;
    Some(
        labels
            .iter()
            .filter_map(|label| match label {
                Value::String(name) => Some(name.clone()),
                other => pick_str(other, &["name"]),
            })
            .collect(),
    )
}

fn users_from_value(value: &Value) -> Option<Vec<User>> {
    if let Some(users) = value.get("assignedUsers").and_then(Value::as_array) {
        return Some(users.iter().filter_map(user_from_value).collect());
    }
    let assignments = value.get("assignments")?.as_array()?;
    Some(
        assignments
            .iter()
            .map(|a| a.get("user").unwrap_or(a))
            .filter_map(user_from_value)
            .collect(),
    )
}

fn user_from_value(value: &Value) -> Option<User> {
    Some(User {
        id: pick_id(value, &["id"])?,
        name: pick_str(value, &["name", "full_name", "fullName"]).unwrap_or_default(),
        email: pick_str(value, &["email"]).unwrap_or_default(),
    })
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
