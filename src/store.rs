//! In-memory entity store: board catalogue plus the open board's list/card tree.
//!
//! SYSTEM CONTEXT
//! ==============
//! The store is written from two places: the mutation dispatcher (after the
//! authoritative API call succeeds) and the message router (for pushes from
//! other clients). Both express their change as a [`Patch`] and go through
//! [`EntityStore::apply`], so the two paths cannot drift apart.
//!
//! DESIGN
//! ======
//! - No I/O and no suspension points; `apply` is a plain synchronous call.
//! - Each applied patch bumps a store-wide revision and stamps it onto every
//!   entity it wrote. Patches are applied strictly in arrival order, so the
//!   entity with the highest `rev` reflects the last write observed
//!   (last-write-wins at patch granularity, no merging).
//! - Creation patches are idempotent by id; removal of an absent id is a no-op.
//! - A card id lives in at most one list. Upserts that would break this are
//!   rejected as duplicates.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::{Board, BoardSummary, Card, EntityId, List, User};

// =============================================================================
// PATCHES
// =============================================================================

/// Where a patch came from. Only used for diagnostics; both origins are
/// applied identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Produced by this client after a successful API call.
    Local,
    /// Received from the push transport.
    Remote,
}

/// Partial board update. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Partial list update. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListChanges {
    pub name: Option<String>,
    pub position: Option<i64>,
}

/// Partial card update. `None` fields are left untouched; `due_date:
/// Some(None)` clears the date.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CardChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<Option<NaiveDate>>,
    pub labels: Option<BTreeSet<String>>,
    pub assignees: Option<Vec<User>>,
}

impl CardChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.labels.is_none()
            && self.assignees.is_none()
    }

    fn apply_to(&self, card: &mut Card) {
        if let Some(title) = &self.title {
            card.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            card.description.clone_from(description);
        }
        if let Some(due_date) = self.due_date {
            card.due_date = due_date;
        }
        if let Some(labels) = &self.labels {
            card.labels.clone_from(labels);
        }
        if let Some(assignees) = &self.assignees {
            card.assignees.clear();
            for user in assignees {
                card.assign(user.clone());
            }
        }
    }
}

/// Relocation of one card, shared by the local dispatcher and the router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardMove {
    pub source_list_id: EntityId,
    pub target_list_id: EntityId,
    pub card_id: EntityId,
    /// Desired index in the target list; clamped to `[0, len]` on apply.
    pub new_index: usize,
}

/// A single structural change to the store.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    /// Replace the board catalogue wholesale.
    SetCatalogue(Vec<BoardSummary>),
    /// A freshly created board: add it to the catalogue and make it current.
    AddBoard(Board),
    /// Replace the open board with a freshly loaded tree.
    ReplaceBoard(Board),
    UpdateBoard { board_id: EntityId, changes: BoardChanges },
    /// Drop a board from the catalogue, closing it if it is open.
    RemoveBoard { board_id: EntityId },
    /// Forget the open board.
    CloseBoard,
    UpsertList(List),
    UpdateList { list_id: EntityId, changes: ListChanges },
    RemoveList { list_id: EntityId },
    UpsertCard { list_id: EntityId, card: Card },
    UpdateCard { card_id: EntityId, changes: CardChanges },
    RemoveCard { card_id: EntityId },
    MoveCard(CardMove),
}

/// Result of applying a patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The store changed; `revision` was stamped on the written entities.
    Changed { revision: u64 },
    /// Nothing changed, for the given reason.
    Unchanged(Noop),
}

impl Applied {
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Why a patch left the store untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Noop {
    /// No board is open.
    NoBoard,
    /// The named board is neither open nor in the catalogue.
    UnknownBoard,
    UnknownList,
    UnknownCard,
    /// An entity with the same id already exists.
    Duplicate,
}

// =============================================================================
// STORE
// =============================================================================

/// Owner of all board/list/card state for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityStore {
    catalogue: Vec<BoardSummary>,
    current: Option<Board>,
    revision: u64,
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision of the last applied patch (0 before any change).
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn catalogue(&self) -> &[BoardSummary] {
        &self.catalogue
    }

    #[must_use]
    pub fn current_board(&self) -> Option<&Board> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn current_board_id(&self) -> Option<&EntityId> {
        self.current.as_ref().map(|b| &b.id)
    }

    #[must_use]
    pub fn list(&self, list_id: &EntityId) -> Option<&List> {
        self.current.as_ref()?.lists.iter().find(|l| &l.id == list_id)
    }

    /// Find a card anywhere on the open board, with the list that holds it.
    #[must_use]
    pub fn card(&self, card_id: &EntityId) -> Option<(&List, &Card)> {
        self.current
            .as_ref()?
            .lists
            .iter()
            .find_map(|l| l.cards.iter().find(|c| &c.id == card_id).map(|c| (l, c)))
    }

    /// Apply one patch, stamping a new revision on success.
    pub fn apply(&mut self, patch: Patch, origin: Origin) -> Applied {
        let revision = self.revision + 1;
        let result = match patch {
            Patch::SetCatalogue(rows) => {
                self.catalogue = rows;
                Ok(())
            }
            Patch::AddBoard(board) => {
                self.add_board(board, revision);
                Ok(())
            }
            Patch::ReplaceBoard(board) => {
                self.replace_board(board, revision);
                Ok(())
            }
            Patch::UpdateBoard { board_id, changes } => self.update_board(&board_id, &changes, revision),
            Patch::RemoveBoard { board_id } => self.remove_board(&board_id),
            Patch::CloseBoard => self.current.take().map(|_| ()).ok_or(Noop::NoBoard),
            Patch::UpsertList(list) => self.board_mut().and_then(|b| upsert_list(b, list, revision)),
            Patch::UpdateList { list_id, changes } => {
                self.board_mut().and_then(|b| update_list(b, &list_id, &changes, revision))
            }
            Patch::RemoveList { list_id } => self.board_mut().and_then(|b| remove_list(b, &list_id)),
            Patch::UpsertCard { list_id, card } => {
                self.board_mut().and_then(|b| upsert_card(b, &list_id, card, revision))
            }
            Patch::UpdateCard { card_id, changes } => {
                self.board_mut().and_then(|b| update_card(b, &card_id, &changes, revision))
            }
            Patch::RemoveCard { card_id } => self.board_mut().and_then(|b| remove_card(b, &card_id, revision)),
            Patch::MoveCard(mv) => self.board_mut().and_then(|b| move_card(b, &mv, revision)),
        };

        match result {
            Ok(()) => {
                self.revision = revision;
                tracing::debug!(revision, ?origin, "store patch applied");
                Applied::Changed { revision }
            }
            Err(noop) => {
                tracing::debug!(?noop, ?origin, "store patch ignored");
                Applied::Unchanged(noop)
            }
        }
    }

    fn board_mut(&mut self) -> Result<&mut Board, Noop> {
        self.current.as_mut().ok_or(Noop::NoBoard)
    }

    fn add_board(&mut self, mut board: Board, revision: u64) {
        board.rev = revision;
        if !self.catalogue.iter().any(|s| s.id == board.id) {
            self.catalogue.push(board.summary());
        }
        self.current = Some(board);
    }

    fn replace_board(&mut self, mut board: Board, revision: u64) {
        board.rev = revision;
        if let Some(row) = self.catalogue.iter_mut().find(|s| s.id == board.id) {
            *row = board.summary();
        }
        self.current = Some(board);
    }

    fn update_board(&mut self, board_id: &EntityId, changes: &BoardChanges, revision: u64) -> Result<(), Noop> {
        let mut found = false;
        if let Some(row) = self.catalogue.iter_mut().find(|s| &s.id == board_id) {
            if let Some(name) = &changes.name {
                row.name.clone_from(name);
            }
            if let Some(description) = &changes.description {
                row.description.clone_from(description);
            }
            found = true;
        }
        if let Some(board) = self.current.as_mut().filter(|b| &b.id == board_id) {
            if let Some(name) = &changes.name {
                board.name.clone_from(name);
            }
            if let Some(description) = &changes.description {
                board.description.clone_from(description);
            }
            board.rev = revision;
            found = true;
        }
        if found { Ok(()) } else { Err(Noop::UnknownBoard) }
    }

    fn remove_board(&mut self, board_id: &EntityId) -> Result<(), Noop> {
        let before = self.catalogue.len();
        self.catalogue.retain(|s| &s.id != board_id);
        let mut removed = self.catalogue.len() != before;
        if self.current.as_ref().is_some_and(|b| &b.id == board_id) {
            self.current = None;
            removed = true;
        }
        if removed { Ok(()) } else { Err(Noop::UnknownBoard) }
    }
}

// =============================================================================
// TREE MUTATORS
// =============================================================================

fn list_index(board: &Board, list_id: &EntityId) -> Result<usize, Noop> {
    board.lists.iter().position(|l| &l.id == list_id).ok_or(Noop::UnknownList)
}

fn card_location(board: &Board, card_id: &EntityId) -> Option<(usize, usize)> {
    board
        .lists
        .iter()
        .enumerate()
        .find_map(|(li, l)| l.card_index(card_id).map(|ci| (li, ci)))
}

fn upsert_list(board: &mut Board, mut list: List, revision: u64) -> Result<(), Noop> {
    if board.lists.iter().any(|l| l.id == list.id) {
        return Err(Noop::Duplicate);
    }
    let mut seen = BTreeSet::new();
    list.cards.retain(|c| card_location(board, &c.id).is_none() && seen.insert(c.id.clone()));
    for card in &mut list.cards {
        card.rev = revision;
    }
    list.rev = revision;
    board.lists.push(list);
    Ok(())
}

fn update_list(board: &mut Board, list_id: &EntityId, changes: &ListChanges, revision: u64) -> Result<(), Noop> {
    let idx = list_index(board, list_id)?;
    let list = &mut board.lists[idx];
    if let Some(name) = &changes.name {
        list.name.clone_from(name);
    }
    if let Some(position) = changes.position {
        list.position = position;
    }
    list.rev = revision;
    Ok(())
}

fn remove_list(board: &mut Board, list_id: &EntityId) -> Result<(), Noop> {
    let idx = list_index(board, list_id)?;
    board.lists.remove(idx);
    Ok(())
}

fn upsert_card(board: &mut Board, list_id: &EntityId, mut card: Card, revision: u64) -> Result<(), Noop> {
    let idx = list_index(board, list_id)?;
    if card_location(board, &card.id).is_some() {
        return Err(Noop::Duplicate);
    }
    card.rev = revision;
    let list = &mut board.lists[idx];
    list.cards.push(card);
    list.rev = revision;
    Ok(())
}

fn update_card(board: &mut Board, card_id: &EntityId, changes: &CardChanges, revision: u64) -> Result<(), Noop> {
    let (li, ci) = card_location(board, card_id).ok_or(Noop::UnknownCard)?;
    let card = &mut board.lists[li].cards[ci];
    changes.apply_to(card);
    card.rev = revision;
    Ok(())
}

fn remove_card(board: &mut Board, card_id: &EntityId, revision: u64) -> Result<(), Noop> {
    let (li, ci) = card_location(board, card_id).ok_or(Noop::UnknownCard)?;
    let list = &mut board.lists[li];
    list.cards.remove(ci);
    list.rev = revision;
    Ok(())
}

/// Remove the card from the source list and insert it into the target list at
/// the clamped index. Same-list moves are a pure reorder. A card missing from
/// the source list, or a missing target list, leaves everything in place.
fn move_card(board: &mut Board, mv: &CardMove, revision: u64) -> Result<(), Noop> {
    let src = list_index(board, &mv.source_list_id)?;
    let tgt = list_index(board, &mv.target_list_id)?;
    let ci = board.lists[src].card_index(&mv.card_id).ok_or(Noop::UnknownCard)?;

    let mut card = board.lists[src].cards.remove(ci);
    card.rev = revision;
    board.lists[src].rev = revision;

    let target = &mut board.lists[tgt];
    let at = mv.new_index.min(target.cards.len());
    target.cards.insert(at, card);
    target.rev = revision;
    Ok(())
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
