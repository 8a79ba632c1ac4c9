//! Session: one user's view of boards, kept in sync with the server.
//!
//! SYSTEM CONTEXT
//! ==============
//! A [`Session`] owns the entity store, the connection manager, the recency
//! tracker and a handle to the authoritative API. It is the mutation
//! dispatcher: every user-facing operation goes to the API first, then
//! patches the store and broadcasts a change notification over the push
//! transport (or queues it while offline).
//!
//! DESIGN
//! ======
//! All state lives on one logical thread. The session is driven by awaiting
//! its own methods: mutations suspend only on API calls, and inbound traffic
//! is pulled with [`Session::next_event`]. Nothing here is shared across
//! tasks, so the store needs no locks.
//!
//! Failures split three ways. API errors are returned *and* reported as an
//! error [`Notice`]; the store is left untouched. Missing preconditions (no
//! open board, unknown list or card) return without effect. Transport loss is
//! absorbed by the connection manager and only reported once it gives up.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::api::{
    self, ApiError, BoardApi, CardCreate, CardMoveRequest, CardUpdate, ListCreate, ListUpdate, ProjectWrite,
};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState, Handled, SendOutcome};
use crate::error::ErrorCode;
use crate::model::{Board, BoardSummary, Card, EntityId, List, User, due_date_to_api};
use crate::recency::{KeyValueStore, RecencyTracker};
use crate::router::{self, EventKind};
use crate::store::{Applied, BoardChanges, CardChanges, CardMove, EntityStore, ListChanges, Origin, Patch};
use crate::transport::{ConnectionEvent, Connector};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// User-facing message. Presentation is up to the consumer of the notice channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// What a processed connection event did.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// An inbound frame was routed into the store.
    Inbound(Applied),
    /// An inbound frame was malformed or of an unknown type and was dropped.
    Dropped,
    /// The connection changed state.
    State(ConnectionState),
    /// Nothing observable happened.
    Idle,
}

/// Fields for a new card.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CardDraft {
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    /// Only the first assignee is sent on create.
    pub assignees: Vec<User>,
}

pub struct Session {
    config: SyncConfig,
    api: Arc<dyn BoardApi>,
    store: EntityStore,
    connection: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    recency: RecencyTracker,
    notices: mpsc::UnboundedSender<Notice>,
}

impl Session {
    /// Build a session and the receiving end of its notice channel.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn BoardApi>,
        connector: Arc<dyn Connector>,
        storage: Box<dyn KeyValueStore>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (connection, events) = ConnectionManager::new(&config, connector);
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            api,
            store: EntityStore::new(),
            connection,
            events,
            recency: RecencyTracker::load(storage),
            notices,
        };
        (session, notices_rx)
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Recently opened boards still in the catalogue, newest first.
    #[must_use]
    pub fn recent_boards(&self, limit: usize) -> Vec<BoardSummary> {
        self.recency.recent(self.store.catalogue(), limit)
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Wait for the next transport or timer event and apply it.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.events.recv().await?;
        Some(self.handle_connection_event(event))
    }

    /// Apply every event already waiting, without blocking. Returns how many ran.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_connection_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) -> SessionEvent {
        match self.connection.handle_event(event) {
            Handled::Inbound(text) => match router::dispatch(&mut self.store, &text) {
                Ok(applied) => SessionEvent::Inbound(applied),
                Err(e) => {
                    tracing::warn!(error = %e, code = e.error_code(), "inbound message dropped");
                    SessionEvent::Dropped
                }
            },
            Handled::Opened { replayed } => {
                if replayed > 0 {
                    tracing::info!(replayed, "offline changes replayed");
                }
                SessionEvent::State(ConnectionState::Connected)
            }
            Handled::Closed => SessionEvent::State(ConnectionState::Disconnected),
            Handled::Reconnecting { .. } => SessionEvent::State(ConnectionState::Reconnecting),
            Handled::Connecting => SessionEvent::State(ConnectionState::Connecting),
            Handled::Failed => {
                self.notify(
                    NoticeLevel::Error,
                    "Live updates stopped: could not reconnect to the server. Reopen the board to retry.",
                );
                SessionEvent::State(ConnectionState::Failed)
            }
            Handled::Stale | Handled::Nothing => SessionEvent::Idle,
        }
    }

    // =========================================================================
    // BOARDS
    // =========================================================================

    /// Fetch the board catalogue.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn load_boards(&mut self) -> Result<(), ApiError> {
        let projects = self.api.list_projects().await.map_err(|e| self.report("load boards", e))?;
        let rows = projects.into_iter().map(BoardSummary::from).collect();
        self.store.apply(Patch::SetCatalogue(rows), Origin::Local);
        Ok(())
    }

    /// Load a board with its lists and cards, make it current, record the
    /// access and connect the push transport.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it; the previous board stays current.
    pub async fn open_board(&mut self, board_id: &EntityId) -> Result<(), ApiError> {
        let project = self.api.get_project(board_id).await.map_err(|e| self.report("load board", e))?;
        let lists = api::load_lists(self.api.as_ref(), board_id)
            .await
            .map_err(|e| self.report("load board", e))?;

        let summary = BoardSummary::from(project);
        let mut board = Board::new(summary.id, summary.name);
        board.description = summary.description;
        board.lists = lists;
        board.sort_lists_by_position();
        let board_id = board.id.clone();
        self.store.apply(Patch::ReplaceBoard(board), Origin::Local);
        tracing::info!(board_id = %board_id, "board opened");

        if let Err(e) = self.recency.record(&board_id) {
            tracing::warn!(error = %e, code = e.error_code(), "failed to persist recent boards");
        }
        self.connect(&board_id);
        Ok(())
    }

    /// Clear the current board and close its transport normally.
    pub fn close_board(&mut self) {
        self.store.apply(Patch::CloseBoard, Origin::Local);
        self.connection.close();
    }

    /// Create a board and make it current.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn create_board(&mut self, name: &str, description: &str) -> Result<BoardSummary, ApiError> {
        let body = ProjectWrite { name: Some(name.to_owned()), description: Some(description.to_owned()) };
        let project = self.api.create_project(&body).await.map_err(|e| self.report("create board", e))?;

        let summary = BoardSummary::from(project);
        let mut board = Board::new(summary.id.clone(), summary.name.clone());
        board.description.clone_from(&summary.description);
        self.store.apply(Patch::AddBoard(board), Origin::Local);
        self.notify(NoticeLevel::Success, "Board created");
        self.connect(&summary.id);
        Ok(summary)
    }

    /// Rename or re-describe a board.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn update_board(&mut self, board_id: &EntityId, changes: BoardChanges) -> Result<(), ApiError> {
        let body = ProjectWrite { name: changes.name.clone(), description: changes.description.clone() };
        self.api
            .update_project(board_id, &body)
            .await
            .map_err(|e| self.report("update board", e))?;

        self.store.apply(
            Patch::UpdateBoard { board_id: board_id.clone(), changes: changes.clone() },
            Origin::Local,
        );
        self.notify(NoticeLevel::Success, "Board updated");
        if self.store.current_board_id() == Some(board_id) {
            let mut payload = Map::new();
            payload.insert("id".into(), json!(board_id));
            if let Some(name) = changes.name {
                payload.insert("name".into(), Value::String(name));
            }
            if let Some(description) = changes.description {
                payload.insert("description".into(), Value::String(description));
            }
            self.broadcast(EventKind::BoardUpdated, Value::Object(payload));
        }
        Ok(())
    }

    /// Delete a board. Deleting the current board closes its transport and
    /// opens the first remaining board, if any.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn delete_board(&mut self, board_id: &EntityId) -> Result<(), ApiError> {
        self.api
            .delete_project(board_id)
            .await
            .map_err(|e| self.report("delete board", e))?;

        let was_current = self.store.current_board_id() == Some(board_id);
        self.store.apply(Patch::RemoveBoard { board_id: board_id.clone() }, Origin::Local);
        self.notify(NoticeLevel::Success, "Board deleted");

        if was_current {
            self.connection.close();
            if let Some(next) = self.store.catalogue().first().map(|b| b.id.clone()) {
                if let Err(e) = self.open_board(&next).await {
                    tracing::warn!(board_id = %next, error = %e, "could not open next board");
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // LISTS
    // =========================================================================

    /// Append a list to the current board. `Ok(None)` when no board is open.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it, including
    /// [`ApiError::NoBoardForProject`].
    pub async fn add_list(&mut self, name: &str) -> Result<Option<List>, ApiError> {
        let Some(board) = self.store.current_board() else {
            tracing::debug!("add_list without an open board");
            return Ok(None);
        };
        let project_id = board.id.clone();
        let position = i64::try_from(board.lists.len()).unwrap_or(i64::MAX);

        let internal_id = api::resolve_board_id(self.api.as_ref(), &project_id)
            .await
            .map_err(|e| self.report("add list", e))?;
        let body = ListCreate { name: name.to_owned(), position, board_id: internal_id };
        let dto = self.api.create_list(&body).await.map_err(|e| self.report("add list", e))?;

        let list = List::from(dto);
        self.store.apply(Patch::UpsertList(list.clone()), Origin::Local);
        self.notify(NoticeLevel::Success, "List added");
        self.broadcast(EventKind::ListAdded, json!({ "boardId": project_id, "list": list }));
        Ok(Some(list))
    }

    /// Rename or reposition a list on the current board.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn update_list(&mut self, list_id: &EntityId, changes: ListChanges) -> Result<(), ApiError> {
        let Some(board_id) = self.board_with_list(list_id) else {
            return Ok(());
        };
        let body = ListUpdate { name: changes.name.clone(), position: changes.position };
        self.api
            .update_list(list_id, &body)
            .await
            .map_err(|e| self.report("update list", e))?;

        self.store.apply(
            Patch::UpdateList { list_id: list_id.clone(), changes: changes.clone() },
            Origin::Local,
        );
        self.notify(NoticeLevel::Success, "List updated");
        let mut list = Map::new();
        list.insert("id".into(), json!(list_id));
        if let Some(name) = changes.name {
            list.insert("name".into(), Value::String(name));
        }
        if let Some(position) = changes.position {
            list.insert("position".into(), Value::from(position));
        }
        self.broadcast(EventKind::ListUpdated, json!({ "boardId": board_id, "list": list }));
        Ok(())
    }

    /// Delete a list from the current board.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn delete_list(&mut self, list_id: &EntityId) -> Result<(), ApiError> {
        let Some(board_id) = self.board_with_list(list_id) else {
            return Ok(());
        };
        self.api.delete_list(list_id).await.map_err(|e| self.report("delete list", e))?;

        self.store.apply(Patch::RemoveList { list_id: list_id.clone() }, Origin::Local);
        self.notify(NoticeLevel::Success, "List deleted");
        self.broadcast(EventKind::ListDeleted, json!({ "boardId": board_id, "listId": list_id }));
        Ok(())
    }

    // =========================================================================
    // CARDS
    // =========================================================================

    /// Append a card to a list of the current board. `Ok(None)` when no
    /// board is open or the list is unknown.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn add_card(&mut self, list_id: &EntityId, draft: CardDraft) -> Result<Option<Card>, ApiError> {
        let Some(board_id) = self.board_with_list(list_id) else {
            return Ok(None);
        };
        let position = self
            .store
            .list(list_id)
            .map_or(0, |l| i64::try_from(l.cards.len()).unwrap_or(i64::MAX));
        let body = CardCreate {
            title: draft.title,
            description: draft.description,
            due_date: draft.due_date.map(due_date_to_api),
            position,
            list_id: list_id.clone(),
            assigned_user_id: draft.assignees.first().map(|u| u.id.clone()),
        };
        let dto = self.api.create_card(&body).await.map_err(|e| self.report("add card", e))?;

        let card = Card::from(dto);
        self.store.apply(
            Patch::UpsertCard { list_id: list_id.clone(), card: card.clone() },
            Origin::Local,
        );
        self.notify(NoticeLevel::Success, "Card added");
        self.broadcast(
            EventKind::CardAdded,
            json!({ "boardId": board_id, "listId": list_id, "card": card }),
        );
        Ok(Some(card))
    }

    /// Update a card on the current board. Title, description and due date
    /// go to the server; every provided field is merged locally.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn update_card(&mut self, card_id: &EntityId, changes: CardChanges) -> Result<(), ApiError> {
        let Some((board_id, list_id)) = self.locate_card(card_id) else {
            return Ok(());
        };
        if changes.is_empty() {
            return Ok(());
        }
        let body = CardUpdate {
            title: changes.title.clone(),
            description: changes.description.clone(),
            due_date: changes.due_date.map(|d| d.map(due_date_to_api)),
        };
        self.api
            .update_card(card_id, &body)
            .await
            .map_err(|e| self.report("update card", e))?;

        self.store.apply(
            Patch::UpdateCard { card_id: card_id.clone(), changes: changes.clone() },
            Origin::Local,
        );
        self.notify(NoticeLevel::Success, "Card updated");
        self.broadcast(
            EventKind::CardUpdated,
            json!({ "boardId": board_id, "listId": list_id, "card": card_patch_payload(card_id, &changes) }),
        );
        Ok(())
    }

    /// Delete a card from the current board.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn delete_card(&mut self, card_id: &EntityId) -> Result<(), ApiError> {
        let Some((board_id, list_id)) = self.locate_card(card_id) else {
            return Ok(());
        };
        self.api.delete_card(card_id).await.map_err(|e| self.report("delete card", e))?;

        self.store.apply(Patch::RemoveCard { card_id: card_id.clone() }, Origin::Local);
        self.notify(NoticeLevel::Success, "Card deleted");
        self.broadcast(
            EventKind::CardDeleted,
            json!({ "boardId": board_id, "listId": list_id, "cardId": card_id }),
        );
        Ok(())
    }

    /// Move a card to `new_index` of `target_list_id`, clamped to the target
    /// length. The same reorder runs for inbound `card-moved` events.
    ///
    /// # Errors
    ///
    /// Returns the API failure after reporting it.
    pub async fn move_card(
        &mut self,
        source_list_id: &EntityId,
        target_list_id: &EntityId,
        card_id: &EntityId,
        new_index: usize,
    ) -> Result<(), ApiError> {
        let Some(board_id) = self.store.current_board_id().cloned() else {
            tracing::debug!("move_card without an open board");
            return Ok(());
        };
        let in_source = self.store.list(source_list_id).is_some_and(|l| l.card_index(card_id).is_some());
        if !in_source || self.store.list(target_list_id).is_none() {
            tracing::debug!(card_id = %card_id, "move_card precondition failed");
            return Ok(());
        }

        let body = CardMoveRequest {
            list_id: target_list_id.clone(),
            position: i64::try_from(new_index).unwrap_or(i64::MAX),
        };
        self.api.move_card(card_id, &body).await.map_err(|e| self.report("move card", e))?;

        let mv = CardMove {
            source_list_id: source_list_id.clone(),
            target_list_id: target_list_id.clone(),
            card_id: card_id.clone(),
            new_index,
        };
        self.store.apply(Patch::MoveCard(mv), Origin::Local);
        self.broadcast(
            EventKind::CardMoved,
            json!({
                "boardId": board_id,
                "sourceListId": source_list_id,
                "targetListId": target_list_id,
                "cardId": card_id,
                "newIndex": new_index,
            }),
        );
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn connect(&mut self, board_id: &EntityId) {
        if let Err(e) = self.connection.connect(board_id) {
            tracing::warn!(board_id = %board_id, error = %e, code = e.error_code(), "live updates unavailable");
            self.notify(NoticeLevel::Error, format!("Live updates unavailable: {e}"));
        }
    }

    /// Current board id, if `list_id` is one of its lists.
    fn board_with_list(&self, list_id: &EntityId) -> Option<EntityId> {
        let board_id = self.store.current_board_id()?.clone();
        if self.store.list(list_id).is_none() {
            tracing::debug!(list_id = %list_id, "unknown list");
            return None;
        }
        Some(board_id)
    }

    /// Current board id and the list holding `card_id`.
    fn locate_card(&self, card_id: &EntityId) -> Option<(EntityId, EntityId)> {
        let board_id = self.store.current_board_id()?.clone();
        let Some((list, _)) = self.store.card(card_id) else {
            tracing::debug!(card_id = %card_id, "unknown card");
            return None;
        };
        Some((board_id, list.id.clone()))
    }

    fn broadcast(&mut self, kind: EventKind, payload: Value) {
        if let SendOutcome::Queued { went_offline: true } = self.connection.send(kind.wire_name(), payload) {
            self.notify(NoticeLevel::Info, "Offline: changes will sync when the connection returns");
        }
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let _ = self.notices.send(Notice { level, message: message.into() });
    }

    fn report(&self, action: &str, error: ApiError) -> ApiError {
        tracing::warn!(action, error = %error, code = error.error_code(), "api request failed");
        self.notify(NoticeLevel::Error, format!("Failed to {action}: {error}"));
        error
    }
}

/// Card fields present in `changes`, in the client card shape.
fn card_patch_payload(card_id: &EntityId, changes: &CardChanges) -> Value {
    let mut card = Map::new();
    card.insert("id".into(), json!(card_id));
    if let Some(title) = &changes.title {
        card.insert("title".into(), json!(title));
    }
    if let Some(description) = &changes.description {
        card.insert("description".into(), json!(description));
    }
    if let Some(due_date) = changes.due_date {
        card.insert("dueDate".into(), json!(due_date));
    }
    if let Some(labels) = &changes.labels {
        card.insert("labels".into(), json!(labels));
    }
    if let Some(assignees) = &changes.assignees {
        card.insert("assignedUsers".into(), json!(assignees));
    }
    Value::Object(card)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
