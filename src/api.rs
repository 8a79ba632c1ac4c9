//! Authoritative REST API client.
//!
//! SYSTEM CONTEXT
//! ==============
//! The server owns every board ("project"), list and card. Each mutation the
//! session dispatches is first sent here; only a success lets the local store
//! change. [`BoardApi`] is the seam: [`HttpBoardApi`] talks to the real
//! service, tests substitute an in-process fake.
//!
//! Wire shapes are snake_case. Card responses carry `labels: [{name}]` and
//! `assignments: [{user: {id, full_name, email}}]`, flattened into [`Card`]
//! by `From<CardDto>`.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::model::{BoardSummary, Card, EntityId, List, User, parse_due_date};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("project {0} has no board")]
    NoBoardForProject(EntityId),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_API_REQUEST",
            Self::Status { .. } => "E_API_STATUS",
            Self::Decode(_) => "E_API_DECODE",
            Self::NoBoardForProject(_) => "E_API_NO_BOARD",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) | Self::NoBoardForProject(_) => false,
        }
    }
}

// =============================================================================
// RESPONSE SHAPES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ProjectDto {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<ProjectDto> for BoardSummary {
    fn from(dto: ProjectDto) -> Self {
        Self { id: dto.id, name: dto.name, description: dto.description.unwrap_or_default() }
    }
}

/// Internal board row returned by the project-to-board lookup.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BoardRefDto {
    pub id: EntityId,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct BoardDetailDto {
    #[serde(default)]
    lists: Vec<ListDto>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListDto {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub position: i64,
}

impl From<ListDto> for List {
    fn from(dto: ListDto) -> Self {
        List::new(dto.id, dto.name, dto.position)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LabelDto {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AssignedUserDto {
    pub id: EntityId,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AssignmentDto {
    pub user: AssignedUserDto,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CardDto {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelDto>,
    #[serde(default)]
    pub assignments: Vec<AssignmentDto>,
}

impl From<CardDto> for Card {
    fn from(dto: CardDto) -> Self {
        let mut card = Card::new(dto.id, dto.title);
        card.description = dto.description.unwrap_or_default();
        card.due_date = dto.due_date.as_deref().and_then(parse_due_date);
        card.labels = dto.labels.into_iter().map(|l| l.name).collect();
        for assignment in dto.assignments {
            card.assign(User {
                id: assignment.user.id,
                name: assignment.user.full_name.unwrap_or_default(),
                email: assignment.user.email.unwrap_or_default(),
            });
        }
        card
    }
}

// =============================================================================
// REQUEST SHAPES
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProjectWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListCreate {
    pub name: String,
    pub position: i64,
    pub board_id: EntityId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardCreate {
    pub title: String,
    pub description: String,
    /// ISO-8601 date-time, midnight UTC.
    pub due_date: Option<String>,
    pub position: i64,
    pub list_id: EntityId,
    pub assigned_user_id: Option<EntityId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CardUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `Some(None)` clears the date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardMoveRequest {
    pub list_id: EntityId,
    pub position: i64,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Operations consumed from the authoritative API.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<ProjectDto>, ApiError>;
    async fn get_project(&self, project_id: &EntityId) -> Result<ProjectDto, ApiError>;
    async fn create_project(&self, body: &ProjectWrite) -> Result<ProjectDto, ApiError>;
    async fn update_project(&self, project_id: &EntityId, body: &ProjectWrite) -> Result<(), ApiError>;
    async fn delete_project(&self, project_id: &EntityId) -> Result<(), ApiError>;

    /// Internal boards backing a project; the first one holds its lists.
    async fn boards_for_project(&self, project_id: &EntityId) -> Result<Vec<BoardRefDto>, ApiError>;
    async fn get_board_lists(&self, board_id: &EntityId) -> Result<Vec<ListDto>, ApiError>;
    async fn create_list(&self, body: &ListCreate) -> Result<ListDto, ApiError>;
    async fn update_list(&self, list_id: &EntityId, body: &ListUpdate) -> Result<(), ApiError>;
    async fn delete_list(&self, list_id: &EntityId) -> Result<(), ApiError>;

    async fn get_cards(&self, list_id: &EntityId) -> Result<Vec<CardDto>, ApiError>;
    async fn create_card(&self, body: &CardCreate) -> Result<CardDto, ApiError>;
    async fn update_card(&self, card_id: &EntityId, body: &CardUpdate) -> Result<(), ApiError>;
    async fn delete_card(&self, card_id: &EntityId) -> Result<(), ApiError>;
    async fn move_card(&self, card_id: &EntityId, body: &CardMoveRequest) -> Result<(), ApiError>;
}

/// Internal board id for a project.
///
/// # Errors
///
/// Returns [`ApiError::NoBoardForProject`] when the lookup comes back empty.
pub async fn resolve_board_id(api: &dyn BoardApi, project_id: &EntityId) -> Result<EntityId, ApiError> {
    api.boards_for_project(project_id)
        .await?
        .into_iter()
        .next()
        .map(|b| b.id)
        .ok_or_else(|| ApiError::NoBoardForProject(project_id.clone()))
}

/// Lists of a project, each filled with its cards. A project without a
/// board has no lists.
///
/// # Errors
///
/// Propagates any API failure.
pub async fn load_lists(api: &dyn BoardApi, project_id: &EntityId) -> Result<Vec<List>, ApiError> {
    let board_id = match resolve_board_id(api, project_id).await {
        Ok(id) => id,
        Err(ApiError::NoBoardForProject(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut lists = Vec::new();
    for dto in api.get_board_lists(&board_id).await? {
        let mut list = List::from(dto);
        list.cards = api.get_cards(&list.id).await?.into_iter().map(Card::from).collect();
        lists.push(list);
    }
    Ok(lists)
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// [`BoardApi`] over HTTP with bearer-token auth.
#[derive(Clone, Debug)]
pub struct HttpBoardApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBoardApi {
    /// # Errors
    ///
    /// Returns [`ApiError::Request`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { client, base_url, token })
    }

    /// # Errors
    ///
    /// Returns [`ApiError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ApiError> {
        Self::new(config.api_url.clone(), config.token.clone())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "api request");

        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(json) = body {
            request = request.json(&json);
        }

        let response = request.send().await?;
        let status = response.status();
        let value = response.json::<Value>().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(status_error(status, &value));
        }
        Ok(value)
    }

    async fn fetch<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, ApiError> {
        let value = self.request(method, path, body).await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn status_error(status: StatusCode, body: &Value) -> ApiError {
    let detail = match body.get("detail") {
        Some(Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => format!("HTTP {}", status.as_u16()),
    };
    ApiError::Status { status: status.as_u16(), detail }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn list_projects(&self) -> Result<Vec<ProjectDto>, ApiError> {
        self.fetch(Method::GET, "/projects/", None).await
    }

    async fn get_project(&self, project_id: &EntityId) -> Result<ProjectDto, ApiError> {
        self.fetch(Method::GET, &format!("/projects/{project_id}"), None).await
    }

    async fn create_project(&self, body: &ProjectWrite) -> Result<ProjectDto, ApiError> {
        self.fetch(Method::POST, "/projects/", Some(serde_json::to_value(body)?)).await
    }

    async fn update_project(&self, project_id: &EntityId, body: &ProjectWrite) -> Result<(), ApiError> {
        self.request(Method::PUT, &format!("/projects/{project_id}"), Some(serde_json::to_value(body)?))
            .await
            .map(drop)
    }

    async fn delete_project(&self, project_id: &EntityId) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("/projects/{project_id}"), None).await.map(drop)
    }

    async fn boards_for_project(&self, project_id: &EntityId) -> Result<Vec<BoardRefDto>, ApiError> {
        self.fetch(Method::GET, &format!("/boards/project/{project_id}"), None).await
    }

    async fn get_board_lists(&self, board_id: &EntityId) -> Result<Vec<ListDto>, ApiError> {
        let detail: BoardDetailDto = self.fetch(Method::GET, &format!("/boards/{board_id}"), None).await?;
        Ok(detail.lists)
    }

    async fn create_list(&self, body: &ListCreate) -> Result<ListDto, ApiError> {
        self.fetch(Method::POST, "/boards/lists", Some(serde_json::to_value(body)?)).await
    }

    async fn update_list(&self, list_id: &EntityId, body: &ListUpdate) -> Result<(), ApiError> {
        self.request(Method::PUT, &format!("/boards/lists/{list_id}"), Some(serde_json::to_value(body)?))
            .await
            .map(drop)
    }

    async fn delete_list(&self, list_id: &EntityId) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("/boards/lists/{list_id}"), None).await.map(drop)
    }

    async fn get_cards(&self, list_id: &EntityId) -> Result<Vec<CardDto>, ApiError> {
        self.fetch(Method::GET, &format!("/cards/list/{list_id}"), None).await
    }

    async fn create_card(&self, body: &CardCreate) -> Result<CardDto, ApiError> {
        self.fetch(Method::POST, "/cards/", Some(serde_json::to_value(body)?)).await
    }

    async fn update_card(&self, card_id: &EntityId, body: &CardUpdate) -> Result<(), ApiError> {
        self.request(Method::PUT, &format!("/cards/{card_id}"), Some(serde_json::to_value(body)?))
            .await
            .map(drop)
    }

    async fn delete_card(&self, card_id: &EntityId) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("/cards/{card_id}"), None).await.map(drop)
    }

    async fn move_card(&self, card_id: &EntityId, body: &CardMoveRequest) -> Result<(), ApiError> {
        self.request(Method::PUT, &format!("/cards/{card_id}/move"), Some(serde_json::to_value(body)?))
            .await
            .map(drop)
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
