use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Application Schemas ---

/// Content
///
/// The CRUD entity. Identity is the `id`; the repository guarantees at most one
/// record per id. Only `name` is mutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Content {
    pub id: String,
    pub name: String,
}

impl Content {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// --- Request Payloads (Input Schemas) ---

/// CreateContentRequest
///
/// Input payload for `POST /content`. The `id` is optional: when absent or empty the
/// service assigns a UUID before the record reaches the repository. Any other id is
/// stored exactly as sent.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateContentRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

impl CreateContentRequest {
    pub fn into_content(self) -> Content {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Content { id, name: self.name }
    }
}

/// UpdateContentRequest
///
/// Input payload for `PUT /content/{id}`. Any `id` in the body is ignored; the path wins.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateContentRequest {
    pub name: String,
}

/// Credentials
///
/// Login payload for the session-token scheme (`POST /login`).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// ErrorBody
///
/// Shape of every error response: `{"error": "<message>"}`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
