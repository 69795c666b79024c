use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpListener, sync::RwLock};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateWidget {
    pub name: String,
}

#[derive(Deserialize)]
pub struct PatchWidget {
    pub name: Option<String>,
}

/// Error body in the shape clients normalize to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl ErrorBody {
    pub fn not_found() -> Self {
        Self {
            message: "not found".to_string(),
            code: "NOT_FOUND".to_string(),
            status_code: 404,
        }
    }

    /// Rejected input, answered with 422.
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: "VALIDATION".to_string(),
            status_code: 422,
        }
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// What `/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Longest widget name the server accepts.
pub const MAX_NAME_LEN: usize = 64;

/// In-memory widget table. Every mutation goes through a method that
/// validates first and reports failures as `ErrorBody`.
#[derive(Default)]
pub struct Store {
    next_id: u64,
    widgets: BTreeMap<u64, Widget>,
}

impl Store {
    pub fn list(&self) -> Vec<Widget> {
        self.widgets.values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Result<Widget, ErrorBody> {
        self.widgets.get(&id).cloned().ok_or_else(ErrorBody::not_found)
    }

    pub fn create(&mut self, name: String) -> Result<Widget, ErrorBody> {
        let name = valid_name(name)?;
        self.next_id += 1;
        let widget = Widget { id: self.next_id, name };
        self.widgets.insert(widget.id, widget.clone());
        Ok(widget)
    }

    /// Stores `widget` under its own id, replacing any previous one.
    pub fn upsert(&mut self, widget: Widget) -> Result<Widget, ErrorBody> {
        if widget.id == 0 {
            return Err(ErrorBody::validation("id must be positive"));
        }
        let widget = Widget { name: valid_name(widget.name)?, ..widget };
        self.next_id = self.next_id.max(widget.id);
        self.widgets.insert(widget.id, widget.clone());
        Ok(widget)
    }

    pub fn rename(&mut self, id: u64, name: Option<String>) -> Result<Widget, ErrorBody> {
        let name = name.map(valid_name).transpose()?;
        let widget = self.widgets.get_mut(&id).ok_or_else(ErrorBody::not_found)?;
        if let Some(name) = name {
            widget.name = name;
        }
        Ok(widget.clone())
    }

    pub fn remove(&mut self, id: u64) -> Result<Widget, ErrorBody> {
        self.widgets.remove(&id).ok_or_else(ErrorBody::not_found)
    }
}

fn valid_name(name: String) -> Result<String, ErrorBody> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ErrorBody::validation("name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ErrorBody::validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route(
            "/widgets",
            get(list_widgets).post(create_widget).put(upsert_widget),
        )
        .route(
            "/widgets/{id}",
            get(get_widget).patch(patch_widget).delete(delete_widget),
        )
        .route("/echo", any(echo))
        .route("/status/{code}", get(status))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_widgets(State(db): State<Db>) -> Json<Vec<Widget>> {
    Json(db.read().await.list())
}

async fn create_widget(
    State(db): State<Db>,
    Json(input): Json<CreateWidget>,
) -> Result<(StatusCode, Json<Widget>), ErrorBody> {
    let widget = db.write().await.create(input.name)?;
    tracing::debug!(id = widget.id, "created widget");
    Ok((StatusCode::CREATED, Json(widget)))
}

async fn upsert_widget(
    State(db): State<Db>,
    Json(input): Json<Widget>,
) -> Result<Json<Widget>, ErrorBody> {
    db.write().await.upsert(input).map(Json)
}

async fn get_widget(State(db): State<Db>, Path(id): Path<u64>) -> Result<Json<Widget>, ErrorBody> {
    db.read().await.get(id).map(Json)
}

async fn patch_widget(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<PatchWidget>,
) -> Result<Json<Widget>, ErrorBody> {
    db.write().await.rename(id, input.name).map(Json)
}

async fn delete_widget(State(db): State<Db>, Path(id): Path<u64>) -> Result<StatusCode, ErrorBody> {
    let removed = db.write().await.remove(id)?;
    tracing::debug!(id = removed.id, "deleted widget");
    Ok(StatusCode::NO_CONTENT)
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    Json(Echo {
        method: method.to_string(),
        headers,
        body,
    })
}

/// Replies with `code` and an empty body.
async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}
