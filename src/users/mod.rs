//! Marketplace users and role-based landing pages.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::backend::RowStore;
use crate::core::error::{decode, ServiceError, ServiceResult};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::schema_sync::{catalog, SchemaGate, SchemaReconciler};

/// Unrecognised role strings fall back to the least privileged role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    #[default]
    Patient,
    Ambassador,
    Admin,
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ambassador" => Self::Ambassador,
            "admin" => Self::Admin,
            _ => Self::Patient,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Patient => "patient",
            Self::Ambassador => "ambassador",
            Self::Admin => "admin",
        })
    }
}

pub fn dashboard_path(role: Role) -> &'static str {
    match role {
        Role::Patient => "/dashboard/patient",
        Role::Ambassador => "/dashboard/ambassador",
        Role::Admin => "/admin",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// The `role` column, else `metadata.role`, else patient.
    pub fn effective_role(&self) -> Role {
        self.role
            .or_else(|| self.metadata.get("role").and_then(Value::as_str).map(Role::from))
            .unwrap_or_default()
    }
}

pub struct UserService {
    store: Arc<dyn RowStore>,
    gate: SchemaGate,
}

impl UserService {
    pub fn new(store: Arc<dyn RowStore>, reconciler: Arc<SchemaReconciler>) -> Self {
        Self {
            store,
            gate: SchemaGate::new(reconciler, catalog::users()),
        }
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<User>> {
        self.gate.ensure().await;
        match self.store.select_one(catalog::USERS, &id.to_string()).await? {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }
}

pub async fn user_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ServiceError> {
    let user = state
        .users
        .get(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user {id}")))?;
    let role = user.effective_role();

    Ok(Json(json!({
        "user_id": user.id,
        "role": role,
        "path": dashboard_path(role),
    })))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(ApiUrls::USER_DASHBOARD, get(user_dashboard))
        .with_state(state)
}
