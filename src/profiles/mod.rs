//! Ambassador profiles.
//!
//! Every read and write first makes sure the `ambassador_profiles` table has
//! the expected columns, then talks to the row API. The schema step has no
//! rollback: when it only partly succeeds the read or write still goes ahead
//! and any resulting error is returned to the caller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::backend::{Filter, RowStore};
use crate::core::error::{decode, ServiceError, ServiceResult};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::schema_sync::{catalog, SchemaGate, SchemaReconciler};

/// One row of `ambassador_profiles`. The id is the owning user's id.
///
/// Columns without a dedicated field (education, availability, social links,
/// anything added later) travel in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbassadorProfile {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialties: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awards: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_free: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AmbassadorProfile {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    fn validate(&self) -> ServiceResult<()> {
        if let Some(fee) = self.consultation_fee {
            if !fee.is_finite() || fee < 0.0 {
                return Err(ServiceError::Validation(format!(
                    "consultation_fee must be a non-negative amount, got {fee}"
                )));
            }
        }
        if self.experience_years.is_some_and(|y| y < 0) {
            return Err(ServiceError::Validation(
                "experience_years must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Row sent to the upsert: server-owned `created_at` removed, `updated_at`
    /// stamped, free sessions carry no fee.
    fn to_row(&self, now: DateTime<Utc>) -> ServiceResult<Value> {
        let mut record = self.clone();
        record.created_at = None;
        record.updated_at = Some(now);
        if record.is_free == Some(true) {
            record.consultation_fee = Some(0.0);
        }
        record.extra.remove("created_at");

        serde_json::to_value(&record).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

pub struct ProfileService {
    store: Arc<dyn RowStore>,
    gate: SchemaGate,
}

impl ProfileService {
    pub fn new(store: Arc<dyn RowStore>, reconciler: Arc<SchemaReconciler>) -> Self {
        Self {
            store,
            gate: SchemaGate::new(reconciler, catalog::ambassador_profiles()),
        }
    }

    /// `Ok(None)` when no profile has this id.
    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<AmbassadorProfile>> {
        self.gate.ensure().await;
        match self
            .store
            .select_one(catalog::AMBASSADOR_PROFILES, &id.to_string())
            .await?
        {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }

    /// Inserts or merges on `id` and returns the stored row.
    pub async fn upsert(&self, profile: AmbassadorProfile) -> ServiceResult<AmbassadorProfile> {
        profile.validate()?;
        self.gate.ensure().await;

        let row = profile.to_row(Utc::now())?;
        let stored = self
            .store
            .upsert(catalog::AMBASSADOR_PROFILES, &row, "id")
            .await?;
        info!("Saved ambassador profile {}", profile.id);
        decode(stored)
    }

    /// Profiles currently accepting bookings.
    pub async fn browse(&self) -> ServiceResult<Vec<AmbassadorProfile>> {
        self.gate.ensure().await;
        self.store
            .select(
                catalog::AMBASSADOR_PROFILES,
                &[Filter::eq("is_available", true)],
            )
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AmbassadorProfile>, ServiceError> {
    state
        .profiles
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("ambassador profile {id}")))
}

pub async fn put_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(mut body): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, ServiceError> {
    body.insert("id".to_string(), Value::String(id.to_string()));
    let profile: AmbassadorProfile = serde_json::from_value(Value::Object(body))
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let saved = state.profiles.upsert(profile).await?;
    Ok((StatusCode::OK, Json(saved)))
}

pub async fn list_ambassadors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AmbassadorProfile>>, ServiceError> {
    Ok(Json(state.profiles.browse().await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(ApiUrls::PROFILE_BY_ID, get(get_profile).put(put_profile))
        .route(ApiUrls::AMBASSADORS, get(list_ambassadors))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::MemoryBackend;
    use serde_json::json;

    fn service(backend: &Arc<MemoryBackend>) -> ProfileService {
        let reconciler = Arc::new(SchemaReconciler::new(
            backend.clone(),
            backend.clone(),
            "public",
        ));
        ProfileService::new(backend.clone(), reconciler)
    }

    #[tokio::test]
    async fn test_get_missing_profile_is_none() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);

        assert_eq!(profiles.get(Uuid::new_v4()).await.unwrap(), None);
        assert!(backend.has_column(catalog::AMBASSADOR_PROFILES, "consultation_fee"));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_in_place() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);
        let id = Uuid::new_v4();

        let mut profile = AmbassadorProfile::new(id);
        profile.full_name = Some("Amara Obi".to_string());
        profile.languages = Some(vec!["en".to_string(), "yo".to_string()]);
        let created = profiles.upsert(profile).await.unwrap();
        assert!(created.created_at.is_some());
        assert!(created.updated_at.is_some());

        let mut edit = AmbassadorProfile::new(id);
        edit.bio = Some("Peer supporter".to_string());
        let updated = profiles.upsert(edit).await.unwrap();

        assert_eq!(backend.row_count(catalog::AMBASSADOR_PROFILES), 1);
        assert_eq!(updated.full_name.as_deref(), Some("Amara Obi"));
        assert_eq!(updated.bio.as_deref(), Some("Peer supporter"));
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_upsert_patches_columns_of_legacy_table() {
        let backend = Arc::new(MemoryBackend::new());
        backend.create_table(catalog::AMBASSADOR_PROFILES, &["id", "full_name"]);
        let profiles = service(&backend);

        let mut profile = AmbassadorProfile::new(Uuid::new_v4());
        profile.awards = Some(vec!["Community Champion".to_string()]);
        profile.is_free = Some(true);
        let saved = profiles.upsert(profile).await.unwrap();

        assert_eq!(saved.awards.unwrap().len(), 1);
        assert!(backend.has_column(catalog::AMBASSADOR_PROFILES, "awards"));
        assert!(backend.has_column(catalog::AMBASSADOR_PROFILES, "is_free"));
    }

    #[tokio::test]
    async fn test_upsert_ignores_client_created_at() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);

        let mut profile = AmbassadorProfile::new(Uuid::new_v4());
        let forged = DateTime::parse_from_rfc3339("2001-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        profile.created_at = Some(forged);
        let saved = profiles.upsert(profile).await.unwrap();

        assert_ne!(saved.created_at, Some(forged));
    }

    #[tokio::test]
    async fn test_free_profile_has_zero_fee() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);

        let mut profile = AmbassadorProfile::new(Uuid::new_v4());
        profile.is_free = Some(true);
        profile.consultation_fee = Some(40.0);
        let saved = profiles.upsert(profile).await.unwrap();

        assert_eq!(saved.consultation_fee, Some(0.0));
    }

    #[tokio::test]
    async fn test_negative_fee_is_rejected_before_any_write() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);

        let mut profile = AmbassadorProfile::new(Uuid::new_v4());
        profile.consultation_fee = Some(-5.0);
        let result = profiles.upsert(profile).await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert_eq!(backend.rpc_calls(), 0);
    }

    #[tokio::test]
    async fn test_extra_fields_round_trip() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);
        let id = Uuid::new_v4();

        let mut profile = AmbassadorProfile::new(id);
        profile
            .extra
            .insert("social_links".to_string(), json!({"site": "https://amara.example"}));
        profiles.upsert(profile).await.unwrap();

        let loaded = profiles.get(id).await.unwrap().unwrap();
        assert_eq!(
            loaded.extra.get("social_links"),
            Some(&json!({"site": "https://amara.example"}))
        );
    }

    #[tokio::test]
    async fn test_rpc_unavailable_still_reads() {
        let backend = Arc::new(MemoryBackend::new().without_rpc());
        backend.create_table(catalog::AMBASSADOR_PROFILES, &["id", "full_name"]);
        let id = Uuid::new_v4();
        backend.insert_row(
            catalog::AMBASSADOR_PROFILES,
            json!({"id": id.to_string(), "full_name": "Kofi"}),
        );
        let profiles = service(&backend);

        let loaded = profiles.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.full_name.as_deref(), Some("Kofi"));
    }

    #[tokio::test]
    async fn test_browse_lists_available_only() {
        let backend = Arc::new(MemoryBackend::new());
        let profiles = service(&backend);

        let mut open = AmbassadorProfile::new(Uuid::new_v4());
        open.is_available = Some(true);
        let mut away = AmbassadorProfile::new(Uuid::new_v4());
        away.is_available = Some(false);
        profiles.upsert(open.clone()).await.unwrap();
        profiles.upsert(away).await.unwrap();

        let listed = profiles.browse().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, open.id);
    }
}
