//! Session bookings between patients and ambassadors.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::backend::{BackendError, Filter, RowStore};
use crate::core::error::{decode, ServiceError, ServiceResult};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::schema_sync::{catalog, SchemaGate, SchemaReconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Same-state updates are allowed and change nothing.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Completed)
                | (Self::Confirmed, Self::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub ambassador_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    pub status: BookingStatus,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub patient_id: Uuid,
    pub ambassador_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewBooking {
    fn validate(&self) -> ServiceResult<()> {
        if self.patient_id == self.ambassador_id {
            return Err(ServiceError::Validation(
                "patient and ambassador must be different users".to_string(),
            ));
        }
        if let Some(end) = self.end_time {
            if end <= self.start_time {
                return Err(ServiceError::Validation(format!(
                    "end_time {end} must be after start_time {}",
                    self.start_time
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: BookingStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookingQuery {
    pub patient_id: Option<Uuid>,
    pub ambassador_id: Option<Uuid>,
}

pub struct BookingService {
    store: Arc<dyn RowStore>,
    gate: SchemaGate,
}

impl BookingService {
    pub fn new(store: Arc<dyn RowStore>, reconciler: Arc<SchemaReconciler>) -> Self {
        Self {
            store,
            gate: SchemaGate::new(reconciler, catalog::bookings()),
        }
    }

    /// New bookings always start out pending.
    pub async fn create(&self, booking: NewBooking) -> ServiceResult<Booking> {
        booking.validate()?;
        self.gate.ensure().await;

        let now = Utc::now();
        let row = json!({
            "patient_id": booking.patient_id,
            "ambassador_id": booking.ambassador_id,
            "date": booking.date,
            "start_time": booking.start_time,
            "end_time": booking.end_time,
            "status": BookingStatus::Pending,
            "session_type": booking.session_type.unwrap_or_else(|| "video".to_string()),
            "notes": booking.notes,
            "updated_at": now,
        });

        let stored: Booking = decode(self.store.insert(catalog::BOOKINGS, &row).await?)?;
        info!(
            "Booking {} created for ambassador {} on {}",
            stored.id, stored.ambassador_id, stored.date
        );
        Ok(stored)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<Booking>> {
        self.gate.ensure().await;
        match self
            .store
            .select_one(catalog::BOOKINGS, &id.to_string())
            .await?
        {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_for_patient(&self, patient_id: Uuid) -> ServiceResult<Vec<Booking>> {
        self.list(Filter::eq("patient_id", patient_id)).await
    }

    pub async fn list_for_ambassador(&self, ambassador_id: Uuid) -> ServiceResult<Vec<Booking>> {
        self.list(Filter::eq("ambassador_id", ambassador_id)).await
    }

    async fn list(&self, filter: Filter) -> ServiceResult<Vec<Booking>> {
        self.gate.ensure().await;
        let mut bookings = self
            .store
            .select(catalog::BOOKINGS, &[filter])
            .await?
            .into_iter()
            .map(decode)
            .collect::<ServiceResult<Vec<Booking>>>()?;
        bookings.sort_by_key(|b| (b.date, b.start_time));
        Ok(bookings)
    }

    pub async fn update_status(&self, id: Uuid, next: BookingStatus) -> ServiceResult<Booking> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("booking {id}")))?;

        if !current.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition(format!(
                "booking {id} cannot move from {} to {next}",
                current.status
            )));
        }
        if current.status == next {
            return Ok(current);
        }

        // Only applies while the row still has the status checked above.
        let patch = json!({ "status": next, "updated_at": Utc::now() });
        let guard = [Filter::eq("status", current.status)];
        let row = match self
            .store
            .update(catalog::BOOKINGS, &id.to_string(), &guard, &patch)
            .await
        {
            Ok(row) => row,
            Err(BackendError::NotFound(_)) => {
                return Err(ServiceError::InvalidTransition(format!(
                    "booking {id} is no longer {}, it changed while moving to {next}",
                    current.status
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let updated: Booking = decode(row)?;
        info!("Booking {} moved from {} to {}", id, current.status, next);
        Ok(updated)
    }
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewBooking>,
) -> Result<impl IntoResponse, ServiceError> {
    let booking = state.bookings.create(input).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>, ServiceError> {
    let bookings = match (query.patient_id, query.ambassador_id) {
        (Some(patient), None) => state.bookings.list_for_patient(patient).await?,
        (None, Some(ambassador)) => state.bookings.list_for_ambassador(ambassador).await?,
        _ => {
            return Err(ServiceError::Validation(
                "exactly one of patient_id or ambassador_id is required".to_string(),
            ))
        }
    };
    Ok(Json(bookings))
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, ServiceError> {
    state
        .bookings
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("booking {id}")))
}

pub async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Booking>, ServiceError> {
    Ok(Json(state.bookings.update_status(id, update.status).await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(ApiUrls::BOOKINGS, post(create_booking).get(list_bookings))
        .route(ApiUrls::BOOKING_BY_ID, get(get_booking))
        .route(ApiUrls::BOOKING_STATUS, patch(update_booking_status))
        .with_state(state)
}
