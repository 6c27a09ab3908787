//! Ratings patients leave for ambassadors.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::bookings::{BookingService, BookingStatus};
use crate::core::backend::{Filter, RowStore};
use crate::core::error::{decode, ServiceError, ServiceResult};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::schema_sync::{catalog, SchemaGate, SchemaReconciler};

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    #[serde(default)]
    pub booking_id: Option<Uuid>,
    pub ambassador_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    #[serde(default)]
    pub booking_id: Option<Uuid>,
    pub ambassador_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub count: usize,
    /// `None` when there are no reviews yet.
    pub average: Option<f64>,
}

impl RatingSummary {
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let count = reviews.len();
        let average = (count > 0)
            .then(|| reviews.iter().map(|r| f64::from(r.rating)).sum::<f64>() / count as f64);
        Self { count, average }
    }
}

pub struct ReviewService {
    store: Arc<dyn RowStore>,
    bookings: Arc<BookingService>,
    gate: SchemaGate,
}

impl ReviewService {
    pub fn new(
        store: Arc<dyn RowStore>,
        reconciler: Arc<SchemaReconciler>,
        bookings: Arc<BookingService>,
    ) -> Self {
        Self {
            store,
            bookings,
            gate: SchemaGate::new(reconciler, catalog::reviews()),
        }
    }

    pub async fn create(&self, review: NewReview) -> ServiceResult<Review> {
        if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
            return Err(ServiceError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {}",
                review.rating
            )));
        }
        if let Some(booking_id) = review.booking_id {
            self.check_booking(booking_id, &review).await?;
        }

        self.gate.ensure().await;
        let row = json!({
            "booking_id": review.booking_id,
            "ambassador_id": review.ambassador_id,
            "user_id": review.user_id,
            "rating": review.rating,
            "comment": review.comment,
        });
        let stored: Review = decode(self.store.insert(catalog::REVIEWS, &row).await?)?;
        info!(
            "Review {} ({} stars) saved for ambassador {}",
            stored.id, stored.rating, stored.ambassador_id
        );
        Ok(stored)
    }

    /// A review tied to a booking needs that session to have taken place,
    /// between the same two people, and not to be reviewed already.
    async fn check_booking(&self, booking_id: Uuid, review: &NewReview) -> ServiceResult<()> {
        let booking = self
            .bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| ServiceError::Validation(format!("booking {booking_id} does not exist")))?;

        if booking.status != BookingStatus::Completed {
            return Err(ServiceError::Validation(format!(
                "booking {booking_id} is {}, only completed sessions can be reviewed",
                booking.status
            )));
        }
        if booking.ambassador_id != review.ambassador_id || booking.patient_id != review.user_id {
            return Err(ServiceError::Validation(format!(
                "booking {booking_id} does not belong to this patient and ambassador"
            )));
        }

        self.gate.ensure().await;
        let existing = self
            .store
            .select(catalog::REVIEWS, &[Filter::eq("booking_id", booking_id)])
            .await?;
        if !existing.is_empty() {
            return Err(ServiceError::Validation(format!(
                "booking {booking_id} has already been reviewed"
            )));
        }
        Ok(())
    }

    pub async fn list_for_ambassador(&self, ambassador_id: Uuid) -> ServiceResult<Vec<Review>> {
        self.gate.ensure().await;
        let mut reviews = self
            .store
            .select(catalog::REVIEWS, &[Filter::eq("ambassador_id", ambassador_id)])
            .await?
            .into_iter()
            .map(decode)
            .collect::<ServiceResult<Vec<Review>>>()?;
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    pub async fn summary_for_ambassador(&self, ambassador_id: Uuid) -> ServiceResult<RatingSummary> {
        let reviews = self.list_for_ambassador(ambassador_id).await?;
        Ok(RatingSummary::from_reviews(&reviews))
    }
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewReview>,
) -> Result<impl IntoResponse, ServiceError> {
    let review = state.reviews.create(input).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn list_ambassador_reviews(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let reviews = state.reviews.list_for_ambassador(id).await?;
    let summary = RatingSummary::from_reviews(&reviews);
    Ok(Json(json!({ "summary": summary, "reviews": reviews })))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(ApiUrls::REVIEWS, post(create_review))
        .route(ApiUrls::AMBASSADOR_REVIEWS, get(list_ambassador_reviews))
        .with_state(state)
}
