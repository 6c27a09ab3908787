//! Columns the application expects on each table.

use serde_json::json;

use super::statement::{ColumnDefault as D, ColumnSpec, ColumnType as T, TableSpec};

pub const USERS: &str = "users";
pub const AMBASSADOR_PROFILES: &str = "ambassador_profiles";
pub const BOOKINGS: &str = "bookings";
pub const REVIEWS: &str = "reviews";

fn col(name: &str, column_type: T, default: D) -> ColumnSpec {
    ColumnSpec::new(name, column_type, default)
}

fn timestamps() -> [ColumnSpec; 2] {
    [
        col("created_at", T::Timestamptz, D::Now),
        col("updated_at", T::Timestamptz, D::Now),
    ]
}

pub fn users() -> TableSpec {
    let mut columns = vec![
        col("email", T::Text, D::None),
        col("role", T::Text, D::Text("patient".to_string())),
        col("full_name", T::Text, D::None),
        col("metadata", T::Jsonb, D::Json(json!({}))),
    ];
    columns.extend(timestamps());
    TableSpec::new(USERS, columns)
}

pub fn ambassador_profiles() -> TableSpec {
    let mut columns = vec![
        col("full_name", T::Text, D::None),
        col("bio", T::Text, D::Text(String::new())),
        col("avatar_url", T::Text, D::None),
        col("specialties", T::TextArray, D::EmptyArray),
        col("languages", T::TextArray, D::EmptyArray),
        col("awards", T::TextArray, D::EmptyArray),
        col("education", T::Jsonb, D::Json(json!([]))),
        col("experience_years", T::Integer, D::Int(0)),
        col("location", T::Text, D::None),
        col("consultation_fee", T::Numeric, D::Int(0)),
        col("is_free", T::Boolean, D::Bool(false)),
        col("is_available", T::Boolean, D::Bool(true)),
        col("availability", T::Jsonb, D::Json(json!({}))),
        col("social_links", T::Jsonb, D::Json(json!({}))),
    ];
    columns.extend(timestamps());
    TableSpec::new(AMBASSADOR_PROFILES, columns)
}

pub fn bookings() -> TableSpec {
    let mut columns = vec![
        col("patient_id", T::Uuid, D::None),
        col("ambassador_id", T::Uuid, D::None),
        col("date", T::Date, D::None),
        col("start_time", T::Time, D::None),
        col("end_time", T::Time, D::None),
        col("status", T::Text, D::Text("pending".to_string())),
        col("session_type", T::Text, D::Text("video".to_string())),
        col("notes", T::Text, D::None),
    ];
    columns.extend(timestamps());
    TableSpec::new(BOOKINGS, columns)
}

pub fn reviews() -> TableSpec {
    TableSpec::new(
        REVIEWS,
        vec![
            col("booking_id", T::Uuid, D::None),
            col("ambassador_id", T::Uuid, D::None),
            col("user_id", T::Uuid, D::None),
            col("rating", T::Integer, D::None),
            col("comment", T::Text, D::None),
            col("created_at", T::Timestamptz, D::Now),
        ],
    )
}

pub fn all() -> Vec<TableSpec> {
    vec![users(), ambassador_profiles(), bookings(), reviews()]
}

pub fn find(table: &str) -> Option<TableSpec> {
    all().into_iter().find(|t| t.name == table)
}
