use axum::http::{header, request::Parts, HeaderValue, Method};
use log::info;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl CorsConfig {
    pub fn production() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::OPTIONS,
            ],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "Accept".to_string(),
            ],
            max_age_secs: 7200,
        }
    }

    /// Local frontend dev servers.
    pub fn development() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_age_secs: 3600,
            ..Self::production()
        }
    }

    pub fn with_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn build(self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        let cors = if origins.is_empty() {
            CorsLayer::new().allow_origin(AllowOrigin::predicate(validate_origin))
        } else {
            CorsLayer::new().allow_origin(origins)
        };

        let headers: Vec<header::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        cors.allow_methods(self.allowed_methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(self.max_age_secs))
    }
}

/// Layer for the configured origin list; development defaults when it is empty.
pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        info!("Creating CORS layer with development defaults (no origins configured)");
        CorsConfig::development().build()
    } else {
        info!("Creating CORS layer with {} configured origins", origins.len());
        CorsConfig::production().with_origins(origins.to_vec()).build()
    }
}

fn validate_origin(origin: &HeaderValue, _request: &Parts) -> bool {
    origin.to_str().is_ok_and(is_valid_origin_format)
}

fn is_valid_origin_format(origin: &str) -> bool {
    if !origin.starts_with("http://") && !origin.starts_with("https://") {
        return false;
    }
    if origin.contains("..") || origin.matches("//").count() > 1 {
        return false;
    }

    let lower = origin.to_lowercase();
    !["<script", "javascript:", "data:", "%3c", "%3e", "\\x", "\\u"]
        .iter()
        .any(|p| lower.contains(p))
}
