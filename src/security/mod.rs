pub mod cors;
pub mod sql_guard;

pub use cors::{create_cors_layer, CorsConfig};
pub use sql_guard::{quote_identifier, sanitize_identifier, validate_identifier, SqlGuardError};
