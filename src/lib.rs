pub mod bookings;
pub mod core;
pub mod main_module;
pub mod profiles;
pub mod reviews;
pub mod schema_sync;
pub mod security;
pub mod users;
