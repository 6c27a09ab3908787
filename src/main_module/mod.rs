//! Binary-facing surfaces: the HTTP server and the command line.

mod admin;
pub mod cli;
mod health;
mod server;

pub use admin::*;
pub use health::*;
pub use server::*;
