//! Presence, direct messaging and live feed relay for the SocialX web app.
//!
//! The binary in `main.rs` wires these modules behind warp; they are exposed
//! here so integration tests can drive the same filters.

pub mod auth;
pub mod config;
pub mod media;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod router;
pub mod server;
pub mod state;
pub mod store;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;
