//! upserver Library
//!
//! A file server with resumable, chunked uploads. The binary in main.rs
//! wires these modules into an axum server.
//!
//! # Modules
//!
//! - `upload`: chunked upload sessions, staging and the transfer protocol
//! - `catalog`: listing and range-aware lookup of finalized files
//! - `routes`: HTTP bindings

pub mod catalog;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod upload;

pub use config::Config;
pub use state::AppState;
