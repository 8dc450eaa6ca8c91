//! Disparo Storage - PostgreSQL persistence for the dispatch platform
//!
//! This crate owns the relational schema, the typed row models and the
//! repository layer used by the engine and the HTTP API.

pub mod db;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use models::*;
pub use repository::*;
