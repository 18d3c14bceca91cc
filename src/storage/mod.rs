//! SQLite storage layer for the gallery object graph.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode so status readers never block the running synchronization
//! - Transaction discipline for atomic batch writes
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod events;
pub mod schema;
pub mod sqlite;

pub use sqlite::{GallerySnapshot, GraphWrite, LockLease, MutationContext, SqliteStorage};
