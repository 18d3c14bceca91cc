//! Gallery synchronization engine.
//!
//! This crate keeps a persisted gallery object graph (albums and media
//! objects) in step with the directory tree it was built from, and provides
//! the `gsync` CLI on top of it.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (Gallery, AlbumNode, MediaObjectRecord)
//! - [`storage`] - SQLite persistence of the object graph
//! - [`sync`] - Walker, reconciler, batching, run sessions and progress
//! - [`config`] - Path resolution and engine settings
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
