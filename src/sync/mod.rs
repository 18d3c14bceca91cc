//! Gallery synchronization engine.
//!
//! A run reconciles the persisted object graph of one album subtree with
//! what is on disk:
//!
//! - **Walk**: pre-order, deterministic listing of the subtree ([`walker`])
//! - **Reconcile**: diff of disk against the graph into an ordered plan ([`reconcile`])
//! - **Process**: new and changed files go through a [`MediaPipeline`]
//! - **Commit**: graph writes land in bounded atomic batches ([`batch`])
//! - **Publish**: progress snapshots, cancellation and the gallery lock ([`progress`])
//!
//! # Example
//!
//! ```ignore
//! use gsync::sync::{BasicPipeline, SyncOptions, Synchronizer};
//!
//! let engine = Synchronizer::new(&db_path, settings, "alice")?;
//! let synch_id = engine.start(&gallery_id, None, SyncOptions::default(), Box::new(BasicPipeline))?;
//! let status = engine.wait(&gallery_id, &synch_id)?;
//! ```

pub mod batch;
pub mod engine;
pub mod hash;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod types;
pub mod walker;

pub use batch::{GalleryStore, TransactionCoordinator};
pub use engine::Synchronizer;
pub use pipeline::{BasicPipeline, MediaPipeline, ProcessFailure, ProcessRequest, ProcessedMedia};
pub use progress::ProgressPublisher;
pub use reconcile::{Action, ReconcilePlan, Reconciler, UpdateKind};
pub use session::SyncSession;
pub use status::print_status;
pub use types::{SkipEntry, SkipList, SkipReason, SyncOptions, SyncState, SyncStats, SyncStatus};
pub use walker::{DirectoryWalker, WalkEntry, WalkItem};
