//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IChangeJournal`] - Durable store of folders, records, operations and conflicts
//! - [`IRemoteStore`] - Remote transfer API
//! - [`ILocalFileSystem`] - Local tree walking, hashing and mutation

pub mod change_journal;
pub mod local_filesystem;
pub mod remote_store;

pub use change_journal::{
    EnqueueOutcome, IChangeJournal, LocalSnapshot, Observation, ObservationReport, RecordSeed,
    RemoteSnapshot, ResolutionPlan, ResolveOutcome, RetryOutcome, Snapshot,
};
pub use local_filesystem::{FileSystemState, ILocalFileSystem, LocalEntry};
pub use remote_store::{IRemoteStore, RemoteEntry};
