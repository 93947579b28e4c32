//! foldsync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `SyncedFolder`, `FileRecord`, `PendingOperation`, `Conflict`
//! - **Planning types** - `Plan`, `NewOperation`, `NewConflict`
//! - **Port definitions** - Traits for adapters: `IChangeJournal`, `IRemoteStore`, `ILocalFileSystem`
//! - **Configuration** - YAML config loading and validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data and rules with no I/O. Ports define
//! trait interfaces that adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;
