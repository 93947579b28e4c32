//! foldsync Conflict - Divergence classification and conflict resolution
//!
//! Provides:
//! - Three-way classification of a record against its last agreed state
//! - Rename detection, the only automatic resolution
//! - Conflict copy naming for keep-both
//! - Application of user resolutions through the change journal

pub mod detector;
pub mod error;
pub mod namer;
pub mod resolver;

pub use detector::{ConflictDetector, Divergence, RenameDetector, RenameMatch};
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use resolver::ConflictResolver;
