//! Playable sources and the registry that cycles through them.
//!
//! Sources are read from a JSON array (order is the cycle order). The index
//! of the current source is persisted next to it so that a restart resumes
//! on the same source, and the list can be hot reloaded when the file is
//! edited while the appliance runs.

pub mod error;
pub mod registry;
pub mod source;

pub use error::{Result, SourceError};
pub use registry::{ReloadOutcome, SourceRegistry};
pub use source::{Source, SourceType, load_sources};
