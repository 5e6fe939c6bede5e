//! Ordered source list with a persisted "current" cursor.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SourceError},
    source::{Source, load_sources},
};

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    current_source_index: usize,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Result of applying a new source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The previously current source is still present (possibly moved).
    Preserved { index: usize },
    /// The previously current source disappeared; cursor reset to 0.
    Reset,
    /// The new list is empty.
    Empty,
}

/// Holds the ordered sources and the index of the current one.
///
/// The registry is a plain value; callers that share it between threads
/// wrap it in a mutex.
#[derive(Debug)]
pub struct SourceRegistry {
    sources_path: PathBuf,
    state_path: PathBuf,
    sources: Vec<Source>,
    current_index: usize,
    last_modified: Option<SystemTime>,
}

impl SourceRegistry {
    /// Loads the sources and restores the persisted cursor.
    ///
    /// An unreadable or malformed file gives an empty registry; the next
    /// change to the file is picked up by [`reload_if_changed`](Self::reload_if_changed).
    pub fn open(sources_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        let sources_path = sources_path.into();
        let state_path = state_path.into();

        let sources = load_sources(&sources_path).unwrap_or_else(|e| {
            warn!(error = %e, "Sources unusable, starting with an empty list");
            Vec::new()
        });
        let last_modified = modified_time(&sources_path);

        let mut registry = Self {
            sources_path,
            state_path,
            sources,
            current_index: 0,
            last_modified,
        };

        if let Some(index) = registry.read_state() {
            if index < registry.sources.len() {
                registry.current_index = index;
            } else {
                warn!(
                    index,
                    len = registry.sources.len(),
                    "Persisted source index out of range, starting at 0"
                );
            }
        }

        info!(
            count = registry.sources.len(),
            current = registry.current_index,
            "Source registry ready"
        );
        registry
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<Source> {
        self.sources.get(self.current_index).cloned()
    }

    /// Source following the current one, round-robin, without moving.
    pub fn peek_next(&self) -> Option<Source> {
        if self.sources.is_empty() {
            return None;
        }
        let next = (self.current_index + 1) % self.sources.len();
        self.sources.get(next).cloned()
    }

    /// Advances the cursor round-robin and persists it.
    pub fn cycle(&mut self) -> Option<Source> {
        if self.sources.is_empty() {
            return None;
        }
        self.current_index = (self.current_index + 1) % self.sources.len();
        self.persist();
        self.current()
    }

    pub fn set_current_index(&mut self, index: usize) -> Result<()> {
        if index >= self.sources.len() {
            return Err(SourceError::IndexOutOfRange {
                index,
                len: self.sources.len(),
            });
        }
        self.current_index = index;
        self.persist();
        Ok(())
    }

    pub fn select_by_id(&mut self, id: &str) -> Result<Source> {
        let index = self
            .sources
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| SourceError::UnknownId(id.to_string()))?;
        self.set_current_index(index)?;
        Ok(self.sources[index].clone())
    }

    /// Reloads the file only if its modification time advanced.
    ///
    /// Returns `None` when nothing changed.
    pub fn reload_if_changed(&mut self) -> Result<Option<ReloadOutcome>> {
        let modified = modified_time(&self.sources_path);
        let changed = match (modified, self.last_modified) {
            (Some(now), Some(seen)) => now > seen,
            (Some(_), None) => true,
            (None, Some(_)) => true,
            (None, None) => false,
        };
        if !changed {
            return Ok(None);
        }
        self.reload().map(Some)
    }

    /// Unconditionally reloads the sources file. On failure the current
    /// list is kept and the file is not retried until it changes again.
    pub fn reload(&mut self) -> Result<ReloadOutcome> {
        self.last_modified = modified_time(&self.sources_path);
        let sources = load_sources(&self.sources_path)?;
        Ok(self.apply_sources(sources))
    }

    /// Replaces the whole list, re-resolving the current source by id.
    pub fn apply_sources(&mut self, sources: Vec<Source>) -> ReloadOutcome {
        let previous_id = self.current().map(|s| s.id);
        self.sources = sources;

        let outcome = if self.sources.is_empty() {
            self.current_index = 0;
            ReloadOutcome::Empty
        } else {
            match previous_id.and_then(|id| self.sources.iter().position(|s| s.id == id)) {
                Some(index) => {
                    self.current_index = index;
                    ReloadOutcome::Preserved { index }
                }
                None => {
                    self.current_index = 0;
                    ReloadOutcome::Reset
                }
            }
        };

        info!(
            count = self.sources.len(),
            current = self.current_index,
            outcome = ?outcome,
            "Sources reloaded"
        );
        self.persist();
        outcome
    }

    fn read_state(&self) -> Option<usize> {
        let data = match fs::read_to_string(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.state_path.display(), error = %e, "Cannot read state file");
                return None;
            }
        };
        match serde_json::from_str::<PersistedState>(&data) {
            Ok(state) => Some(state.current_source_index),
            Err(e) => {
                warn!(path = %self.state_path.display(), error = %e, "Ignoring malformed state file");
                None
            }
        }
    }

    /// Writes the cursor. Failures are logged: losing the cursor only
    /// affects the next restart.
    fn persist(&self) {
        if let Err(e) = self.save_state() {
            warn!(error = %e, "Failed to persist source state");
        }
    }

    pub fn save_state(&self) -> Result<()> {
        let state = PersistedState {
            current_source_index: self.current_index,
            last_updated: Some(Utc::now()),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| SourceError::json(&self.state_path, e))?;
        fs::write(&self.state_path, json).map_err(|e| SourceError::io(&self.state_path, e))?;
        debug!(index = self.current_index, "Source state saved");
        Ok(())
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
