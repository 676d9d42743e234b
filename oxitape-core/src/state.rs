//! Sticky stream state shared by every archive handle.
//!
//! A handle starts `Ready`. Reaching the end of an archive (reader) or
//! closing it (writer) moves it to `Finished`. The first error moves it to
//! `Failed`, after which every operation returns a clone of that error
//! without touching the stream.

use crate::error::{Result, TapeError};

/// Lifecycle of a reader or writer handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StreamState {
    /// Entries can be read or written.
    #[default]
    Ready,
    /// End of archive reached, or archive closed.
    Finished,
    /// Terminally failed with this error.
    Failed(TapeError),
}

impl StreamState {
    /// Return the stored error if the handle has failed.
    pub fn check(&self) -> Result<()> {
        match self {
            Self::Failed(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// Check if the handle is finished.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Check if the handle has failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Mark the handle finished. A failed handle stays failed.
    pub fn finish(&mut self) {
        if !self.is_failed() {
            *self = Self::Finished;
        }
    }

    /// Pass `result` through, recording its error if there is one.
    pub fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            log::debug!("archive handle failed: {}", err);
            *self = Self::Failed(err.clone());
        }
        result
    }
}
