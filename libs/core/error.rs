// Copyright 2026 the Strand authors. MIT license.

use thiserror::Error;

/// Setup-time failures: the target library does not expose a shape the
/// patch table marks mandatory. Optional entries are skipped instead of
/// failing. Errors thrown by user callbacks are never represented here;
/// they flow through the wrappers untouched.
#[derive(Debug, Error)]
pub enum PatchError {
  #[error("library {library:?} has no promise constructor")]
  MissingConstructor { library: String },

  #[error("library {library:?} is missing required method {method:?}")]
  MissingMethod {
    library: String,
    method: &'static str,
  },
}
