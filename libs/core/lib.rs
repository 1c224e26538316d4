// Copyright 2026 the Strand authors. MIT license.

//! Ambient-context capture and rebinding for promise-style libraries.
//!
//! A promise library fires user continuations on later turns of its event
//! loop, where the context that was active at registration is long gone.
//! This crate decorates a library's callback-bearing entry points so each
//! continuation is rebound to the context that was active when its
//! enclosing call was made: the patched method captures the active context
//! at call time, wraps the callback arguments, and delegates to the
//! original implementation unchanged.
//!
//! The target library is modeled as a [`Library`] registry of named
//! operations; [`patch`] applies the declarative [`PATCH_TABLE`] to one
//! instance, skipping entries the instance does not expose. The ambient
//! store is consumed through the [`ContextStore`] trait.

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

mod bind;
mod context;
mod error;
mod library;
mod patch_table;
mod patcher;

pub use crate::bind::Callback;
pub use crate::bind::Payload;
pub use crate::bind::RawFn;
pub use crate::bind::wrap;
pub use crate::context::Context;
pub use crate::context::ContextStack;
pub use crate::context::ContextStore;
pub use crate::context::RestoreGuard;
pub use crate::error::PatchError;
pub use crate::library::Arg;
pub use crate::library::Call;
pub use crate::library::CtorFn;
pub use crate::library::Library;
pub use crate::library::MethodFn;
pub use crate::library::MethodKind;
pub use crate::patch_table::CallbackShape;
pub use crate::patch_table::PATCH_TABLE;
pub use crate::patch_table::PatchEntry;
pub use crate::patch_table::Positions;
pub use crate::patcher::patch;
