// Copyright 2026 the Strand authors. MIT license.

//! Reference collaborators and test harness for `strand_core`: a
//! stack-based ambient store, a single-threaded event loop, a small promise
//! library registered as a patchable [`strand_core::Library`], and the
//! probes the integration suites use to observe binding and context
//! restoration.

pub mod harness;
pub mod promise;
pub mod runtime;
pub mod store;
pub mod versions;

pub use crate::promise::Disposer;
pub use crate::promise::Promise;
pub use crate::promise::Reason;
pub use crate::promise::Settle;
pub use crate::promise::Settled;
pub use crate::runtime::Runtime;
pub use crate::store::StackStore;
