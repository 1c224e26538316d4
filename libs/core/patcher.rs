// Copyright 2026 the Strand authors. MIT license.

use crate::bind;
use crate::bind::Callback;
use crate::context::Context;
use crate::context::ContextStack;
use crate::context::ContextStore;
use crate::error::PatchError;
use crate::library::Arg;
use crate::library::Library;
use crate::library::MethodFn;
use crate::patch_table::CallbackShape;
use crate::patch_table::PATCH_TABLE;
use crate::patch_table::PatchEntry;
use crate::patch_table::Positions;
use std::rc::Rc;

/// Wrap every context-sensitive entry point of `library` so that user
/// callbacks observe the context that was active when their enclosing call
/// was made, no matter when the library fires them.
///
/// Idempotent: a second `patch` of the same instance is a no-op, so
/// callbacks are never double-wrapped. Table entries the library does not
/// expose are skipped; a missing constructor or primary continuation method
/// is a setup failure.
pub fn patch(store: Rc<dyn ContextStore>, library: &Library) -> Result<(), PatchError> {
  if library.is_patched() {
    log::debug!("{}: already patched, skipping", library.name());
    return Ok(());
  }

  // Validate mandatory shapes before mutating anything, so a failed setup
  // leaves the library untouched.
  if library.constructor().is_none() {
    return Err(PatchError::MissingConstructor {
      library: library.name().to_string(),
    });
  }
  for entry in PATCH_TABLE {
    if entry.required && !library.has_method(entry.owner, entry.name) {
      return Err(PatchError::MissingMethod {
        library: library.name().to_string(),
        method: entry.name,
      });
    }
  }

  let stack = ContextStack::new(store);

  intercept_constructor(&stack, library);

  for entry in PATCH_TABLE {
    let Some(original) = library.method(entry.owner, entry.name) else {
      log::debug!(
        "{}: no {:?} method {:?}, entry skipped",
        library.name(),
        entry.owner,
        entry.name
      );
      continue;
    };
    library.replace(entry.owner, entry.name, wrap_method(&stack, entry, original));
  }

  library.mark_patched();
  log::debug!("{}: patched", library.name());
  Ok(())
}

fn wrap_method(stack: &ContextStack, entry: &'static PatchEntry, original: MethodFn) -> MethodFn {
  let stack = stack.clone();
  Rc::new(move |lib: &Library, mut call| {
    // Capture before the original method runs anything: synchronous
    // pre-processing inside the library must not shift the capture.
    let capture = stack.current();
    rewrite_args(&stack, entry, &capture, &mut call.args);
    (*original)(lib, call)
  })
}

fn rewrite_args(stack: &ContextStack, entry: &'static PatchEntry, capture: &Context, args: &mut [Arg]) {
  match entry.callbacks {
    Positions::At(positions) => {
      for &pos in positions {
        if let Some(arg) = args.get_mut(pos) {
          rewrite_arg(stack, entry.shape, capture, arg);
        }
      }
    }
    Positions::Trailing => {
      if let Some(arg) = args.last_mut() {
        rewrite_arg(stack, entry.shape, capture, arg);
      }
    }
  }
}

fn rewrite_arg(stack: &ContextStack, shape: CallbackShape, capture: &Context, arg: &mut Arg) {
  match arg {
    Arg::Callback(cb) => *cb = bind::wrap(stack, cb, capture),
    Arg::List(items) if shape == CallbackShape::Array => {
      // Every callback element binds independently to the one capture.
      for item in items {
        if let Arg::Callback(cb) = item {
          *cb = bind::wrap(stack, cb, capture);
        }
      }
    }
    // Non-callback arguments pass through unmodified.
    _ => {}
  }
}

/// The constructor is special-cased: the executor runs under the context
/// active at construction time, and the resolve/reject handles it receives
/// stay unwrapped (they are settle signals, not user continuations). A
/// continuation attached later through a patched method still wins with its
/// own capture; the construction capture scopes only what the executor
/// itself runs.
fn intercept_constructor(stack: &ContextStack, library: &Library) {
  // Presence is validated up front in `patch`.
  let Some(original) = library.constructor() else {
    return;
  };
  let stack = stack.clone();
  library.replace_constructor(Rc::new(move |lib: &Library, executor: Callback| {
    let capture = stack.current();
    let executor = Callback::rescoped(&stack, &executor, &capture);
    (*original)(lib, executor)
  }));
}
