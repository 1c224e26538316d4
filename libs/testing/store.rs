// Copyright 2026 the Strand authors. MIT license.

use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use strand_core::Context;
use strand_core::ContextStore;
use strand_core::RestoreGuard;

/// Reference ambient store: a stack of contexts, one frame per nested
/// scope. Test code uses the namespace-style face (`run`, `set`,
/// `active`); the engine only sees the [`ContextStore`] trait.
pub struct StackStore {
  stack: Rc<RefCell<Vec<Context>>>,
}

impl StackStore {
  pub fn new() -> Rc<StackStore> {
    Rc::new(StackStore {
      stack: Rc::new(RefCell::new(Vec::new())),
    })
  }

  /// Create a fresh context and run `f` with it active.
  pub fn run<R>(&self, f: impl FnOnce(&Context) -> R) -> R {
    let cx = Context::new();
    let _restore = self.enter(&cx);
    f(&cx)
  }

  /// The active context, or the empty sentinel.
  pub fn active(&self) -> Context {
    self.current()
  }

  pub fn depth(&self) -> usize {
    self.stack.borrow().len()
  }
}

impl ContextStore for StackStore {
  fn current(&self) -> Context {
    self
      .stack
      .borrow()
      .last()
      .cloned()
      .unwrap_or_else(Context::empty)
  }

  fn enter(&self, cx: &Context) -> RestoreGuard {
    self.stack.borrow_mut().push(cx.clone());
    let stack = self.stack.clone();
    RestoreGuard::new(move || {
      stack.borrow_mut().pop();
    })
  }

  fn set(&self, key: &str, value: Value) {
    match self.stack.borrow().last() {
      Some(cx) => cx.set(key, value),
      // Writing outside any scope would taint the shared empty sentinel.
      None => log::warn!("set {key:?} outside any context, ignored"),
    }
  }
}
