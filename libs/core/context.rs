// Copyright 2026 the Strand authors. MIT license.

use indexmap::IndexMap;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An opaque handle to one logical execution scope and its key/value state.
///
/// Contexts are created and owned by the ambient store; this crate only ever
/// captures whichever one is active and re-enters it later. Identity is
/// pointer identity, with one carve-out: any context holding no keys compares
/// equal to [`Context::empty`], so "no context was active" and "an empty
/// context was active" are indistinguishable to observers.
#[derive(Clone)]
pub struct Context {
  values: Rc<RefCell<IndexMap<String, Value>>>,
}

thread_local! {
  static EMPTY: Context = Context::new();
}

impl Context {
  pub fn new() -> Self {
    Self {
      values: Rc::new(RefCell::new(IndexMap::new())),
    }
  }

  /// The stable "no context active" sentinel. One instance per thread,
  /// never recreated, so repeated checks against it are comparison-safe.
  pub fn empty() -> Context {
    EMPTY.with(Clone::clone)
  }

  pub fn is_empty(&self) -> bool {
    self.values.borrow().is_empty()
  }

  pub fn set(&self, key: &str, value: Value) {
    self.values.borrow_mut().insert(key.to_string(), value);
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.values.borrow().get(key).cloned()
  }

  /// Strict pointer identity, ignoring the empty-equals-empty rule.
  pub fn same(a: &Context, b: &Context) -> bool {
    Rc::ptr_eq(&a.values, &b.values)
  }
}

impl Default for Context {
  fn default() -> Self {
    Self::new()
  }
}

impl PartialEq for Context {
  fn eq(&self, other: &Self) -> bool {
    Context::same(self, other) || (self.is_empty() && other.is_empty())
  }
}

impl Eq for Context {}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_empty() {
      write!(f, "Context(empty)")
    } else {
      write!(f, "Context({:?})", self.values.borrow())
    }
  }
}

/// Undoes an [`ContextStore::enter`] when dropped, on every exit path
/// (return, early return, unwind).
pub struct RestoreGuard {
  restore: Option<Box<dyn FnOnce()>>,
}

impl RestoreGuard {
  pub fn new(restore: impl FnOnce() + 'static) -> Self {
    Self {
      restore: Some(Box::new(restore)),
    }
  }
}

impl Drop for RestoreGuard {
  fn drop(&mut self) {
    if let Some(restore) = self.restore.take() {
      restore();
    }
  }
}

/// The ambient store this crate consumes. Implementations own context
/// creation and the active-context stack; this crate only reads the active
/// context and re-enters previously captured ones.
pub trait ContextStore {
  /// The context active in the calling turn, or [`Context::empty`].
  fn current(&self) -> Context;

  /// Make `cx` the active context until the returned guard drops.
  fn enter(&self, cx: &Context) -> RestoreGuard;

  /// Set a key on the active context.
  fn set(&self, key: &str, value: Value);
}

/// Thin façade over the store: scoped execution under a captured context.
#[derive(Clone)]
pub struct ContextStack {
  store: Rc<dyn ContextStore>,
}

impl ContextStack {
  pub fn new(store: Rc<dyn ContextStore>) -> Self {
    Self { store }
  }

  pub fn current(&self) -> Context {
    self.store.current()
  }

  /// Run `f` with `cx` active, restoring the previous context afterwards
  /// even if `f` unwinds.
  pub fn run_with<R>(&self, cx: &Context, f: impl FnOnce() -> R) -> R {
    let _restore = self.store.enter(cx);
    f()
  }
}
