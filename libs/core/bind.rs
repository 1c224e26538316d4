// Copyright 2026 the Strand authors. MIT license.

use crate::context::Context;
use crate::context::ContextStack;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Opaque payload crossing the patch boundary. The engine forwards payloads
/// untouched in both directions; only the target library interprets them.
pub type Payload = Rc<dyn Any>;

/// Uniform calling convention for user callbacks: dynamic arguments in,
/// fulfilled-or-thrown payload out.
pub type RawFn = dyn Fn(&[Payload]) -> Result<Payload, Payload>;

/// Bind bookkeeping carried by the callback value itself. Every clone and
/// every wrapper of one logical callback shares the same record, so the
/// state survives the callback being handed across module boundaries. No
/// central registry exists; the record dies with the callback.
#[derive(Default)]
struct BindState {
  marks: RefCell<Vec<Context>>,
}

impl BindState {
  fn mark(&self, cx: &Context) {
    self.marks.borrow_mut().push(cx.clone());
  }
}

/// A user callback plus its bind record.
#[derive(Clone)]
pub struct Callback {
  f: Rc<RawFn>,
  bind: Rc<BindState>,
  /// Present on wrappers produced by [`wrap`]: the capture context this
  /// value already binds. Lets the patcher suppress re-entrant re-wrapping
  /// when a bound callback transits nested patched calls.
  wrapped_for: Option<Context>,
}

impl Callback {
  pub fn new(f: impl Fn(&[Payload]) -> Result<Payload, Payload> + 'static) -> Self {
    Self {
      f: Rc::new(f),
      bind: Rc::new(BindState::default()),
      wrapped_for: None,
    }
  }

  pub fn call(&self, args: &[Payload]) -> Result<Payload, Payload> {
    (*self.f)(args)
  }

  /// Contexts this callback has been bound to, in the order the bindings
  /// took effect. Empty until a wrapper actually fires: a callback invoked
  /// synchronously, in the turn it was registered, never shows a binding.
  pub fn bindings(&self) -> Vec<Context> {
    self.bind.marks.borrow().clone()
  }

  pub fn binding_count(&self) -> usize {
    self.bind.marks.borrow().len()
  }

  fn is_wrapped_for(&self, cx: &Context) -> bool {
    self
      .wrapped_for
      .as_ref()
      .is_some_and(|prev| Context::same(prev, cx))
  }

  /// A wrapper that re-enters `cx` around the callback without recording a
  /// binding. Only the constructor interceptor uses this: an executor runs
  /// in the turn it was supplied, so it must not appear bound.
  pub fn rescoped(stack: &ContextStack, cb: &Callback, cx: &Context) -> Callback {
    let inner = cb.clone();
    let stack = stack.clone();
    let capture = cx.clone();
    Callback {
      f: Rc::new(move |args| stack.run_with(&capture, || inner.call(args))),
      bind: cb.bind.clone(),
      wrapped_for: None,
    }
  }
}

/// Produce a callback bound to `cx`: when fired it records the binding and
/// runs the original under the captured context, forwarding the returned
/// payload or error unchanged.
///
/// The binding is recorded once per wrap operation, on the wrapper's first
/// fire: a collection handler invoked once per element still shows a single
/// binding. Wrapping an already-bound callback with the identity-same
/// capture context returns it as-is, so a callback flowing through nested
/// patched calls that share one capture point is never double-wrapped. A
/// distinct capture context wraps again; the added binding is additive and
/// shows up in [`Callback::bindings`] in fire order.
pub fn wrap(stack: &ContextStack, cb: &Callback, cx: &Context) -> Callback {
  if cb.is_wrapped_for(cx) {
    return cb.clone();
  }
  let inner = cb.clone();
  let stack = stack.clone();
  let capture = cx.clone();
  let bind = cb.bind.clone();
  let marked = std::cell::Cell::new(false);
  Callback {
    f: Rc::new(move |args| {
      if !marked.replace(true) {
        bind.mark(&capture);
      }
      stack.run_with(&capture, || inner.call(args))
    }),
    bind: cb.bind.clone(),
    wrapped_for: Some(cx.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::ContextStore;
  use crate::context::RestoreGuard;
  use serde_json::Value;
  use serde_json::json;

  struct TestStore {
    active: Rc<RefCell<Vec<Context>>>,
  }

  impl TestStore {
    fn new() -> Rc<Self> {
      Rc::new(Self {
        active: Rc::new(RefCell::new(Vec::new())),
      })
    }
  }

  impl ContextStore for TestStore {
    fn current(&self) -> Context {
      self.active.borrow().last().cloned().unwrap_or_else(Context::empty)
    }

    fn enter(&self, cx: &Context) -> RestoreGuard {
      self.active.borrow_mut().push(cx.clone());
      let active = self.active.clone();
      RestoreGuard::new(move || {
        active.borrow_mut().pop();
      })
    }

    fn set(&self, key: &str, value: Value) {
      self.current().set(key, value);
    }
  }

  fn labeled(label: &str) -> Context {
    let cx = Context::new();
    cx.set("_id", json!(label));
    cx
  }

  #[test]
  fn raw_callback_has_no_bindings() {
    let cb = Callback::new(|_| Ok(Rc::new(())));
    cb.call(&[]).ok();
    assert_eq!(cb.binding_count(), 0);
  }

  #[test]
  fn wrapper_marks_once_per_fire_and_restores_context() {
    let stack = ContextStack::new(TestStore::new());
    let cx = labeled("a");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let inner_stack = stack.clone();
    let cb = Callback::new(move |_| {
      seen2.borrow_mut().push(inner_stack.current());
      Ok(Rc::new(()))
    });

    let bound = wrap(&stack, &cb, &cx);
    assert_eq!(cb.binding_count(), 0);

    bound.call(&[]).ok();
    assert_eq!(cb.binding_count(), 1);
    assert!(Context::same(&cb.bindings()[0], &cx));
    assert!(Context::same(&seen.borrow()[0], &cx));
    // Context restored after the fire.
    assert_eq!(stack.current(), Context::empty());

    // Firing again reuses the binding: one wrap, one bind record.
    bound.call(&[]).ok();
    assert_eq!(cb.binding_count(), 1);
    assert!(Context::same(&seen.borrow()[1], &cx));
  }

  #[test]
  fn rewrap_with_same_capture_is_suppressed() {
    let stack = ContextStack::new(TestStore::new());
    let cx = labeled("a");
    let cb = Callback::new(|_| Ok(Rc::new(())));

    let once = wrap(&stack, &cb, &cx);
    let twice = wrap(&stack, &once, &cx);
    twice.call(&[]).ok();
    assert_eq!(cb.binding_count(), 1);
  }

  #[test]
  fn rewrap_with_distinct_capture_is_additive() {
    let stack = ContextStack::new(TestStore::new());
    let a = labeled("a");
    let b = labeled("b");
    let cb = Callback::new(|_| Ok(Rc::new(())));

    let outer = wrap(&stack, &wrap(&stack, &cb, &a), &b);
    outer.call(&[]).ok();
    // Outer binding takes effect first, then the inner one.
    let marks = cb.bindings();
    assert_eq!(marks.len(), 2);
    assert!(Context::same(&marks[0], &b));
    assert!(Context::same(&marks[1], &a));
  }

  #[test]
  fn wrapper_forwards_results_and_errors_unchanged() {
    let stack = ContextStack::new(TestStore::new());
    let cx = labeled("a");

    let ok = Callback::new(|_| Ok(Rc::new(json!(42))));
    let out = wrap(&stack, &ok, &cx).call(&[]).unwrap();
    assert_eq!(*out.downcast_ref::<Value>().unwrap(), json!(42));

    let err = Callback::new(|_| Err(Rc::new(json!("boom"))));
    let out = wrap(&stack, &err, &cx).call(&[]).unwrap_err();
    assert_eq!(*out.downcast_ref::<Value>().unwrap(), json!("boom"));
  }

  #[test]
  fn rescoped_restores_context_without_marking() {
    let store = TestStore::new();
    let stack = ContextStack::new(store);
    let cx = labeled("ctor");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let inner_stack = stack.clone();
    let cb = Callback::new(move |_| {
      seen2.borrow_mut().push(inner_stack.current());
      Ok(Rc::new(()))
    });

    Callback::rescoped(&stack, &cb, &cx).call(&[]).ok();
    assert!(Context::same(&seen.borrow()[0], &cx));
    assert_eq!(cb.binding_count(), 0);
  }
}
