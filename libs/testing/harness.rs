// Copyright 2026 the Strand authors. MIT license.

//! Instrumented handlers and assertion helpers shared by the integration
//! suites. A [`ProbeHandler`] stands in for a user continuation: it records
//! every fire (turn, active context, payload), and its bind record is read
//! back through the callback itself.

use crate::promise;
use crate::promise::Promise;
use crate::promise::Reason;
use crate::promise::as_settle;
use crate::promise::reason_payload;
use crate::promise::unit_payload;
use crate::promise::value_payload;
use crate::runtime::Runtime;
use crate::store::StackStore;
use anyhow::Result;
use anyhow::bail;
use serde_json::Value;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use strand_core::Arg;
use strand_core::Callback;
use strand_core::Context;
use strand_core::ContextStore;
use strand_core::Library;
use strand_core::Payload;

thread_local! {
  static NEXT_CONTEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Run `f` inside a fresh context tagged with a unique `_id`, so every
/// context in a test is distinguishable.
pub fn run_in_context<R>(store: &Rc<StackStore>, f: impl FnOnce(&Context) -> R) -> R {
  store.run(|cx| {
    let id = NEXT_CONTEXT_ID.with(|next| {
      let id = next.get();
      next.set(id + 1);
      id
    });
    store.set("_id", Value::from(id));
    f(cx)
  })
}

/// What a probe handler observed across its fires.
#[derive(Default)]
pub struct Probe {
  fired: Cell<usize>,
  sync_fires: RefCell<Vec<bool>>,
  seen_contexts: RefCell<Vec<Context>>,
  seen_values: RefCell<Vec<Value>>,
  seen_reasons: RefCell<Vec<Reason>>,
}

impl Probe {
  pub fn fired(&self) -> usize {
    self.fired.get()
  }

  pub fn values(&self) -> Vec<Value> {
    self.seen_values.borrow().clone()
  }

  pub fn reasons(&self) -> Vec<Reason> {
    self.seen_reasons.borrow().clone()
  }

  pub fn contexts(&self) -> Vec<Context> {
    self.seen_contexts.borrow().clone()
  }
}

/// A probe-instrumented handler. Call [`ProbeHandler::attached`] right
/// after registering the callback: fires before that point count as
/// synchronous.
pub struct ProbeHandler {
  pub callback: Callback,
  pub probe: Rc<Probe>,
  sync: Rc<Cell<bool>>,
}

impl ProbeHandler {
  pub fn attached(&self) {
    self.sync.set(false);
  }

  pub fn arg(&self) -> Arg {
    Arg::Callback(self.callback.clone())
  }
}

/// A handler that records its fires and resolves with `null`.
pub fn probe_handler(store: &Rc<StackStore>) -> ProbeHandler {
  probe_handler_returning(store, Value::Null)
}

/// A handler that records its fires and resolves with `out`.
pub fn probe_handler_returning(store: &Rc<StackStore>, out: Value) -> ProbeHandler {
  let probe = Rc::new(Probe::default());
  let sync = Rc::new(Cell::new(true));
  let store = store.clone();
  let probe2 = probe.clone();
  let sync2 = sync.clone();
  let callback = Callback::new(move |args| {
    probe2.fired.set(probe2.fired.get() + 1);
    probe2.sync_fires.borrow_mut().push(sync2.get());
    probe2.seen_contexts.borrow_mut().push(store.active());
    if let Some(arg) = args.first() {
      if let Some(value) = promise::as_value(arg) {
        probe2.seen_values.borrow_mut().push(value);
      } else if let Some(reason) = promise::as_reason(arg) {
        probe2.seen_reasons.borrow_mut().push(reason);
      }
    }
    Ok(value_payload(out.clone()))
  });
  ProbeHandler {
    callback,
    probe,
    sync,
  }
}

/// A handler that records its fires and rethrows `reason`.
pub fn probe_handler_throwing(store: &Rc<StackStore>, reason: Reason) -> ProbeHandler {
  let base = probe_handler(store);
  let inner = base.callback.clone();
  let callback = Callback::new(move |args| {
    inner.call(args)?;
    Err(reason_payload(reason.clone()))
  });
  ProbeHandler {
    callback,
    probe: base.probe,
    sync: base.sync,
  }
}

/// Async-fire rules: exactly one fire, after the attach turn, bound exactly
/// once to `expected`, and run with `expected` active. Pass
/// [`Context::empty`] when no context should be observed.
pub fn expect_bound_async(handler: &ProbeHandler, expected: &Context) -> Result<()> {
  let probe = &handler.probe;
  if probe.fired.get() != 1 {
    bail!("handler fired {} times, expected 1", probe.fired.get());
  }
  if probe.sync_fires.borrow()[0] {
    bail!("handler fired synchronously");
  }
  let bindings = handler.callback.bindings();
  if bindings.is_empty() {
    bail!("callback was not bound");
  }
  if bindings.len() > 1 {
    bail!("callback was bound {} times", bindings.len());
  }
  if bindings[0] != *expected {
    bail!("callback was bound to the wrong context");
  }
  if probe.seen_contexts.borrow()[0] != *expected {
    bail!("context lost at fire");
  }
  Ok(())
}

/// Sync-fire rules: fired in the registration turn, never bound, and the
/// ambient context was simply still there.
pub fn expect_unbound_sync(handler: &ProbeHandler, expected: &Context) -> Result<()> {
  let probe = &handler.probe;
  if probe.fired.get() != 1 {
    bail!("handler fired {} times, expected 1", probe.fired.get());
  }
  if !probe.sync_fires.borrow()[0] {
    bail!("handler fired asynchronously");
  }
  if !handler.callback.bindings().is_empty() {
    bail!("callback was unnecessarily bound for a synchronous fire");
  }
  if probe.seen_contexts.borrow()[0] != *expected {
    bail!("context lost at fire");
  }
  Ok(())
}

pub fn expect_not_fired(handler: &ProbeHandler) -> Result<()> {
  if handler.probe.fired.get() != 0 {
    bail!("handler fired {} times, expected none", handler.probe.fired.get());
  }
  Ok(())
}

/// How a constructed promise settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleMode {
  Sync,
  Async,
}

/// Construct, through `lib`'s constructor, a promise fulfilling with `value`.
pub fn construct_fulfilled(lib: &Library, rt: &Runtime, mode: SettleMode, value: Value) -> Promise {
  construct_with(lib, rt, mode, Ok(value))
}

/// Construct, through `lib`'s constructor, a promise rejecting with `reason`.
pub fn construct_rejected(lib: &Library, rt: &Runtime, mode: SettleMode, reason: Reason) -> Promise {
  construct_with(lib, rt, mode, Err(reason))
}

fn construct_with(
  lib: &Library,
  rt: &Runtime,
  mode: SettleMode,
  outcome: Result<Value, Reason>,
) -> Promise {
  let rt = rt.clone();
  let executor = Callback::new(move |args| {
    let resolve = as_settle(&args[0]).expect("executor expects a resolve handle");
    let reject = as_settle(&args[1]).expect("executor expects a reject handle");
    let outcome = outcome.clone();
    let settle = move || match outcome {
      Ok(value) => resolve.call(value_payload(value)),
      Err(reason) => reject.call(reason_payload(reason)),
    };
    match mode {
      SettleMode::Sync => settle(),
      SettleMode::Async => rt.defer(settle),
    }
    Ok(unit_payload())
  });
  let payload = lib.construct(executor);
  promise::as_promise(&payload).expect("constructor did not return a promise")
}

/// A promise from no library at all (the foreign-implementation stand-in).
pub fn bare_fulfilled(rt: &Runtime, mode: SettleMode, value: Value) -> Promise {
  match mode {
    SettleMode::Sync => Promise::resolved(rt, value),
    SettleMode::Async => {
      let (p, resolve, _) = Promise::bare_deferred(rt);
      rt.defer(move || resolve.call(value_payload(value)));
      p
    }
  }
}

pub fn bare_rejected(rt: &Runtime, mode: SettleMode, reason: Reason) -> Promise {
  match mode {
    SettleMode::Sync => Promise::rejected(rt, reason),
    SettleMode::Async => {
      let (p, _, reject) = Promise::bare_deferred(rt);
      rt.defer(move || reject.call(reason_payload(reason)));
      p
    }
  }
}

pub fn arg_value(value: Value) -> Arg {
  Arg::Data(value_payload(value))
}

pub fn arg_reason(reason: Reason) -> Arg {
  Arg::Data(reason_payload(reason))
}

pub fn arg_promise(promise: &Promise) -> Arg {
  Arg::Data(promise::promise_payload(promise))
}

/// Unwrap a method's returned payload as a promise.
pub fn returned_promise(result: Result<Payload, Payload>) -> Promise {
  let payload = match result {
    Ok(payload) => payload,
    Err(e) => panic!("method unexpectedly threw: {}", promise::error_reason(&e)),
  };
  promise::as_promise(&payload).expect("method did not return a promise")
}
