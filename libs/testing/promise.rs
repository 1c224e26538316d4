// Copyright 2026 the Strand authors. MIT license.

//! A deliberately small promise library, registered into a [`Library`] so
//! the patcher has something real to decorate: continuation methods,
//! collection combinators, and the resource lifecycle pair. Handlers always
//! fire on a later [`Runtime`] turn, never in the turn they were
//! registered.

use crate::runtime::Runtime;
use anyhow::anyhow;
use serde_json::Value;
use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use strand_core::Arg;
use strand_core::Call;
use strand_core::Callback;
use strand_core::Library;
use strand_core::Payload;

/// Cloneable rejection reason with identity comparison, so one rejection
/// can fan out to any number of reactions.
#[derive(Clone)]
pub struct Reason(Rc<anyhow::Error>);

impl Reason {
  pub fn msg(text: impl Into<String>) -> Reason {
    Reason(Rc::new(anyhow!(text.into())))
  }

  pub fn same(a: &Reason, b: &Reason) -> bool {
    Rc::ptr_eq(&a.0, &b.0)
  }
}

impl fmt::Display for Reason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

impl fmt::Debug for Reason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Reason({})", self.0)
  }
}

#[derive(Clone, Debug)]
pub enum Settled {
  Fulfilled(Value),
  Rejected(Reason),
}

struct PromiseInner {
  state: Option<Settled>,
  subscribers: Vec<Box<dyn FnOnce(Settled)>>,
  library_id: Option<u64>,
}

/// A promise. `library_id` records which library instance constructed it;
/// bare promises (no library) stand in for a foreign native implementation.
#[derive(Clone)]
pub struct Promise {
  rt: Runtime,
  inner: Rc<RefCell<PromiseInner>>,
}

impl Promise {
  pub(crate) fn pending(rt: &Runtime, library_id: Option<u64>) -> Promise {
    Promise {
      rt: rt.clone(),
      inner: Rc::new(RefCell::new(PromiseInner {
        state: None,
        subscribers: Vec::new(),
        library_id,
      })),
    }
  }

  /// A settled bare promise, outside any library.
  pub fn resolved(rt: &Runtime, value: Value) -> Promise {
    let p = Promise::pending(rt, None);
    p.fulfill(value);
    p
  }

  pub fn rejected(rt: &Runtime, reason: Reason) -> Promise {
    let p = Promise::pending(rt, None);
    p.reject_with(reason);
    p
  }

  /// A pending bare promise; settle it later through the returned handles.
  pub fn bare_deferred(rt: &Runtime) -> (Promise, Settle, Settle) {
    let p = Promise::pending(rt, None);
    let resolve = p.resolve_handle();
    let reject = p.reject_handle();
    (p, resolve, reject)
  }

  pub fn library_id(&self) -> Option<u64> {
    self.inner.borrow().library_id
  }

  pub fn is_instance_of(&self, lib: &Library) -> bool {
    self.library_id() == Some(lib.id())
  }

  pub fn state(&self) -> Option<Settled> {
    self.inner.borrow().state.clone()
  }

  pub fn is_pending(&self) -> bool {
    self.state().is_none()
  }

  pub fn value(&self) -> Option<Value> {
    match self.state() {
      Some(Settled::Fulfilled(v)) => Some(v),
      _ => None,
    }
  }

  pub fn reason(&self) -> Option<Reason> {
    match self.state() {
      Some(Settled::Rejected(r)) => Some(r),
      _ => None,
    }
  }

  /// Internal data-plane attach: run `f` on a later turn once settled.
  /// Assimilation and reaction dispatch build on this; it is never wrapped.
  pub(crate) fn subscribe(&self, f: impl FnOnce(Settled) + 'static) {
    let state = self.inner.borrow().state.clone();
    match state {
      Some(outcome) => self.rt.defer(move || f(outcome)),
      None => self.inner.borrow_mut().subscribers.push(Box::new(f)),
    }
  }

  /// First settle wins; later settles are ignored.
  pub(crate) fn settle(&self, outcome: Settled) {
    let subscribers = {
      let mut inner = self.inner.borrow_mut();
      if inner.state.is_some() {
        return;
      }
      inner.state = Some(outcome.clone());
      std::mem::take(&mut inner.subscribers)
    };
    log::trace!("promise settled, {} subscriber(s) scheduled", subscribers.len());
    for sub in subscribers {
      let outcome = outcome.clone();
      self.rt.defer(move || sub(outcome));
    }
  }

  pub(crate) fn fulfill(&self, value: Value) {
    self.settle(Settled::Fulfilled(value));
  }

  pub(crate) fn reject_with(&self, reason: Reason) {
    self.settle(Settled::Rejected(reason));
  }

  /// Resolve with a dynamic payload: a value fulfills, a promise from any
  /// library is assimilated, a reason rejects.
  pub(crate) fn resolve_payload(&self, payload: Payload) {
    if let Some(value) = as_value(&payload) {
      self.fulfill(value);
    } else if let Some(promise) = as_promise(&payload) {
      let this = self.clone();
      promise.subscribe(move |outcome| this.settle(outcome));
    } else if let Some(reason) = as_reason(&payload) {
      self.reject_with(reason);
    } else {
      self.fulfill(Value::Null);
    }
  }

  fn resolve_handle(&self) -> Settle {
    let p = self.clone();
    Settle {
      f: Rc::new(move |payload| p.resolve_payload(payload)),
    }
  }

  fn reject_handle(&self) -> Settle {
    let p = self.clone();
    Settle {
      f: Rc::new(move |payload| p.reject_with(error_reason(&payload))),
    }
  }
}

impl fmt::Debug for Promise {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.state() {
      None => write!(f, "Promise(pending)"),
      Some(Settled::Fulfilled(v)) => write!(f, "Promise(fulfilled: {v})"),
      Some(Settled::Rejected(r)) => write!(f, "Promise(rejected: {r})"),
    }
  }
}

/// A settle signal handed to constructor executors. Data-plane: the patcher
/// never wraps these.
#[derive(Clone)]
pub struct Settle {
  f: Rc<dyn Fn(Payload)>,
}

impl Settle {
  pub fn call(&self, payload: Payload) {
    (*self.f)(payload)
  }
}

/// A resource paired with its release callback. The release callback binds
/// when the disposer is created, independently of the acquire side.
#[derive(Clone)]
pub struct Disposer {
  pub(crate) promise: Promise,
  pub(crate) release: Callback,
}

// Payload conversions. `Payload` is `Rc<dyn Any>`; these are the only
// downcasts in the fixture.

pub fn value_payload(value: Value) -> Payload {
  Rc::new(value)
}

pub fn reason_payload(reason: Reason) -> Payload {
  Rc::new(reason)
}

pub fn promise_payload(promise: &Promise) -> Payload {
  Rc::new(promise.clone())
}

pub fn unit_payload() -> Payload {
  Rc::new(())
}

pub fn as_value(payload: &Payload) -> Option<Value> {
  payload.downcast_ref::<Value>().cloned()
}

pub fn as_reason(payload: &Payload) -> Option<Reason> {
  payload.downcast_ref::<Reason>().cloned()
}

pub fn as_promise(payload: &Payload) -> Option<Promise> {
  payload.downcast_ref::<Promise>().cloned()
}

pub fn as_settle(payload: &Payload) -> Option<Settle> {
  payload.downcast_ref::<Settle>().cloned()
}

pub fn as_disposer(payload: &Payload) -> Option<Disposer> {
  payload.downcast_ref::<Disposer>().cloned()
}

/// Interpret a thrown payload as a rejection reason.
pub fn error_reason(payload: &Payload) -> Reason {
  if let Some(reason) = as_reason(payload) {
    reason
  } else if let Some(value) = as_value(payload) {
    Reason::msg(value.to_string())
  } else {
    Reason::msg("opaque rejection")
  }
}

fn payload_to_promise(rt: &Runtime, library_id: Option<u64>, payload: Payload) -> Promise {
  if let Some(promise) = as_promise(&payload) {
    return promise;
  }
  let p = Promise::pending(rt, library_id);
  p.resolve_payload(payload);
  p
}

fn rejected_promise(rt: &Runtime, library_id: Option<u64>, reason: Reason) -> Promise {
  let p = Promise::pending(rt, library_id);
  p.reject_with(reason);
  p
}

/// Settle `to` however `from` settles.
fn pipe(from: &Promise, to: &Promise) {
  let to = to.clone();
  from.subscribe(move |outcome| to.settle(outcome));
}

/// Wait for every input; fulfill with the array of values, or reject with
/// the first rejection.
fn join_all(rt: &Runtime, library_id: Option<u64>, inputs: Vec<Promise>) -> Promise {
  let next = Promise::pending(rt, library_id);
  if inputs.is_empty() {
    next.fulfill(Value::Array(Vec::new()));
    return next;
  }
  let remaining = Rc::new(Cell::new(inputs.len()));
  let slots = Rc::new(RefCell::new(vec![Value::Null; inputs.len()]));
  for (i, input) in inputs.into_iter().enumerate() {
    let next = next.clone();
    let remaining = remaining.clone();
    let slots = slots.clone();
    input.subscribe(move |outcome| match outcome {
      Settled::Fulfilled(value) => {
        slots.borrow_mut()[i] = value;
        remaining.set(remaining.get() - 1);
        if remaining.get() == 0 {
          next.fulfill(Value::Array(slots.borrow().clone()));
        }
      }
      Settled::Rejected(reason) => next.reject_with(reason),
    });
  }
  next
}

fn run_handler(next: &Promise, cb: &Callback, args: &[Payload]) {
  match cb.call(args) {
    Ok(out) => next.resolve_payload(out),
    Err(e) => next.reject_with(error_reason(&e)),
  }
}

fn receiver(call: &Call) -> Promise {
  call
    .receiver
    .as_ref()
    .and_then(as_promise)
    .expect("prototype method called without a promise receiver")
}

fn callback_at(call: &Call, index: usize) -> Option<Callback> {
  call.args.get(index).and_then(Arg::as_callback).cloned()
}

// Method implementations, registered by `versions`. The patcher decorates
// the registered rows, so everything below only ever sees already-wrapped
// callbacks.

pub(crate) fn construct(lib: &Library, rt: &Runtime, executor: Callback) -> Payload {
  let p = Promise::pending(rt, Some(lib.id()));
  let resolve = p.resolve_handle();
  let reject = p.reject_handle();
  if let Err(e) = executor.call(&[Rc::new(resolve) as Payload, Rc::new(reject) as Payload]) {
    p.reject_with(error_reason(&e));
  }
  promise_payload(&p)
}

pub(crate) fn resolve_static(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let p = Promise::pending(rt, Some(lib.id()));
  match call.args.first().and_then(Arg::as_data) {
    Some(payload) => p.resolve_payload(payload.clone()),
    None => p.fulfill(Value::Null),
  }
  Ok(promise_payload(&p))
}

pub(crate) fn reject_static(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let reason = call
    .args
    .first()
    .and_then(Arg::as_data)
    .map(error_reason)
    .unwrap_or_else(|| Reason::msg("rejected with no reason"));
  Ok(promise_payload(&rejected_promise(rt, Some(lib.id()), reason)))
}

pub(crate) fn then_proto(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let on_fulfilled = callback_at(&call, 0);
  let on_rejected = callback_at(&call, 1);
  let next = Promise::pending(rt, Some(lib.id()));
  let next2 = next.clone();
  p.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(value) => match &on_fulfilled {
      Some(cb) => run_handler(&next2, cb, &[value_payload(value)]),
      None => next2.fulfill(value),
    },
    Settled::Rejected(reason) => match &on_rejected {
      Some(cb) => run_handler(&next2, cb, &[reason_payload(reason)]),
      None => next2.reject_with(reason),
    },
  });
  Ok(promise_payload(&next))
}

/// `catch` goes through the registry's `then`, as the real library would;
/// with the library patched, the handler reaches `then` already bound and
/// is not wrapped a second time.
pub(crate) fn catch_proto(lib: &Library, call: Call) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let args = match callback_at(&call, 0) {
    Some(on_rejected) => vec![Arg::Data(unit_payload()), Arg::Callback(on_rejected)],
    None => Vec::new(),
  };
  lib.call_proto("then", promise_payload(&p), args)
}

pub(crate) fn tap_proto(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let handler = callback_at(&call, 0);
  let next = Promise::pending(rt, Some(lib.id()));
  let next2 = next.clone();
  let rt2 = rt.clone();
  let library_id = Some(lib.id());
  p.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(value) => match &handler {
      Some(cb) => match cb.call(&[value_payload(value.clone())]) {
        Ok(out) => {
          // Wait for a returned promise, then pass the original value on.
          let side = payload_to_promise(&rt2, library_id, out);
          let next3 = next2.clone();
          side.subscribe(move |side_outcome| match side_outcome {
            Settled::Fulfilled(_) => next3.fulfill(value),
            Settled::Rejected(reason) => next3.reject_with(reason),
          });
        }
        Err(e) => next2.reject_with(error_reason(&e)),
      },
      None => next2.fulfill(value),
    },
    Settled::Rejected(reason) => next2.reject_with(reason),
  });
  Ok(promise_payload(&next))
}

pub(crate) fn finally_proto(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let handler = callback_at(&call, 0);
  let next = Promise::pending(rt, Some(lib.id()));
  let next2 = next.clone();
  let rt2 = rt.clone();
  let library_id = Some(lib.id());
  p.subscribe(move |outcome| match &handler {
    Some(cb) => match cb.call(&[]) {
      Ok(out) => {
        let side = payload_to_promise(&rt2, library_id, out);
        let next3 = next2.clone();
        side.subscribe(move |side_outcome| match side_outcome {
          // The original outcome passes through once the side effect is done.
          Settled::Fulfilled(_) => next3.settle(outcome),
          Settled::Rejected(reason) => next3.reject_with(reason),
        });
      }
      Err(e) => next2.reject_with(error_reason(&e)),
    },
    None => next2.settle(outcome),
  });
  Ok(promise_payload(&next))
}

pub(crate) fn done_proto(call: Call) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let on_fulfilled = callback_at(&call, 0);
  let on_rejected = callback_at(&call, 1);
  p.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(value) => {
      if let Some(cb) = &on_fulfilled {
        if let Err(e) = cb.call(&[value_payload(value)]) {
          log::error!("unhandled error in done handler: {}", error_reason(&e));
        }
      }
    }
    Settled::Rejected(reason) => match &on_rejected {
      Some(cb) => {
        if let Err(e) = cb.call(&[reason_payload(reason)]) {
          log::error!("unhandled error in done handler: {}", error_reason(&e));
        }
      }
      None => log::error!("unhandled rejection reached done: {reason}"),
    },
  });
  // done chains nothing.
  Ok(unit_payload())
}

pub(crate) fn all_static(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let library_id = Some(lib.id());
  let inputs: Vec<Promise> = call
    .args
    .first()
    .and_then(Arg::as_list)
    .unwrap_or(&[])
    .iter()
    .filter_map(Arg::as_data)
    .map(|payload| payload_to_promise(rt, library_id, payload.clone()))
    .collect();
  Ok(promise_payload(&join_all(rt, library_id, inputs)))
}

pub(crate) fn all_proto(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let next = Promise::pending(rt, Some(lib.id()));
  let next2 = next.clone();
  p.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(Value::Array(values)) => next2.fulfill(Value::Array(values)),
    Settled::Fulfilled(_) => next2.reject_with(Reason::msg("expected an array")),
    Settled::Rejected(reason) => next2.reject_with(reason),
  });
  Ok(promise_payload(&next))
}

/// Shared by `map` and `each`: the mapper was bound once at the method
/// call, so every per-element invocation restores the same capture.
fn run_mapper(
  rt: &Runtime,
  library_id: Option<u64>,
  inputs: Vec<Promise>,
  mapper: Callback,
  keep_input: bool,
) -> Promise {
  let gathered = join_all(rt, library_id, inputs);
  let next = Promise::pending(rt, library_id);
  let next2 = next.clone();
  let rt2 = rt.clone();
  gathered.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(Value::Array(values)) => {
      let outs: Vec<Promise> = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
          let args = [value_payload(value.clone()), value_payload(Value::from(i as u64))];
          match mapper.call(&args) {
            Ok(out) => payload_to_promise(&rt2, library_id, out),
            Err(e) => rejected_promise(&rt2, library_id, error_reason(&e)),
          }
        })
        .collect();
      let combined = join_all(&rt2, library_id, outs);
      let next3 = next2.clone();
      combined.subscribe(move |combined_outcome| match combined_outcome {
        Settled::Fulfilled(mapped) => {
          next3.fulfill(if keep_input { Value::Array(values) } else { mapped })
        }
        Settled::Rejected(reason) => next3.reject_with(reason),
      });
    }
    Settled::Fulfilled(_) => next2.reject_with(Reason::msg("expected an array")),
    Settled::Rejected(reason) => next2.reject_with(reason),
  });
  next
}

pub(crate) fn map_static(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let library_id = Some(lib.id());
  let inputs: Vec<Promise> = call
    .args
    .first()
    .and_then(Arg::as_list)
    .unwrap_or(&[])
    .iter()
    .filter_map(Arg::as_data)
    .map(|payload| payload_to_promise(rt, library_id, payload.clone()))
    .collect();
  let Some(mapper) = callback_at(&call, 1) else {
    return Err(reason_payload(Reason::msg("map requires a mapper function")));
  };
  Ok(promise_payload(&run_mapper(rt, library_id, inputs, mapper, false)))
}

fn mapper_over_receiver(
  lib: &Library,
  rt: &Runtime,
  call: Call,
  keep_input: bool,
) -> Result<Payload, Payload> {
  let p = receiver(&call);
  let Some(mapper) = callback_at(&call, 0) else {
    return Err(reason_payload(Reason::msg("expected an iterator function")));
  };
  let library_id = Some(lib.id());
  let next = Promise::pending(rt, library_id);
  let next2 = next.clone();
  let rt2 = rt.clone();
  p.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(Value::Array(values)) => {
      let inputs = values
        .into_iter()
        .map(|v| {
          let p = Promise::pending(&rt2, library_id);
          p.fulfill(v);
          p
        })
        .collect();
      pipe(&run_mapper(&rt2, library_id, inputs, mapper.clone(), keep_input), &next2);
    }
    Settled::Fulfilled(_) => next2.reject_with(Reason::msg("expected an array")),
    Settled::Rejected(reason) => next2.reject_with(reason),
  });
  Ok(promise_payload(&next))
}

pub(crate) fn map_proto(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  mapper_over_receiver(lib, rt, call, false)
}

pub(crate) fn each_proto(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  mapper_over_receiver(lib, rt, call, true)
}

/// `attempt` runs its function in the calling turn. It has no patch-table
/// row: nothing crosses an asynchronous boundary before the function runs,
/// so the ambient context is already the right one.
pub(crate) fn attempt_static(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let p = Promise::pending(rt, Some(lib.id()));
  match callback_at(&call, 0) {
    Some(cb) => match cb.call(&[]) {
      Ok(out) => p.resolve_payload(out),
      Err(e) => p.reject_with(error_reason(&e)),
    },
    None => p.fulfill(Value::Null),
  }
  Ok(promise_payload(&p))
}

pub(crate) fn disposer_proto(call: Call) -> Result<Payload, Payload> {
  let promise = receiver(&call);
  let Some(release) = callback_at(&call, 0) else {
    return Err(reason_payload(Reason::msg("disposer requires a release function")));
  };
  Ok(Rc::new(Disposer { promise, release }) as Payload)
}

pub(crate) fn using_static(lib: &Library, rt: &Runtime, call: Call) -> Result<Payload, Payload> {
  let library_id = Some(lib.id());
  let handler = call.args.last().and_then(Arg::as_callback).cloned();

  // Accept both `using(d1, d2, .., handler)` and `using([d1, d2, ..], handler)`.
  let head = &call.args[..call.args.len().saturating_sub(1)];
  let disposers: Vec<Disposer> = match head.first().and_then(Arg::as_list) {
    Some(items) if head.len() == 1 => items.iter().filter_map(Arg::as_data).filter_map(as_disposer).collect(),
    _ => head.iter().filter_map(Arg::as_data).filter_map(as_disposer).collect(),
  };

  let acquired = join_all(rt, library_id, disposers.iter().map(|d| d.promise.clone()).collect());
  let next = Promise::pending(rt, library_id);
  let next2 = next.clone();
  let rt2 = rt.clone();
  acquired.subscribe(move |outcome| match outcome {
    Settled::Fulfilled(Value::Array(resources)) => {
      let used = match &handler {
        Some(cb) => match cb.call(&[value_payload(Value::Array(resources.clone()))]) {
          Ok(out) => payload_to_promise(&rt2, library_id, out),
          Err(e) => rejected_promise(&rt2, library_id, error_reason(&e)),
        },
        None => {
          let p = Promise::pending(&rt2, library_id);
          p.fulfill(Value::Null);
          p
        }
      };
      // Release every resource once the handler settles, then settle with
      // the handler's outcome.
      let next3 = next2.clone();
      let rt3 = rt2.clone();
      let disposers = disposers.clone();
      used.subscribe(move |used_outcome| {
        for (disposer, resource) in disposers.iter().zip(resources) {
          let release = disposer.release.clone();
          rt3.defer(move || {
            if let Err(e) = release.call(&[value_payload(resource)]) {
              log::error!("error in disposer release: {}", error_reason(&e));
            }
          });
        }
        next3.settle(used_outcome);
      });
    }
    Settled::Fulfilled(_) => next2.reject_with(Reason::msg("expected an array")),
    // Acquisition failed: the handler and the releases never run.
    Settled::Rejected(reason) => next2.reject_with(reason),
  });
  Ok(promise_payload(&next))
}
