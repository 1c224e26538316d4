// Copyright 2026 the Strand authors. MIT license.

//! Terminal and side-effecting methods: `done` (v2 only, chains nothing),
//! `tap` (side effect, value passes through), and `finally` (v3 only,
//! fires on both arms, outcome passes through).

use pretty_assertions::assert_eq;
use serde_json::json;
use std::rc::Rc;
use strand_core::Library;
use strand_core::patch;
use strand_testing::Reason;
use strand_testing::Runtime;
use strand_testing::StackStore;
use strand_testing::harness;
use strand_testing::harness::SettleMode;
use strand_testing::promise;
use strand_testing::versions;

struct World {
  store: Rc<StackStore>,
  rt: Runtime,
  v2: Rc<Library>,
  v3: Rc<Library>,
}

fn world() -> World {
  let store = StackStore::new();
  let rt = Runtime::new();
  let v2 = Rc::new(versions::v2(&rt));
  patch(store.clone(), &v2).expect("patch v2");
  let v3 = Rc::new(versions::v3(&rt));
  patch(store.clone(), &v3).expect("patch v3");
  World { store, rt, v2, v3 }
}

#[test]
fn done_fires_the_resolve_handler_bound_and_chains_nothing() {
  let w = world();
  let p = harness::construct_fulfilled(&w.v2, &w.rt, SettleMode::Async, json!("v"));

  let (handler, cx, returned) = harness::run_in_context(&w.store, |cx| {
    let handler = harness::probe_handler(&w.store);
    let returned = w
      .v2
      .call_proto("done", promise::promise_payload(&p), vec![handler.arg()])
      .expect("done should not throw");
    handler.attached();
    (handler, cx.clone(), returned)
  });
  w.rt.run_until_idle();

  harness::expect_bound_async(&handler, &cx).unwrap();
  assert_eq!(handler.probe.values(), vec![json!("v")]);
  assert!(promise::as_promise(&returned).is_none(), "done must not chain a promise");
}

#[test]
fn done_fires_the_reject_handler_bound() {
  let w = world();
  let reason = Reason::msg("rejection");
  let p = harness::construct_rejected(&w.v2, &w.rt, SettleMode::Async, reason.clone());

  let (on_fulfilled, on_rejected, cx) = harness::run_in_context(&w.store, |cx| {
    let on_fulfilled = harness::probe_handler(&w.store);
    let on_rejected = harness::probe_handler(&w.store);
    w.v2
      .call_proto(
        "done",
        promise::promise_payload(&p),
        vec![on_fulfilled.arg(), on_rejected.arg()],
      )
      .expect("done should not throw");
    on_fulfilled.attached();
    on_rejected.attached();
    (on_fulfilled, on_rejected, cx.clone())
  });
  w.rt.run_until_idle();

  harness::expect_not_fired(&on_fulfilled).unwrap();
  harness::expect_bound_async(&on_rejected, &cx).unwrap();
  assert!(Reason::same(&on_rejected.probe.reasons()[0], &reason));
}

#[test]
fn tap_binds_its_handler_and_passes_the_value_through() {
  let w = world();
  let p = harness::construct_fulfilled(&w.v2, &w.rt, SettleMode::Async, json!("v"));

  let (side, cx_tap, tapped) = harness::run_in_context(&w.store, |cx| {
    let side = harness::probe_handler_returning(&w.store, json!("side effect"));
    let tapped = harness::returned_promise(w.v2.call_proto(
      "tap",
      promise::promise_payload(&p),
      vec![side.arg()],
    ));
    side.attached();
    (side, cx.clone(), tapped)
  });

  let (after, cx_then) = harness::run_in_context(&w.store, |cx| {
    let after = harness::probe_handler(&w.store);
    harness::returned_promise(w.v2.call_proto(
      "then",
      promise::promise_payload(&tapped),
      vec![after.arg()],
    ));
    after.attached();
    (after, cx.clone())
  });
  w.rt.run_until_idle();

  harness::expect_bound_async(&side, &cx_tap).unwrap();
  assert_eq!(side.probe.values(), vec![json!("v")]);
  // The tap return value is discarded; the original value flows on.
  harness::expect_bound_async(&after, &cx_then).unwrap();
  assert_eq!(after.probe.values(), vec![json!("v")]);
}

#[test]
fn tap_does_not_fire_on_rejection() {
  let w = world();
  let reason = Reason::msg("rejection");
  let p = harness::construct_rejected(&w.v2, &w.rt, SettleMode::Sync, reason.clone());

  let side = harness::probe_handler(&w.store);
  let tapped = harness::returned_promise(w.v2.call_proto(
    "tap",
    promise::promise_payload(&p),
    vec![side.arg()],
  ));
  side.attached();
  w.rt.run_until_idle();

  harness::expect_not_fired(&side).unwrap();
  assert!(Reason::same(&tapped.reason().expect("rejection passes through"), &reason));
}

#[test]
fn finally_fires_bound_on_both_arms_and_passes_the_outcome_through() {
  let w = world();

  // Fulfilled arm.
  let p = harness::construct_fulfilled(&w.v3, &w.rt, SettleMode::Async, json!(1));
  let (side, cx, result) = harness::run_in_context(&w.store, |cx| {
    let side = harness::probe_handler(&w.store);
    let result = harness::returned_promise(w.v3.call_proto(
      "finally",
      promise::promise_payload(&p),
      vec![side.arg()],
    ));
    side.attached();
    (side, cx.clone(), result)
  });
  w.rt.run_until_idle();

  harness::expect_bound_async(&side, &cx).unwrap();
  // finally handlers receive no arguments.
  assert_eq!(side.probe.values(), Vec::<serde_json::Value>::new());
  assert_eq!(result.value(), Some(json!(1)));

  // Rejected arm.
  let reason = Reason::msg("rejection");
  let p = harness::construct_rejected(&w.v3, &w.rt, SettleMode::Sync, reason.clone());
  let (side, cx, result) = harness::run_in_context(&w.store, |cx| {
    let side = harness::probe_handler(&w.store);
    let result = harness::returned_promise(w.v3.call_proto(
      "finally",
      promise::promise_payload(&p),
      vec![side.arg()],
    ));
    side.attached();
    (side, cx.clone(), result)
  });
  w.rt.run_until_idle();

  harness::expect_bound_async(&side, &cx).unwrap();
  assert!(Reason::same(&result.reason().expect("rejection passes through"), &reason));
}

#[test]
fn attempt_runs_its_function_synchronously_unbound() {
  let w = world();

  let (fun, cx) = harness::run_in_context(&w.store, |cx| {
    let fun = harness::probe_handler_returning(&w.store, json!("ran"));
    let p = harness::returned_promise(
      w.v2.call_static("attempt", vec![fun.arg()]),
    );
    assert!(p.is_instance_of(&w.v2));
    fun.attached();
    (fun, cx.clone())
  });
  w.rt.run_until_idle();

  // The function ran in the registration turn: context was simply still
  // active, and no binding may be recorded.
  harness::expect_unbound_sync(&fun, &cx).unwrap();
}
