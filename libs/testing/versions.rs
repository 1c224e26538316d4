// Copyright 2026 the Strand authors. MIT license.

//! Library builders for the two fixture versions under test. The versions
//! share one promise machinery and differ only in which registry rows
//! exist, so version differences surface to the patcher as present/absent
//! methods rather than behavioral branches.

use crate::promise;
use crate::runtime::Runtime;
use std::rc::Rc;
use strand_core::Library;
use strand_core::MethodFn;
use strand_core::MethodKind;

#[derive(Clone, Copy)]
struct Features {
  has_done: bool,
  has_finally: bool,
}

/// The primary fixture: ships `done`, predates `finally`.
pub fn v2(rt: &Runtime) -> Library {
  build(rt, "fixture-v2", Features {
    has_done: true,
    has_finally: false,
  })
}

/// The successor fixture: ships `finally`, dropped `done`.
pub fn v3(rt: &Runtime) -> Library {
  build(rt, "fixture-v3", Features {
    has_done: false,
    has_finally: true,
  })
}

fn with_rt<F>(rt: &Runtime, f: F) -> MethodFn
where
  F: Fn(&Library, &Runtime, strand_core::Call) -> Result<strand_core::Payload, strand_core::Payload>
    + 'static,
{
  let rt = rt.clone();
  Rc::new(move |lib, call| f(lib, &rt, call))
}

fn build(rt: &Runtime, name: &str, features: Features) -> Library {
  let lib = Library::new(name);

  {
    let rt = rt.clone();
    lib.set_constructor(Rc::new(move |lib, executor| {
      promise::construct(lib, &rt, executor)
    }));
  }

  lib.register(MethodKind::Static, "resolve", with_rt(rt, promise::resolve_static));
  lib.register(MethodKind::Static, "reject", with_rt(rt, promise::reject_static));
  lib.register(MethodKind::Static, "all", with_rt(rt, promise::all_static));
  lib.register(MethodKind::Static, "map", with_rt(rt, promise::map_static));
  lib.register(MethodKind::Static, "using", with_rt(rt, promise::using_static));
  lib.register(MethodKind::Static, "attempt", with_rt(rt, promise::attempt_static));

  lib.register(MethodKind::Proto, "then", with_rt(rt, promise::then_proto));
  lib.register(MethodKind::Proto, "catch", Rc::new(|lib, call| promise::catch_proto(lib, call)));
  lib.register(MethodKind::Proto, "tap", with_rt(rt, promise::tap_proto));
  lib.register(MethodKind::Proto, "all", with_rt(rt, promise::all_proto));
  lib.register(MethodKind::Proto, "map", with_rt(rt, promise::map_proto));
  lib.register(MethodKind::Proto, "each", with_rt(rt, promise::each_proto));
  lib.register(MethodKind::Proto, "disposer", Rc::new(|_, call| promise::disposer_proto(call)));

  if features.has_done {
    lib.register(MethodKind::Proto, "done", Rc::new(|_, call| promise::done_proto(call)));
  }
  if features.has_finally {
    lib.register(MethodKind::Proto, "finally", with_rt(rt, promise::finally_proto));
  }

  lib
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn versions_differ_only_in_rows() {
    let rt = Runtime::new();
    let v2 = v2(&rt);
    let v3 = v3(&rt);

    assert!(v2.has_method(MethodKind::Proto, "done"));
    assert!(!v2.has_method(MethodKind::Proto, "finally"));
    assert!(!v3.has_method(MethodKind::Proto, "done"));
    assert!(v3.has_method(MethodKind::Proto, "finally"));

    for name in ["then", "catch", "tap", "all", "map", "each", "disposer"] {
      assert!(v2.has_method(MethodKind::Proto, name), "v2 missing {name}");
      assert!(v3.has_method(MethodKind::Proto, name), "v3 missing {name}");
    }
  }
}
