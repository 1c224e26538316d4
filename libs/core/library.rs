// Copyright 2026 the Strand authors. MIT license.

use crate::bind::Callback;
use crate::bind::Payload;
use indexmap::IndexMap;
use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Whether a method hangs off the library object itself or off each promise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
  Static,
  Proto,
}

/// A dynamically-typed argument to a library method.
#[derive(Clone)]
pub enum Arg {
  /// Anything that is not a user callback; forwarded untouched.
  Data(Payload),
  /// A user callback, subject to context binding when the method is patched.
  Callback(Callback),
  /// An argument list (collection-shaped methods).
  List(Vec<Arg>),
}

impl Arg {
  pub fn as_callback(&self) -> Option<&Callback> {
    match self {
      Arg::Callback(cb) => Some(cb),
      _ => None,
    }
  }

  pub fn as_data(&self) -> Option<&Payload> {
    match self {
      Arg::Data(payload) => Some(payload),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Arg]> {
    match self {
      Arg::List(items) => Some(items),
      _ => None,
    }
  }
}

impl fmt::Debug for Arg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Arg::Data(..) => write!(f, "Data(..)"),
      Arg::Callback(..) => write!(f, "Callback(..)"),
      Arg::List(items) => write!(f, "List(len={})", items.len()),
    }
  }
}

/// One invocation of a library method.
pub struct Call {
  /// The promise a prototype method was invoked on; `None` for statics.
  pub receiver: Option<Payload>,
  pub args: Vec<Arg>,
}

impl Call {
  pub fn of(args: Vec<Arg>) -> Call {
    Call {
      receiver: None,
      args,
    }
  }

  pub fn on(receiver: Payload, args: Vec<Arg>) -> Call {
    Call {
      receiver: Some(receiver),
      args,
    }
  }
}

pub type MethodFn = Rc<dyn Fn(&Library, Call) -> Result<Payload, Payload>>;
pub type CtorFn = Rc<dyn Fn(&Library, Callback) -> Payload>;

thread_local! {
  static NEXT_LIBRARY_ID: Cell<u64> = const { Cell::new(1) };
}

/// A promise library instance, modeled as a registry of named operations:
/// one constructor slot plus static and prototype method tables. Methods a
/// given library version does not ship are simply absent rows; callers and
/// the patcher discover them via [`Library::method`].
pub struct Library {
  id: u64,
  name: String,
  constructor: RefCell<Option<CtorFn>>,
  statics: RefCell<IndexMap<&'static str, MethodFn>>,
  protos: RefCell<IndexMap<&'static str, MethodFn>>,
  patched: Cell<bool>,
}

impl Library {
  pub fn new(name: impl Into<String>) -> Library {
    let id = NEXT_LIBRARY_ID.with(|next| {
      let id = next.get();
      next.set(id + 1);
      id
    });
    Library {
      id,
      name: name.into(),
      constructor: RefCell::new(None),
      statics: RefCell::new(IndexMap::new()),
      protos: RefCell::new(IndexMap::new()),
      patched: Cell::new(false),
    }
  }

  /// Instance identity, distinguishing otherwise identical library copies.
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn set_constructor(&self, f: CtorFn) {
    *self.constructor.borrow_mut() = Some(f);
  }

  pub fn constructor(&self) -> Option<CtorFn> {
    self.constructor.borrow().clone()
  }

  pub fn replace_constructor(&self, f: CtorFn) {
    log::debug!("{}: constructor replaced", self.name);
    *self.constructor.borrow_mut() = Some(f);
  }

  pub fn register(&self, kind: MethodKind, name: &'static str, f: MethodFn) {
    self.table(kind).borrow_mut().insert(name, f);
  }

  pub fn method(&self, kind: MethodKind, name: &str) -> Option<MethodFn> {
    self.table(kind).borrow().get(name).cloned()
  }

  pub fn has_method(&self, kind: MethodKind, name: &str) -> bool {
    self.table(kind).borrow().contains_key(name)
  }

  /// Swap an existing row for a decorated implementation.
  pub fn replace(&self, kind: MethodKind, name: &'static str, f: MethodFn) {
    log::debug!("{}: {kind:?} method {name:?} replaced", self.name);
    self.table(kind).borrow_mut().insert(name, f);
  }

  pub fn method_names(&self, kind: MethodKind) -> Vec<&'static str> {
    self.table(kind).borrow().keys().copied().collect()
  }

  pub fn is_patched(&self) -> bool {
    self.patched.get()
  }

  pub fn mark_patched(&self) {
    self.patched.set(true);
  }

  /// Invoke a static method. Panics if the method is not registered; use
  /// [`Library::has_method`] when presence is version-dependent.
  pub fn call_static(&self, name: &str, args: Vec<Arg>) -> Result<Payload, Payload> {
    let Some(method) = self.method(MethodKind::Static, name) else {
      panic!("library {:?} has no static method {name:?}", self.name);
    };
    (*method)(self, Call::of(args))
  }

  /// Invoke a prototype method on `receiver`.
  pub fn call_proto(
    &self,
    name: &str,
    receiver: Payload,
    args: Vec<Arg>,
  ) -> Result<Payload, Payload> {
    let Some(method) = self.method(MethodKind::Proto, name) else {
      panic!("library {:?} has no prototype method {name:?}", self.name);
    };
    (*method)(self, Call::on(receiver, args))
  }

  /// Run the promise constructor with `executor`.
  pub fn construct(&self, executor: Callback) -> Payload {
    let Some(ctor) = self.constructor() else {
      panic!("library {:?} has no constructor", self.name);
    };
    (*ctor)(self, executor)
  }

  fn table(&self, kind: MethodKind) -> &RefCell<IndexMap<&'static str, MethodFn>> {
    match kind {
      MethodKind::Static => &self.statics,
      MethodKind::Proto => &self.protos,
    }
  }
}

impl fmt::Debug for Library {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Library")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("statics", &self.statics.borrow().len())
      .field("protos", &self.protos.borrow().len())
      .field("patched", &self.patched.get())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;
  use serde_json::json;

  #[test]
  fn register_lookup_replace() {
    let lib = Library::new("t");
    assert!(!lib.has_method(MethodKind::Proto, "then"));

    lib.register(
      MethodKind::Proto,
      "then",
      Rc::new(|_, _| Ok(Rc::new(json!("original")))),
    );
    assert!(lib.has_method(MethodKind::Proto, "then"));
    assert!(!lib.has_method(MethodKind::Static, "then"));

    lib.replace(
      MethodKind::Proto,
      "then",
      Rc::new(|_, _| Ok(Rc::new(json!("decorated")))),
    );
    let out = lib
      .call_proto("then", Rc::new(()), Vec::new())
      .unwrap();
    assert_eq!(*out.downcast_ref::<Value>().unwrap(), json!("decorated"));
  }

  #[test]
  fn library_ids_are_distinct() {
    let a = Library::new("copy");
    let b = Library::new("copy");
    assert_ne!(a.id(), b.id());
  }

  #[test]
  fn call_dispatch_sees_args() {
    let lib = Library::new("t");
    lib.register(
      MethodKind::Static,
      "resolve",
      Rc::new(|_, call| {
        assert_eq!(call.args.len(), 1);
        assert!(call.receiver.is_none());
        Ok(call.args[0].as_data().unwrap().clone())
      }),
    );
    let out = lib
      .call_static("resolve", vec![Arg::Data(Rc::new(json!(5)))])
      .unwrap();
    assert_eq!(*out.downcast_ref::<Value>().unwrap(), json!(5));
  }
}
