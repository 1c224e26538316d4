// Copyright 2026 the Strand authors. MIT license.

use crate::library::MethodKind;

/// Where the user callbacks sit in a method's argument list.
#[derive(Clone, Copy, Debug)]
pub enum Positions {
  /// Fixed argument indices. Absent positions are ignored, so one row can
  /// cover optional-handler signatures.
  At(&'static [usize]),
  /// The final argument, wherever it falls (varargs-style methods).
  Trailing,
}

/// Whether a declared callback slot holds one callback or a list of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackShape {
  Single,
  /// The slot may hold an argument list; every callback element is wrapped
  /// independently, all sharing the one capture taken at the method call.
  Array,
}

/// One row of the method patch table.
#[derive(Clone, Copy, Debug)]
pub struct PatchEntry {
  pub name: &'static str,
  pub owner: MethodKind,
  pub callbacks: Positions,
  pub shape: CallbackShape,
  /// Registers a resource-release callback. Release and acquire sides are
  /// separate rows with separate capture points.
  pub disposer: bool,
  /// Absence of this method is a setup failure rather than a skip.
  pub required: bool,
}

impl PatchEntry {
  const fn continuation(
    name: &'static str,
    owner: MethodKind,
    callbacks: &'static [usize],
  ) -> PatchEntry {
    PatchEntry {
      name,
      owner,
      callbacks: Positions::At(callbacks),
      shape: CallbackShape::Single,
      disposer: false,
      required: false,
    }
  }

  /// Value-intake methods carry no callbacks; the row exists so the
  /// catalogue names every patched entry point.
  const fn intake(name: &'static str, owner: MethodKind) -> PatchEntry {
    Self::continuation(name, owner, &[])
  }
}

/// The fixed catalogue of context-sensitive entry points. Supporting a new
/// method is one more row here, not new control flow in the patcher.
///
/// Synchronous-intake methods (the `attempt` family) have no row on
/// purpose: they invoke their function argument in the registration turn,
/// so context is preserved without any binding and a wrap would surface as
/// a spurious bind on a synchronously-run callback.
pub const PATCH_TABLE: &[PatchEntry] = &[
  PatchEntry {
    required: true,
    ..PatchEntry::continuation("then", MethodKind::Proto, &[0, 1])
  },
  PatchEntry::continuation("catch", MethodKind::Proto, &[0]),
  PatchEntry::continuation("finally", MethodKind::Proto, &[0]),
  PatchEntry::continuation("tap", MethodKind::Proto, &[0]),
  PatchEntry::continuation("done", MethodKind::Proto, &[0, 1]),
  PatchEntry::continuation("map", MethodKind::Proto, &[0]),
  PatchEntry::continuation("each", MethodKind::Proto, &[0]),
  PatchEntry::intake("all", MethodKind::Proto),
  PatchEntry {
    disposer: true,
    ..PatchEntry::continuation("disposer", MethodKind::Proto, &[0])
  },
  PatchEntry::intake("resolve", MethodKind::Static),
  PatchEntry::intake("reject", MethodKind::Static),
  PatchEntry::intake("all", MethodKind::Static),
  PatchEntry::continuation("map", MethodKind::Static, &[1]),
  PatchEntry {
    name: "using",
    owner: MethodKind::Static,
    callbacks: Positions::Trailing,
    shape: CallbackShape::Single,
    disposer: true,
    required: false,
  },
];
