// Copyright 2026 the Strand authors. MIT license.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Job = Box<dyn FnOnce()>;

/// Single-threaded cooperative job queue: the event loop every promise in
/// a test shares. All suspension in the fixture library funnels through
/// here; jobs run with no ambient context unless a bound callback restores
/// one, which is exactly the boundary the engine exists to bridge.
#[derive(Clone, Default)]
pub struct Runtime {
  queue: Rc<RefCell<VecDeque<Job>>>,
}

impl Runtime {
  pub fn new() -> Runtime {
    Runtime::default()
  }

  /// Schedule `job` for a later turn.
  pub fn defer(&self, job: impl FnOnce() + 'static) {
    self.queue.borrow_mut().push_back(Box::new(job));
  }

  /// Drain jobs in FIFO order until the queue stays empty. Jobs may
  /// enqueue further jobs.
  pub fn run_until_idle(&self) {
    loop {
      let job = self.queue.borrow_mut().pop_front();
      match job {
        Some(job) => job(),
        None => break,
      }
    }
  }

  pub fn is_idle(&self) -> bool {
    self.queue.borrow().is_empty()
  }
}
