use crate::error::ChainError;
use crate::value::Value;

use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tracing::{trace, warn};

/// Callback handed to a thenable, invoked once with the settled argument list.
pub type Continuation = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

/// The "thenable" capability: anything that accepts a single continuation and
/// eventually calls it with a result.
///
/// A chain suspends on any step result that is a `Value::Thenable` and resumes
/// when the continuation fires. Implementations decide when (and whether) that
/// happens; a continuation that is never called leaves the chain pending.
pub trait Thenable: Send + Sync {
  fn register_continuation(&self, continuation: Continuation);
}

enum DeferredState {
  Waiting(Vec<Continuation>),
  Settled(Vec<Value>),
}

/// A settable thenable.
///
/// Clones share the same slot. Continuations registered before `resolve` are
/// queued and run by the resolving call; those registered afterwards run
/// immediately with a clone of the settled values.
#[derive(Clone)]
pub struct Deferred {
  state: Arc<Mutex<DeferredState>>,
}

impl Deferred {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(DeferredState::Waiting(Vec::new()))),
    }
  }

  /// Creates a deferred that is already settled with `args`.
  pub fn resolved(args: Vec<Value>) -> Self {
    Self {
      state: Arc::new(Mutex::new(DeferredState::Settled(args))),
    }
  }

  /// Spawns `future` on the given runtime and settles the deferred with its
  /// output. The future starts running immediately, whether or not anything
  /// awaits the deferred.
  pub fn from_future<F>(tokio_handle: &TokioHandle, future: F) -> Self
  where
    F: Future<Output = Value> + Send + 'static,
  {
    let deferred = Self::new();
    let resolver = deferred.clone();
    tokio_handle.spawn(async move {
      let value = future.await;
      resolver.resolve(vec![value]);
    });
    deferred
  }

  /// Settles the deferred. Returns `false` (and changes nothing) if it was
  /// already settled.
  pub fn resolve(&self, args: Vec<Value>) -> bool {
    let waiters = {
      let mut state = self.state.lock();
      match &mut *state {
        DeferredState::Settled(_) => {
          warn!("Deferred: resolve called on an already settled deferred, ignoring.");
          return false;
        }
        DeferredState::Waiting(waiters) => {
          let waiters = mem::take(waiters);
          *state = DeferredState::Settled(args.clone());
          waiters
        }
      }
    };

    trace!(waiters = waiters.len(), "Deferred: settled, running continuations.");
    for continuation in waiters {
      continuation(args.clone());
    }
    true
  }

  pub fn is_settled(&self) -> bool {
    matches!(&*self.state.lock(), DeferredState::Settled(_))
  }
}

impl Default for Deferred {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Deferred {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    match &*state {
      DeferredState::Waiting(waiters) => f
        .debug_struct("Deferred")
        .field("settled", &false)
        .field("waiters", &waiters.len())
        .finish(),
      DeferredState::Settled(args) => f
        .debug_struct("Deferred")
        .field("settled", &true)
        .field("args", args)
        .finish(),
    }
  }
}

impl Thenable for Deferred {
  fn register_continuation(&self, continuation: Continuation) {
    let settled = {
      let mut state = self.state.lock();
      match &mut *state {
        DeferredState::Waiting(waiters) => {
          waiters.push(continuation);
          return;
        }
        DeferredState::Settled(args) => args.clone(),
      }
    };
    continuation(settled);
  }
}

impl From<Deferred> for Value {
  fn from(deferred: Deferred) -> Self {
    Value::thenable(deferred)
  }
}

/// Awaits any thenable from async code, yielding the argument list it
/// settles with.
///
/// # Errors
/// Returns `ChainError::ContinuationDropped` if the thenable drops the
/// continuation without ever calling it.
pub async fn settled(thenable: &dyn Thenable) -> Result<Vec<Value>, ChainError> {
  let (tx, rx) = oneshot::channel::<Vec<Value>>();
  thenable.register_continuation(Box::new(move |args| {
    if tx.send(args).is_err() {
      trace!("settled(): receiver dropped before the thenable settled.");
    }
  }));
  rx.await.map_err(|_| ChainError::ContinuationDropped)
}
