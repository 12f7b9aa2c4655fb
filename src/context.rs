use crate::error::ChainError;

use std::fmt;
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, error, info, info_span, trace, Instrument};

/// A callback run by a `Scheduler` after the current execution turn.
pub type Deferral = Box<dyn FnOnce() + Send + 'static>;

/// Invoked with an error nobody handled locally.
pub type ErrorHook = Arc<dyn Fn(ChainError) + Send + Sync + 'static>;

/// Runs a callback after the current execution turn, with no enforced delay.
pub trait Scheduler: Send + Sync {
  fn defer(&self, callback: Deferral);
}

/// Defers onto a tokio runtime by spawning a task.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
  tokio_handle: TokioHandle,
}

impl TokioScheduler {
  pub fn new(tokio_handle: TokioHandle) -> Self {
    Self { tokio_handle }
  }
}

impl Scheduler for TokioScheduler {
  fn defer(&self, callback: Deferral) {
    self.tokio_handle.spawn(
      async move {
        tokio::task::yield_now().await;
        callback();
      }
      .instrument(info_span!("chain_deferral")),
    );
  }
}

/// Defers onto a freshly spawned OS thread. Used when no tokio runtime is
/// available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
  fn defer(&self, callback: Deferral) {
    thread::spawn(callback);
  }
}

/// Shared configuration for a group of chains: where deferred work runs and
/// which hook receives unhandled rejections.
pub struct ChainContext {
  name: Arc<String>,
  scheduler: Arc<dyn Scheduler>,
  error_hook: RwLock<Option<ErrorHook>>,
}

impl fmt::Debug for ChainContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let has_hook = self.error_hook.try_read().map_or(false, |guard| guard.is_some());
    f.debug_struct("ChainContext")
      .field("name", &self.name)
      .field("has_error_hook", &has_hook)
      .finish_non_exhaustive()
  }
}

impl ChainContext {
  pub fn new(name: &str, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
    Arc::new(Self {
      name: Arc::new(name.to_string()),
      scheduler,
      error_hook: RwLock::new(None),
    })
  }

  pub fn with_tokio(name: &str, tokio_handle: TokioHandle) -> Arc<Self> {
    Self::new(name, Arc::new(TokioScheduler::new(tokio_handle)))
  }

  /// A context private to one chain: tokio scheduling on the current runtime
  /// if there is one, a plain thread otherwise.
  pub fn detached() -> Arc<Self> {
    match TokioHandle::try_current() {
      Ok(handle) => Self::with_tokio("detached", handle),
      Err(_) => {
        trace!("No tokio runtime in scope; detached context falls back to thread scheduling.");
        Self::new("detached", Arc::new(ThreadScheduler))
      }
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Installs the hook for unhandled rejections, replacing any previous one.
  pub fn set_error_hook(&self, hook: impl Fn(ChainError) + Send + Sync + 'static) {
    *self.error_hook.write() = Some(Arc::new(hook));
    info!(context = %*self.name, "Error hook installed.");
  }

  pub fn clear_error_hook(&self) {
    *self.error_hook.write() = None;
    debug!(context = %*self.name, "Error hook cleared.");
  }

  pub fn has_error_hook(&self) -> bool {
    self.error_hook.read().is_some()
  }

  pub(crate) fn defer(&self, callback: Deferral) {
    self.scheduler.defer(callback);
  }

  /// Delivers an error that no local handler picked up.
  ///
  /// # Panics
  /// Panics with `ChainError::Unhandled` when no error hook is installed.
  /// The panic happens inside the scheduler's deferred callback, not in the
  /// code that built the chain. With `TokioScheduler` it ends the spawned
  /// deferral task and is only visible through the runtime's panic output
  /// (the `JoinHandle` is not kept). With `ThreadScheduler` it ends the
  /// spawned thread. Install an error hook to observe these errors.
  pub(crate) fn report_unhandled(&self, chain_id: u64, reason: ChainError) {
    let hook = self.error_hook.read().clone();
    match hook {
      Some(hook) => {
        debug!(context = %*self.name, %chain_id, "Escalating unhandled rejection to error hook.");
        hook(reason);
      }
      None => {
        let unhandled = ChainError::Unhandled(Box::new(reason));
        error!(context = %*self.name, %chain_id, "{}", unhandled);
        panic!("{}", unhandled);
      }
    }
  }
}
