use crate::context::ChainContext;
use crate::error::ChainError;
use crate::task::Task;
use crate::thenable::{Continuation, Thenable};
use crate::value::{Step, Value};

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, trace_span, warn};

lazy_static::lazy_static! {
  static ref NEXT_CHAIN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Invoked with the reason of a rejected chain.
pub type RejectionHandler = Arc<dyn Fn(ChainError) + Send + Sync + 'static>;

/// Lifecycle state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainStatus {
  /// The only state in which the queue is drained.
  Pending,
  /// The queue ran dry. Adding tasks resumes the chain.
  Fulfilled,
  /// A step failed. Terminal.
  Rejected,
  /// `cancel()` was called. Terminal.
  Canceled,
}

impl ChainStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChainStatus::Pending => "pending",
      ChainStatus::Fulfilled => "fulfilled",
      ChainStatus::Rejected => "rejected",
      ChainStatus::Canceled => "canceled",
    }
  }
}

impl fmt::Display for ChainStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

struct ChainState {
  status: ChainStatus,
  reason: Option<ChainError>,
  queue: VecDeque<Task>,
  rejection_handler: Option<RejectionHandler>,
  // Set once a handler has seen the current reason, so the deferred
  // re-check does not deliver it twice.
  rejection_delivered: bool,
}

struct ChainInner {
  chain_id: u64,
  context: Arc<ChainContext>,
  cancellation_token: CancellationToken,
  state: Mutex<ChainState>,
}

/// An ordered task executor with promise-style chaining.
///
/// Tasks run strictly one at a time, front of the queue first. Each step's
/// result feeds the next step's arguments, and a step that yields a thenable
/// suspends the chain until it settles. `Chain` is a handle: clones share the
/// same queue and state.
#[derive(Clone)]
pub struct Chain {
  inner: Arc<ChainInner>,
}

impl Chain {
  /// Creates a chain on its own detached context and starts draining
  /// `tasks` right away if there are any.
  pub fn new<I, T>(tasks: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Task>,
  {
    Self::with_context(ChainContext::detached(), tasks)
  }

  pub fn with_context<I, T>(context: Arc<ChainContext>, tasks: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Task>,
  {
    let queue: VecDeque<Task> = tasks.into_iter().map(Into::into).collect();
    let start = !queue.is_empty();
    let chain_id = NEXT_CHAIN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);

    let chain = Self {
      inner: Arc::new(ChainInner {
        chain_id,
        context,
        cancellation_token: CancellationToken::new(),
        state: Mutex::new(ChainState {
          status: ChainStatus::Pending,
          reason: None,
          queue,
          rejection_handler: None,
          rejection_delivered: false,
        }),
      }),
    };

    debug!(
      context = %chain.inner.context.name(),
      %chain_id,
      queued = chain.queued_task_count(),
      "Chain created."
    );

    if start {
      chain.run(Vec::new());
    }
    chain
  }

  pub fn id(&self) -> u64 {
    self.inner.chain_id
  }

  pub fn context(&self) -> &Arc<ChainContext> {
    &self.inner.context
  }

  pub fn status(&self) -> ChainStatus {
    self.inner.state.lock().status
  }

  pub fn is_canceled(&self) -> bool {
    self.status() == ChainStatus::Canceled
  }

  /// The error that rejected the chain, if it was rejected.
  pub fn reason(&self) -> Option<ChainError> {
    self.inner.state.lock().reason.clone()
  }

  pub fn queued_task_count(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  /// Token cancelled by `cancel()`, for steps that want to stop cooperatively.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.inner.cancellation_token.clone()
  }

  /// Whether both handles refer to the same chain.
  pub fn ptr_eq(&self, other: &Chain) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Queues `on_fulfilled`, or calls it right away with no arguments if the
  /// chain is already fulfilled and it is a bare step.
  ///
  /// `Value::Undefined` queues nothing. Bound `[fn, ctx, ...args]` records are
  /// always queued. A task queued this way does not start a pending chain;
  /// use `process`.
  /// On a rejected chain that has a rejection handler, the handler is called
  /// again with the reason and nothing is queued.
  pub fn then(&self, on_fulfilled: impl Into<Task>) -> &Self {
    self.then_inner(Some(on_fulfilled.into()), None)
  }

  /// `then` with a rejection handler, which replaces any existing one.
  pub fn then_or<F>(&self, on_fulfilled: impl Into<Task>, on_rejected: F) -> &Self
  where
    F: Fn(ChainError) + Send + Sync + 'static,
  {
    self.then_inner(Some(on_fulfilled.into()), Some(Arc::new(on_rejected)))
  }

  /// Replaces the rejection handler and calls it immediately if the chain is
  /// already rejected.
  pub fn catch<F>(&self, on_rejected: F) -> &Self
  where
    F: Fn(ChainError) + Send + Sync + 'static,
  {
    self.then_inner(None, Some(Arc::new(on_rejected)))
  }

  /// Appends `tasks` to the queue. A fulfilled chain goes back to pending and
  /// resumes immediately; a rejected or canceled one only accumulates them.
  pub fn add<I, T>(&self, tasks: I) -> &Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Task>,
  {
    let resume = {
      let mut state = self.inner.state.lock();
      let before = state.queue.len();
      state.queue.extend(tasks.into_iter().map(Into::into));
      trace!(chain_id = %self.inner.chain_id, added = state.queue.len() - before, "Tasks appended.");
      if state.status == ChainStatus::Fulfilled {
        state.status = ChainStatus::Pending;
        true
      } else {
        false
      }
    };

    if resume {
      debug!(chain_id = %self.inner.chain_id, "Fulfilled chain received new tasks; resuming.");
      self.run(Vec::new());
    }
    self
  }

  /// `add` for dynamically typed input: a `Value::List` is appended item by
  /// item, anything else is ignored.
  pub fn add_value(&self, items: Value) -> &Self {
    match items {
      Value::List(items) => self.add(items),
      other => {
        trace!(chain_id = %self.inner.chain_id, ignored = ?other, "add_value: not a list, ignoring.");
        self
      }
    }
  }

  /// Runs the queue from its current front with no forwarded arguments.
  pub fn process(&self) -> &Self {
    self.run(Vec::new());
    self
  }

  /// Runs the queue from its current front, forwarding `args` to the first
  /// step.
  pub fn process_with<I, T>(&self, args: I) -> &Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
  {
    self.run(args.into_iter().map(Into::into).collect());
    self
  }

  /// Stops the chain for good. Queued tasks stay queued but never run, and a
  /// thenable already being awaited is left alone.
  pub fn cancel(&self) -> &Self {
    let previous = {
      let mut state = self.inner.state.lock();
      std::mem::replace(&mut state.status, ChainStatus::Canceled)
    };
    self.inner.cancellation_token.cancel();
    debug!(chain_id = %self.inner.chain_id, %previous, "Chain canceled.");
    self
  }

  fn then_inner(&self, on_fulfilled: Option<Task>, on_rejected: Option<RejectionHandler>) -> &Self {
    // An undefined callback is the same as passing none.
    let on_fulfilled = on_fulfilled.filter(|task| !matches!(task, Task::Value(Value::Undefined)));
    let mut state = self.inner.state.lock();
    if let Some(handler) = on_rejected {
      state.rejection_handler = Some(handler);
    }

    if state.status == ChainStatus::Rejected {
      let delivery = (state.rejection_handler.clone(), state.reason.clone());
      if let (Some(handler), Some(reason)) = delivery {
        state.rejection_delivered = true;
        drop(state);
        trace!(chain_id = %self.inner.chain_id, "Chain already rejected; calling rejection handler.");
        handler(reason);
        return self;
      }
    }

    match on_fulfilled {
      Some(task) if state.status == ChainStatus::Fulfilled && task.is_bare_step() => {
        drop(state);
        self.invoke_now(task);
      }
      Some(task) => {
        trace!(chain_id = %self.inner.chain_id, kind = task.kind(), "Task queued by then().");
        state.queue.push_back(task);
      }
      None => {}
    }
    self
  }

  // Calls a bare step outside the queue with no arguments; its result is
  // discarded.
  fn invoke_now(&self, task: Task) {
    if let Task::Invocable { step, .. } = task {
      trace!(chain_id = %self.inner.chain_id, "Chain already fulfilled; invoking callback immediately.");
      if let Err(reason) = self.invoke_step(&step, &Value::Undefined, Vec::new()) {
        self.reject(reason);
      }
    }
  }

  /// The execution loop. Drains the queue while the chain is pending,
  /// suspending on thenable results.
  fn run(&self, mut args: Vec<Value>) {
    loop {
      let task = {
        let mut state = self.inner.state.lock();
        if state.status != ChainStatus::Pending {
          trace!(chain_id = %self.inner.chain_id, status = %state.status, "Chain not pending; loop stops.");
          return;
        }
        match state.queue.pop_front() {
          Some(task) => task,
          None => {
            state.status = ChainStatus::Fulfilled;
            debug!(chain_id = %self.inner.chain_id, "Queue drained; chain fulfilled.");
            return;
          }
        }
      };

      trace!(chain_id = %self.inner.chain_id, kind = task.kind(), forwarded = args.len(), "Dequeued task.");

      // Static values and awaitables keep the forwarded arguments; a call
      // consumes them and forwards only its result.
      let (result, mut next_args) = match task {
        Task::Invocable {
          step,
          context,
          mut bound_args,
        } => {
          bound_args.extend(args);
          match self.invoke_step(&step, &context, bound_args) {
            Ok(value) => (value, Vec::new()),
            Err(reason) => {
              self.reject(reason);
              return;
            }
          }
        }
        Task::Value(value) => (value, args),
        Task::Awaitable(thenable) => (Value::Thenable(thenable), args),
      };

      match result {
        Value::Thenable(thenable) => {
          trace!(chain_id = %self.inner.chain_id, "Step produced a thenable; suspending.");
          let chain = self.clone();
          thenable.register_continuation(Box::new(move |settled| chain.run(settled)));
          return;
        }
        value => {
          next_args.push(value);
          args = next_args;
        }
      }
    }
  }

  fn invoke_step(&self, step: &Step, context: &Value, args: Vec<Value>) -> Result<Value, ChainError> {
    let _span = trace_span!("chain_step", chain_id = %self.inner.chain_id).entered();
    match panic::catch_unwind(AssertUnwindSafe(|| step.invoke(context, args))) {
      Ok(result) => result,
      Err(payload) => {
        let reason = ChainError::from_panic(payload);
        error!(chain_id = %self.inner.chain_id, "Step panicked: {}", reason);
        Err(reason)
      }
    }
  }

  fn reject(&self, reason: ChainError) {
    let handler = {
      let mut state = self.inner.state.lock();
      state.status = ChainStatus::Rejected;
      state.reason = Some(reason.clone());
      state.rejection_delivered = state.rejection_handler.is_some();
      state.rejection_handler.clone()
    };

    warn!(
      context = %self.inner.context.name(),
      chain_id = %self.inner.chain_id,
      error = %reason,
      "Chain rejected."
    );

    match handler {
      Some(handler) => handler(reason),
      None => self.escalate(reason),
    }
  }

  // No handler yet: look again on the next turn, then fall back to the
  // context's error hook.
  fn escalate(&self, reason: ChainError) {
    let inner = Arc::clone(&self.inner);
    self.inner.context.defer(Box::new(move || {
      let handler = {
        let mut state = inner.state.lock();
        if state.rejection_delivered {
          trace!(chain_id = %inner.chain_id, "Rejection already delivered to a handler; nothing to escalate.");
          return;
        }
        let handler = state.rejection_handler.clone();
        state.rejection_delivered = handler.is_some();
        handler
      };

      match handler {
        Some(handler) => {
          debug!(chain_id = %inner.chain_id, "Rejection handler attached within the turn; delivering.");
          handler(reason);
        }
        None => inner.context.report_unhandled(inner.chain_id, reason),
      }
    }));
  }
}

impl Thenable for Chain {
  /// Behaves like `then` with the continuation as a step: it runs at once
  /// (with no arguments) on a fulfilled chain, otherwise when the queue
  /// reaches it.
  fn register_continuation(&self, continuation: Continuation) {
    let slot = Mutex::new(Some(continuation));
    let step = Step::new(move |args| {
      if let Some(continuation) = slot.lock().take() {
        continuation(args);
      }
      Ok(Value::Undefined)
    });
    self.then_inner(Some(Task::step(step)), None);
  }
}

impl Default for Chain {
  fn default() -> Self {
    Self::new(Vec::<Task>::new())
  }
}

impl From<Chain> for Value {
  fn from(chain: Chain) -> Self {
    Value::thenable(chain)
  }
}

impl fmt::Debug for Chain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (status, queued) = self
      .inner
      .state
      .try_lock()
      .map_or((None, None), |state| (Some(state.status), Some(state.queue.len())));
    f.debug_struct("Chain")
      .field("chain_id", &self.inner.chain_id)
      .field("context", &self.inner.context.name())
      .field("status", &status)
      .field("queued", &queued)
      .finish()
  }
}
