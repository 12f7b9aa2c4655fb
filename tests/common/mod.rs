#![allow(dead_code)]

use futures_chain::{settled, ChainContext, ChainError, Deferral, Deferred, Scheduler, Step, Value};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

pub const ERROR_MESSAGE: &str = "throws_error() is called";

// Helper to initialize tracing for tests (call once per test run, not per test function)
pub fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_chain=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// A step that always fails with `ERROR_MESSAGE`.
pub fn throws_error() -> Step {
  Step::new(|_| Err(ChainError::failed(ERROR_MESSAGE)))
}

/// A step returning a thenable that settles after a short random delay.
///
/// Settles with its arguments wrapped in a single list, or with a lone
/// `undefined` when called without arguments (one value, like a promise).
pub fn wait_for() -> Step {
  Step::new(|args| {
    let delay_ms = rand::rng().random_range(20..60u64);
    let deferred = Deferred::new();
    let resolver = deferred.clone();
    tokio::runtime::Handle::current().spawn(async move {
      sleep(Duration::from_millis(delay_ms)).await;
      let settled_with = if args.is_empty() {
        vec![Value::Undefined]
      } else {
        vec![Value::List(args)]
      };
      resolver.resolve(settled_with);
    });
    Ok(deferred.into())
  })
}

/// A step that settles `done` with the arguments it receives.
pub fn finisher(done: &Deferred) -> Step {
  let done = done.clone();
  Step::new(move |args| {
    done.resolve(args);
    Ok(Value::Undefined)
  })
}

pub async fn wait_done(done: &Deferred) -> Vec<Value> {
  timeout(Duration::from_secs(5), settled(done))
    .await
    .expect("timed out waiting for the chain to finish")
    .expect("continuation dropped")
}

/// Records the argument list of every call.
#[derive(Clone, Default)]
pub struct Recorder {
  calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl Recorder {
  pub fn step(&self) -> Step {
    let calls = self.calls.clone();
    Step::new(move |args| {
      calls.lock().unwrap().push(args);
      Ok(Value::Undefined)
    })
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn last(&self) -> Option<Vec<Value>> {
    self.calls.lock().unwrap().last().cloned()
  }
}

/// Collects every error delivered to the handlers it hands out.
#[derive(Clone, Default)]
pub struct ErrorSink {
  errors: Arc<Mutex<Vec<ChainError>>>,
}

impl ErrorSink {
  pub fn handler(&self) -> impl Fn(ChainError) + Send + Sync + 'static {
    let errors = self.errors.clone();
    move |error| errors.lock().unwrap().push(error)
  }

  pub fn count(&self) -> usize {
    self.errors.lock().unwrap().len()
  }

  pub fn errors(&self) -> Vec<ChainError> {
    self.errors.lock().unwrap().clone()
  }
}

/// A scheduler that only runs deferrals when told to.
#[derive(Default)]
pub struct ManualScheduler {
  pending: Mutex<Vec<Deferral>>,
}

impl ManualScheduler {
  pub fn pending_count(&self) -> usize {
    self.pending.lock().unwrap().len()
  }

  pub fn run_pending(&self) {
    let callbacks = std::mem::take(&mut *self.pending.lock().unwrap());
    for callback in callbacks {
      callback();
    }
  }
}

impl Scheduler for ManualScheduler {
  fn defer(&self, callback: Deferral) {
    self.pending.lock().unwrap().push(callback);
  }
}

pub fn manual_context(name: &str) -> (Arc<ChainContext>, Arc<ManualScheduler>) {
  let scheduler = Arc::new(ManualScheduler::default());
  (ChainContext::new(name, scheduler.clone()), scheduler)
}
