use futures_chain::{settled, tasks, Chain, Continuation, Deferred, Step, Task, Thenable, Value};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn do_async_task() {
  tokio::time::sleep(Duration::from_millis(100)).await;
}

// Starts task `n` right away and returns a deferred that settles when it finishes.
fn promise_generator(n: i64) -> Deferred {
  info!("Task {}: start", n);
  Deferred::from_future(&Handle::current(), async move {
    do_async_task().await;
    info!("Task {}: done", n);
    Value::Undefined
  })
}

/// A hand-rolled thenable: settles whoever registered with it once its work is done.
struct TaskThenable {
  done: Deferred,
}

impl Thenable for TaskThenable {
  fn register_continuation(&self, continuation: Continuation) {
    self.done.register_continuation(continuation);
  }
}

fn thenable_generator(n: i64) -> TaskThenable {
  info!("Task {}: start", n);
  let done = Deferred::new();
  let resolver = done.clone();
  tokio::spawn(async move {
    do_async_task().await;
    info!("Task {}: done", n);
    resolver.resolve(vec![Value::Undefined]);
  });
  TaskThenable { done }
}

fn task_number(args: &[Value]) -> i64 {
  args.first().and_then(Value::as_int).unwrap_or_default()
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let some_condition = true;
  let other_condition = true;

  let promise_step = Step::new(|args| Ok(promise_generator(task_number(&args)).into()));
  let thenable_step = Step::new(|args| Ok(Value::thenable(thenable_generator(task_number(&args)))));

  let chain = Chain::new(tasks![promise_generator(1)]);

  if some_condition {
    chain.then(Task::bound(promise_step, Value::Null, [2]));
  }

  chain.then(Step::new(|_| {
    info!("Task 3: start");
    Ok(
      Deferred::from_future(&Handle::current(), async {
        do_async_task().await;
        info!("Task 3: done");
        // Settle only once task 4 has run as well.
        let task_four = promise_generator(4);
        let _ = settled(&task_four).await;
        Value::Undefined
      })
      .into(),
    )
  }));

  if other_condition {
    chain.then(Task::bound(thenable_step, Value::Null, [5]));
  }

  let all_done = Deferred::new();
  let finished = all_done.clone();
  chain.then(Step::new(move |_| {
    info!("All done");
    finished.resolve(vec![]);
    Ok(Value::Undefined)
  }));

  if let Err(e) = settled(&all_done).await {
    tracing::error!("Chain did not finish: {}", e);
  }
  info!("Final status: {}", chain.status());
  info!("--- Basic Usage Example End ---");
}
