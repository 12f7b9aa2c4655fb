use futures_chain::{settled, tasks, Chain, Deferred, Step, Value};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

fn slow_step(name: &'static str, delay_ms: u64) -> Step {
  Step::new(move |_| {
    info!("{}: starting, will take {}ms", name, delay_ms);
    Ok(
      Deferred::from_future(&Handle::current(), async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        info!("{}: finished", name);
        Value::from(name)
      })
      .into(),
    )
  })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Cancellation Example ---");

  let chain = Chain::new(tasks![
    slow_step("download", 200),
    slow_step("unpack", 200),
    slow_step("install", 200)
  ]);

  // A watcher that reacts to the chain's cancellation token.
  let token = chain.cancellation_token();
  let watcher = tokio::spawn(async move {
    token.cancelled().await;
    info!("Watcher: chain cancellation observed.");
  });

  tokio::time::sleep(Duration::from_millis(250)).await;
  info!("Cancelling chain while status is {}.", chain.status());
  chain.cancel();

  // The in-flight step still settles, but nothing after it runs.
  tokio::time::sleep(Duration::from_millis(300)).await;
  info!("Status after cancel: {}, queued tasks left: {}", chain.status(), chain.queued_task_count());

  // Adding more work does not revive a canceled chain.
  let never = Deferred::new();
  let never_resolver = never.clone();
  chain.add(tasks![Step::new(move |_| {
    never_resolver.resolve(vec![]);
    Ok(Value::Undefined)
  })]);
  let outcome = tokio::time::timeout(Duration::from_millis(100), settled(&never)).await;
  info!("Step added after cancel ran: {}", outcome.is_ok());

  let _ = watcher.await;
  info!("--- Cancellation Example End ---");
}
