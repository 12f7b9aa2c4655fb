use futures_chain::{tasks, Chain, ChainContext, ChainError, Step, Value};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

fn failing_step() -> Step {
  Step::new(|_| Err(ChainError::failed("the third step could not reach its backend")))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Error Escalation Example ---");

  let context = ChainContext::with_tokio("escalation_demo", Handle::current());
  context.set_error_hook(|error| warn!("Error hook caught an unhandled rejection: {}", error));

  // Handled locally: the rejection handler sees the error right away.
  let handled = Chain::with_context(context.clone(), tasks![]);
  handled
    .then(Step::new(|_| Ok(Value::from(1))))
    .then_or(failing_step(), |error| info!("Local handler: {}", error))
    .process();
  info!("Handled chain status: {}", handled.status());

  // Late handler: attached after the failure but within the same turn.
  let late = Chain::with_context(context.clone(), tasks![failing_step()]);
  late.catch(|error| info!("Late handler: {}", error));

  // Unhandled: nobody attaches a handler, so the context's hook gets it.
  let unhandled = Chain::with_context(context.clone(), tasks![1, 2, failing_step(), 4]);
  info!("Unhandled chain status: {}", unhandled.status());

  tokio::time::sleep(Duration::from_millis(50)).await;
  info!("--- Error Escalation Example End ---");
}
