//! A sequential task chain with promise-style chaining.
//!
//! A [`Chain`] drains an ordered queue of [`Task`]s one at a time: plain
//! values, callables, bound invocation records and anything implementing
//! [`Thenable`]. Each step's result is forwarded to the next, and a thenable
//! result suspends the chain until it settles. Failures reject the chain and
//! are escalated through its [`ChainContext`] when nobody handles them.

mod chain;
mod context;
mod error;
mod task;
mod thenable;
mod value;

pub use chain::{Chain, ChainStatus, RejectionHandler};
pub use context::{ChainContext, Deferral, ErrorHook, Scheduler, ThreadScheduler, TokioScheduler};
pub use error::ChainError;
pub use task::Task;
pub use thenable::{settled, Continuation, Deferred, Thenable};
pub use value::{Step, Value};
