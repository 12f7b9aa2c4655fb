use crate::thenable::Thenable;
use crate::value::{Step, Value};

use std::fmt;
use std::sync::Arc;

/// One queued unit of work.
#[derive(Clone)]
pub enum Task {
  /// Passed through unchanged as the step result.
  Value(Value),
  /// Invoked with `bound_args` followed by the forwarded arguments.
  Invocable {
    step: Step,
    context: Value,
    bound_args: Vec<Value>,
  },
  /// Awaited before the queue advances.
  Awaitable(Arc<dyn Thenable>),
}

impl Task {
  pub fn step(step: Step) -> Self {
    Task::Invocable {
      step,
      context: Value::Undefined,
      bound_args: Vec::new(),
    }
  }

  /// The `[fn, context, arg1, arg2, ...]` invocation shape.
  pub fn bound<I, T>(step: Step, context: impl Into<Value>, bound_args: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
  {
    Task::Invocable {
      step,
      context: context.into(),
      bound_args: bound_args.into_iter().map(Into::into).collect(),
    }
  }

  /// Normalizes a raw value into its task shape.
  ///
  /// A list whose head is callable becomes an `Invocable` with the second
  /// element as context and the rest as bound arguments. Every other list is
  /// a plain value.
  pub fn from_value(value: Value) -> Self {
    match value {
      Value::Function(step) => Task::step(step),
      Value::Thenable(thenable) => Task::Awaitable(thenable),
      Value::List(items) => invocation_record(items).unwrap_or_else(|items| Task::Value(Value::List(items))),
      other => Task::Value(other),
    }
  }

  pub fn is_invocable(&self) -> bool {
    matches!(self, Task::Invocable { .. })
  }

  /// An invocable with no context and no bound arguments, as a plain
  /// function task would be.
  pub fn is_bare_step(&self) -> bool {
    match self {
      Task::Invocable {
        context, bound_args, ..
      } => context.is_undefined() && bound_args.is_empty(),
      _ => false,
    }
  }

  pub(crate) fn kind(&self) -> &'static str {
    match self {
      Task::Value(_) => "value",
      Task::Invocable { .. } => "invocable",
      Task::Awaitable(_) => "awaitable",
    }
  }
}

fn invocation_record(items: Vec<Value>) -> Result<Task, Vec<Value>> {
  let mut items = items.into_iter();
  match items.next() {
    Some(Value::Function(step)) => {
      let context = items.next().unwrap_or_default();
      Ok(Task::Invocable {
        step,
        context,
        bound_args: items.collect(),
      })
    }
    Some(head) => Err(std::iter::once(head).chain(items).collect()),
    None => Err(Vec::new()),
  }
}

impl<T: Into<Value>> From<T> for Task {
  fn from(value: T) -> Self {
    Task::from_value(value.into())
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Task::Value(v) => f.debug_tuple("Value").field(v).finish(),
      Task::Invocable {
        step,
        context,
        bound_args,
      } => f
        .debug_struct("Invocable")
        .field("step", step)
        .field("context", context)
        .field("bound_args", bound_args)
        .finish(),
      Task::Awaitable(t) => write!(f, "Awaitable({:p})", Arc::as_ptr(t)),
    }
  }
}

/// Builds a `Vec<Task>` from heterogeneous items, each converted with `Task::from`.
#[macro_export]
macro_rules! tasks {
  () => {
    ::std::vec::Vec::<$crate::Task>::new()
  };
  ($($item:expr),+ $(,)?) => {
    ::std::vec![$($crate::Task::from($item)),+]
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  fn echo() -> Step {
    Step::new(|args| Ok(Value::List(args)))
  }

  #[test]
  fn bare_function_normalizes_to_unbound_invocable() {
    let step = echo();
    match Task::from(step.clone()) {
      Task::Invocable {
        step: s,
        context,
        bound_args,
      } => {
        assert!(s.ptr_eq(&step));
        assert!(context.is_undefined());
        assert!(bound_args.is_empty());
      }
      other => panic!("expected invocable, got {:?}", other),
    }
  }

  #[test]
  fn list_with_callable_head_splits_context_and_bound_args() {
    let step = echo();
    let ctx = Value::map([("me", Value::list([1]))]);
    let task = Task::from(Value::List(vec![
      Value::Function(step.clone()),
      ctx.clone(),
      Value::from(2),
      Value::from("arg"),
    ]));
    match task {
      Task::Invocable {
        context, bound_args, ..
      } => {
        assert_eq!(context, ctx);
        assert_eq!(bound_args, vec![Value::from(2), Value::from("arg")]);
      }
      other => panic!("expected invocable, got {:?}", other),
    }
  }

  #[test]
  fn list_with_only_callable_has_undefined_context() {
    let task = Task::from(Value::List(vec![Value::Function(echo())]));
    match task {
      Task::Invocable {
        context, bound_args, ..
      } => {
        assert!(context.is_undefined());
        assert!(bound_args.is_empty());
      }
      other => panic!("expected invocable, got {:?}", other),
    }
  }

  #[test]
  fn plain_lists_and_scalars_stay_values() {
    assert!(matches!(Task::from(Value::list([1, 2])), Task::Value(_)));
    assert!(matches!(Task::from(Value::List(vec![])), Task::Value(_)));
    assert!(matches!(Task::from(0), Task::Value(Value::Int(0))));
    assert!(matches!(Task::from(()), Task::Value(Value::Undefined)));
    // Callable in a non-head position does not make an invocation record.
    let task = Task::from(Value::List(vec![Value::from(1), Value::Function(echo())]));
    assert!(!task.is_invocable());
  }

  #[test]
  fn only_unbound_invocables_are_bare_steps() {
    assert!(Task::from(echo()).is_bare_step());
    assert!(!Task::bound(echo(), Value::Null, Vec::<Value>::new()).is_bare_step());
    assert!(!Task::bound(echo(), (), ["x"]).is_bare_step());
    assert!(!Task::from(1).is_bare_step());
  }

  #[test]
  fn tasks_macro_accepts_mixed_items() {
    let list = tasks![1, "two", echo(), Value::Null];
    assert_eq!(list.len(), 4);
    assert!(list[2].is_invocable());
    assert!(tasks![].is_empty());
  }
}
