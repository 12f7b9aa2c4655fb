use crate::error::ChainError;
use crate::thenable::Thenable;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type StepFn = dyn Fn(&Value, Vec<Value>) -> Result<Value, ChainError> + Send + Sync + 'static;

/// A shareable callable that can sit in a chain's queue.
///
/// The first argument is the invocation context (the value bound as
/// `context` in a `Task::Invocable`), the second the assembled argument list.
#[derive(Clone)]
pub struct Step(Arc<StepFn>);

impl Step {
  /// Wraps a callable that does not care about its invocation context.
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(Vec<Value>) -> Result<Value, ChainError> + Send + Sync + 'static,
  {
    Step(Arc::new(move |_context: &Value, args: Vec<Value>| f(args)))
  }

  /// Wraps a callable that receives its invocation context.
  pub fn with_context<F>(f: F) -> Self
  where
    F: Fn(&Value, Vec<Value>) -> Result<Value, ChainError> + Send + Sync + 'static,
  {
    Step(Arc::new(f))
  }

  pub fn invoke(&self, context: &Value, args: Vec<Value>) -> Result<Value, ChainError> {
    (self.0)(context, args)
  }

  pub fn ptr_eq(&self, other: &Step) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Step({:p})", Arc::as_ptr(&self.0))
  }
}

/// A dynamically typed value flowing through a chain: queue items, step
/// arguments, step results and settled thenable values are all `Value`s.
#[derive(Clone, Default)]
pub enum Value {
  #[default]
  Undefined,
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
  Function(Step),
  Thenable(Arc<dyn Thenable>),
}

impl Value {
  pub fn list<I, T>(items: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
  {
    Value::List(items.into_iter().map(Into::into).collect())
  }

  pub fn map<I, K, T>(entries: I) -> Self
  where
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Into<Value>,
  {
    Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  pub fn thenable(thenable: impl Thenable + 'static) -> Self {
    Value::Thenable(Arc::new(thenable))
  }

  pub fn is_undefined(&self) -> bool {
    matches!(self, Value::Undefined)
  }

  pub fn is_callable(&self) -> bool {
    matches!(self, Value::Function(_))
  }

  /// Looks up a key on a `Map` value; `None` for every other variant.
  pub fn get(&self, key: &str) -> Option<&Value> {
    match self {
      Value::Map(entries) => entries.get(key),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Float(a), Value::Float(b)) => a == b,
      (Value::Str(a), Value::Str(b)) => a == b,
      (Value::List(a), Value::List(b)) => a == b,
      (Value::Map(a), Value::Map(b)) => a == b,
      (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
      (Value::Thenable(a), Value::Thenable(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
      _ => false,
    }
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Undefined => f.write_str("undefined"),
      Value::Null => f.write_str("null"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Int(n) => write!(f, "{n}"),
      Value::Float(x) => write!(f, "{x}"),
      Value::Str(s) => write!(f, "{s:?}"),
      Value::List(items) => f.debug_list().entries(items).finish(),
      Value::Map(entries) => f.debug_map().entries(entries).finish(),
      Value::Function(step) => write!(f, "{step:?}"),
      Value::Thenable(t) => write!(f, "Thenable({:p})", Arc::as_ptr(t)),
    }
  }
}

impl From<()> for Value {
  fn from(_: ()) -> Self {
    Value::Undefined
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Int(n.into())
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Int(n)
  }
}

impl From<u32> for Value {
  fn from(n: u32) -> Self {
    Value::Int(n.into())
  }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self {
    Value::Float(x)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Str(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Str(s)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(items: Vec<T>) -> Self {
    Value::list(items)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(value: Option<T>) -> Self {
    value.map_or(Value::Null, Into::into)
  }
}

impl From<Step> for Value {
  fn from(step: Step) -> Self {
    Value::Function(step)
  }
}

impl From<Arc<dyn Thenable>> for Value {
  fn from(thenable: Arc<dyn Thenable>) -> Self {
    Value::Thenable(thenable)
  }
}
