//! The dynamic value store.
//!
//! The VM treats values through a small interface: get/set/push/iterate/
//! clone. Scalars are strings, numbers included: arithmetic parses and
//! reformats them. Containers are shared by reference so a value passed
//! over a channel keeps its identity across instances, which is why the
//! container payloads are `Arc<Mutex<..>>` rather than `Rc<RefCell<..>>`.

pub mod native;

use std::io::BufReader;
use std::sync::{Arc, Condvar, Mutex};

use crossbeam::channel::{Receiver, Sender};
use indexmap::IndexMap;

use crate::error::Fault;
use crate::vm::program::Program;

/// Hash values iterate in insertion order.
pub type HashMapping = IndexMap<String, Value, ahash::RandomState>;

/// One scope's identifier-to-value table.
pub type Frame = IndexMap<String, Value, ahash::RandomState>;

/// A native (host-bound) function. Receives the implicit receiver, if the
/// call was resolved through the type dispatch table, and the evaluated
/// argument list.
pub type NativeFn = fn(Option<&Value>, &[Value]) -> Result<Value, Fault>;

/// One endpoint of a bidirectional channel pair.
pub struct ChannelEnd {
    pub tx: Sender<Value>,
    pub rx: Receiver<Value>,
}

impl ChannelEnd {
    /// Build a crossed pair: what one endpoint sends, the other receives.
    pub fn pair() -> (ChannelEnd, ChannelEnd) {
        let (a_tx, b_rx) = crossbeam::channel::unbounded();
        let (b_tx, a_rx) = crossbeam::channel::unbounded();
        (
            ChannelEnd { tx: a_tx, rx: a_rx },
            ChannelEnd { tx: b_tx, rx: b_rx },
        )
    }
}

/// A script-visible mutex handle: blocking lock, blocking-free unlock.
pub struct Gate {
    locked: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn lock(&self) {
        let mut locked = self.locked.lock().unwrap();
        while *locked {
            locked = self.cv.wait(locked).unwrap();
        }
        *locked = true;
    }

    pub fn unlock(&self) {
        let mut locked = self.locked.lock().unwrap();
        *locked = false;
        self.cv.notify_one();
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// A script-visible counting semaphore: blocking wait, non-blocking post.
pub struct Counter {
    count: Mutex<i64>,
    cv: Condvar,
}

impl Counter {
    pub fn new(initial: i64) -> Self {
        Self {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count <= 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }
}

/// An open file handle, line-readable from scripts and accepted as a
/// compile source.
pub struct FileHandle {
    pub path: String,
    pub reader: Option<BufReader<std::fs::File>>,
}

/// A dynamic value.
#[derive(Clone)]
pub enum Value {
    Null,
    Str(String),
    Array(Arc<Mutex<Vec<Value>>>),
    Hash(Arc<Mutex<HashMapping>>),
    /// Compiled bytecode plus an entry offset. Carries no environment:
    /// free identifiers resolve against the caller's frames at call time.
    Exec(Arc<Program>, usize),
    Native(&'static str, NativeFn),
    File(Arc<Mutex<FileHandle>>),
    Channel(Arc<ChannelEnd>),
    Mutex(Arc<Gate>),
    Semaphore(Arc<Counter>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// A number, stored as its canonical string form.
    pub fn number(n: f64) -> Value {
        Value::Str(format_number(n))
    }

    /// Comparison results and truth values: `"1"` / `"0"`.
    pub fn bool(b: bool) -> Value {
        Value::Str(if b { "1" } else { "0" }.to_string())
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn hash(mapping: HashMapping) -> Value {
        Value::Hash(Arc::new(Mutex::new(mapping)))
    }

    pub fn empty_hash() -> Value {
        Value::hash(HashMapping::default())
    }

    /// The truthiness rule: a value is false iff it is null, the empty
    /// string, or exactly the one-character string "0". Everything else,
    /// containers and handles included, is true.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Str(s) => !(s.is_empty() || s == "0"),
            _ => true,
        }
    }

    /// Numeric view of a value; non-numeric values read as 0.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn to_int(&self) -> i64 {
        self.to_number() as i64
    }

    /// Runtime category name, also the key into the type dispatch table.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::Exec(..) => "exec",
            Value::Native(..) => "native",
            Value::File(_) => "file",
            Value::Channel(_) => "channel",
            Value::Mutex(_) => "mutex",
            Value::Semaphore(_) => "semaphore",
        }
    }

    /// Hash key form of a value.
    pub fn as_key(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Deep copy: containers are cloned element-wise, everything else is a
    /// reference clone. Literal container operands are pushed through this
    /// so every execution builds a fresh container.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(items) => {
                let items = items.lock().unwrap();
                Value::array(items.iter().map(Value::deep_clone).collect())
            }
            Value::Hash(mapping) => {
                let mapping = mapping.lock().unwrap();
                let copied: HashMapping = mapping
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect();
                Value::hash(copied)
            }
            other => other.clone(),
        }
    }
}

/// Canonical string form of a number: integral values print with no
/// fraction, everything else uses the shortest round-trip float form.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    /// Deep value equality. Null equals only null; container comparison
    /// follows references before falling back to element-wise comparison;
    /// opaque handles compare by identity.
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock().unwrap();
                let b = b.lock().unwrap();
                *a == *b
            }
            (Value::Hash(a), Value::Hash(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock().unwrap();
                let b = b.lock().unwrap();
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Exec(a, ea), Value::Exec(b, eb)) => Arc::ptr_eq(a, b) && ea == eb,
            (Value::Native(_, a), Value::Native(_, b)) => *a as usize == *b as usize,
            (Value::File(a), Value::File(b)) => Arc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => Arc::ptr_eq(a, b),
            (Value::Mutex(a), Value::Mutex(b)) => Arc::ptr_eq(a, b),
            (Value::Semaphore(a), Value::Semaphore(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let items = items.lock().unwrap();
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Hash(mapping) => {
                let mapping = mapping.lock().unwrap();
                write!(f, "{{")?;
                for (i, (k, v)) in mapping.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Exec(_, entry) => write!(f, "<sub@{}>", entry),
            Value::Native(name, _) => write!(f, "<native {}>", name),
            Value::File(handle) => {
                let handle = handle.lock().unwrap();
                write!(f, "<file {}>", handle.path)
            }
            Value::Channel(_) => write!(f, "<channel>"),
            Value::Mutex(_) => write!(f, "<mutex>"),
            Value::Semaphore(_) => write!(f, "<semaphore>"),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness_rule() {
        assert!(!Value::Null.is_true());
        assert!(!Value::str("").is_true());
        assert!(!Value::str("0").is_true());
        // Only the exact string "0" is false; other spellings of zero are true.
        assert!(Value::str("0.0").is_true());
        assert!(Value::str("00").is_true());
        assert!(Value::str("x").is_true());
        assert!(Value::array(vec![]).is_true());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(14.0), "14");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.0), "0");
    }

    #[test]
    fn test_null_equals_only_null() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::str(""));
        assert_ne!(Value::str(""), Value::Null);
    }

    #[test]
    fn test_deep_array_equality() {
        let a = Value::array(vec![Value::str("1"), Value::str("2")]);
        let b = Value::array(vec![Value::str("1"), Value::str("2")]);
        assert_eq!(a, b);
        assert_ne!(a, Value::array(vec![Value::str("1")]));
    }

    #[test]
    fn test_deep_clone_is_detached() {
        let a = Value::array(vec![Value::str("1")]);
        let b = a.deep_clone();
        if let Value::Array(items) = &a {
            items.lock().unwrap().push(Value::str("2"));
        }
        assert_eq!(b, Value::array(vec![Value::str("1")]));
    }

    #[test]
    fn test_channel_pair_is_crossed() {
        let (a, b) = ChannelEnd::pair();
        a.tx.send(Value::str("ping")).unwrap();
        assert_eq!(b.rx.recv().unwrap(), Value::str("ping"));
        b.tx.send(Value::str("pong")).unwrap();
        assert_eq!(a.rx.recv().unwrap(), Value::str("pong"));
    }
}
