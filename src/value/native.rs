//! Host-bound native functions: the built-in globals seeded into frame 0,
//! the per-type dispatch tables, and the `bincall` interop registry.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::error::Fault;
use crate::value::{Counter, FileHandle, Frame, Gate, NativeFn, Value};

lazy_static! {
    /// Externally-registered host functions, callable through `bincall` by
    /// their string key. Whatever a registered pointer does is the host's
    /// responsibility.
    static ref REGISTRY: Mutex<HashMap<String, NativeFn>> = Mutex::new(HashMap::new());

    /// Type-name-keyed method tables, consulted after every frame misses
    /// during symbol resolution when a receiver is present. Read path only.
    static ref DISPATCH: HashMap<&'static str, HashMap<&'static str, NativeFn>> =
        build_dispatch();
}

/// Register a host function under a string key for `bincall`.
pub fn register(key: &str, f: NativeFn) {
    REGISTRY.lock().unwrap().insert(key.to_string(), f);
}

/// Look up a method in the dispatch table for a runtime category.
pub fn dispatch_lookup(type_name: &str, method: &str) -> Option<NativeFn> {
    DISPATCH.get(type_name)?.get(method).copied()
}

/// Like `dispatch_lookup`, but also returns the method's table name so the
/// VM can wrap it as a named native value.
pub fn dispatch_entry(type_name: &str, method: &str) -> Option<(&'static str, NativeFn)> {
    let (name, f) = DISPATCH.get(type_name)?.get_key_value(method)?;
    Some((*name, *f))
}

/// Seed the built-in globals into a fresh global frame.
pub fn install(frame: &mut Frame) {
    let builtins: &[(&'static str, NativeFn)] = &[
        ("print", native_print),
        ("println", native_println),
        ("len", native_len),
        ("str", native_str),
        ("num", native_num),
        ("open", native_open),
        ("close", native_close),
        ("read_line", native_read_line),
        ("send", native_send),
        ("recv", native_recv),
        ("mutex", native_mutex),
        ("lock", native_lock),
        ("unlock", native_unlock),
        ("semaphore", native_semaphore),
        ("wait", native_wait),
        ("post", native_post),
        ("bincall", native_bincall),
        ("band", native_band),
        ("bor", native_bor),
        ("bxor", native_bxor),
        ("shl", native_shl),
        ("shr", native_shr),
    ];
    for (name, f) in builtins {
        frame.insert(name.to_string(), Value::Native(*name, *f));
    }
}

fn build_dispatch() -> HashMap<&'static str, HashMap<&'static str, NativeFn>> {
    let mut tables: HashMap<&'static str, HashMap<&'static str, NativeFn>> = HashMap::new();

    let string: &[(&'static str, NativeFn)] = &[
        ("len", method_len),
        ("upper", method_upper),
        ("lower", method_lower),
    ];
    let array: &[(&'static str, NativeFn)] = &[("len", method_len), ("push", method_push)];
    let hash: &[(&'static str, NativeFn)] = &[
        ("len", method_len),
        ("keys", method_keys),
        ("has", method_has),
    ];
    let file: &[(&'static str, NativeFn)] = &[("read_line", method_read_line)];

    tables.insert("string", string.iter().copied().collect());
    tables.insert("array", array.iter().copied().collect());
    tables.insert("hash", hash.iter().copied().collect());
    tables.insert("file", file.iter().copied().collect());
    tables
}

static NULL: Value = Value::Null;

fn arg<'a>(args: &'a [Value], i: usize) -> &'a Value {
    args.get(i).unwrap_or(&NULL)
}

// --- Globals ---

fn native_print(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    let joined: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    print!("{}", joined.join(" "));
    Ok(Value::Null)
}

fn native_println(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    let joined: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    println!("{}", joined.join(" "));
    Ok(Value::Null)
}

fn len_of(value: &Value) -> f64 {
    match value {
        Value::Str(s) => s.chars().count() as f64,
        Value::Array(items) => items.lock().unwrap().len() as f64,
        Value::Hash(mapping) => mapping.lock().unwrap().len() as f64,
        _ => 0.0,
    }
}

fn native_len(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number(len_of(arg(args, 0))))
}

fn native_str(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::str(arg(args, 0).to_string()))
}

fn native_num(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number(arg(args, 0).to_number()))
}

// --- Files ---

fn native_open(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    let path = arg(args, 0).to_string();
    let file = std::fs::File::open(&path)
        .map_err(|e| Fault::native(format!("open '{}': {}", path, e)))?;
    Ok(Value::File(Arc::new(Mutex::new(FileHandle {
        path,
        reader: Some(std::io::BufReader::new(file)),
    }))))
}

fn native_close(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    if let Value::File(handle) = arg(args, 0) {
        handle.lock().unwrap().reader = None;
    }
    Ok(Value::Null)
}

fn read_line_from(handle: &Arc<Mutex<FileHandle>>) -> Result<Value, Fault> {
    let mut handle = handle.lock().unwrap();
    let Some(reader) = handle.reader.as_mut() else {
        return Err(Fault::native("read_line on a closed file"));
    };
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|e| Fault::native(format!("read_line: {}", e)))?;
    if n == 0 {
        return Ok(Value::Null);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Value::Str(line))
}

fn native_read_line(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::File(handle) => read_line_from(handle),
        other => Err(Fault::bad_holder("read from", other.type_name())),
    }
}

// --- Channels ---

fn native_send(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::Channel(end) => {
            // A disconnected peer is not an error; the value is dropped.
            let _ = end.tx.send(arg(args, 1).clone());
            Ok(Value::Null)
        }
        other => Err(Fault::bad_holder("send on", other.type_name())),
    }
}

fn native_recv(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::Channel(end) => Ok(end.rx.recv().unwrap_or(Value::Null)),
        other => Err(Fault::bad_holder("receive on", other.type_name())),
    }
}

// --- Mutexes and semaphores ---

fn native_mutex(_recv: Option<&Value>, _args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::Mutex(Arc::new(Gate::new())))
}

fn native_lock(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::Mutex(gate) => {
            gate.lock();
            Ok(Value::Null)
        }
        other => Err(Fault::bad_holder("lock", other.type_name())),
    }
}

fn native_unlock(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::Mutex(gate) => {
            gate.unlock();
            Ok(Value::Null)
        }
        other => Err(Fault::bad_holder("unlock", other.type_name())),
    }
}

fn native_semaphore(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::Semaphore(Arc::new(Counter::new(
        arg(args, 0).to_int(),
    ))))
}

fn native_wait(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::Semaphore(counter) => {
            counter.wait();
            Ok(Value::Null)
        }
        other => Err(Fault::bad_holder("wait on", other.type_name())),
    }
}

fn native_post(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match arg(args, 0) {
        Value::Semaphore(counter) => {
            counter.post();
            Ok(Value::Null)
        }
        other => Err(Fault::bad_holder("post on", other.type_name())),
    }
}

// --- Interop ---

fn native_bincall(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    let key = arg(args, 0).to_string();
    let f = REGISTRY
        .lock()
        .unwrap()
        .get(&key)
        .copied()
        .ok_or_else(|| Fault::native(format!("bincall: no registered function '{}'", key)))?;
    f(None, &args[1.min(args.len())..])
}

// --- Bitwise helpers (integer-coercing) ---

fn native_band(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number((arg(args, 0).to_int() & arg(args, 1).to_int()) as f64))
}

fn native_bor(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number((arg(args, 0).to_int() | arg(args, 1).to_int()) as f64))
}

fn native_bxor(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number((arg(args, 0).to_int() ^ arg(args, 1).to_int()) as f64))
}

fn native_shl(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number(
        ((arg(args, 0).to_int() as u64) << (arg(args, 1).to_int() as u32 & 63)) as i64 as f64,
    ))
}

fn native_shr(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number(
        ((arg(args, 0).to_int() as u64) >> (arg(args, 1).to_int() as u32 & 63)) as i64 as f64,
    ))
}

// --- Dispatch-table methods (invoked with an implicit receiver) ---

fn receiver<'a>(recv: Option<&'a Value>) -> &'a Value {
    recv.unwrap_or(&NULL)
}

fn method_len(recv: Option<&Value>, _args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::number(len_of(receiver(recv))))
}

fn method_upper(recv: Option<&Value>, _args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::str(receiver(recv).to_string().to_uppercase()))
}

fn method_lower(recv: Option<&Value>, _args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::str(receiver(recv).to_string().to_lowercase()))
}

fn method_push(recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match receiver(recv) {
        Value::Array(items) => {
            items.lock().unwrap().push(arg(args, 0).clone());
            Ok(receiver(recv).clone())
        }
        other => Err(Fault::bad_holder("push into", other.type_name())),
    }
}

fn method_keys(recv: Option<&Value>, _args: &[Value]) -> Result<Value, Fault> {
    match receiver(recv) {
        Value::Hash(mapping) => {
            let keys = mapping
                .lock()
                .unwrap()
                .keys()
                .map(|k| Value::str(k.clone()))
                .collect();
            Ok(Value::array(keys))
        }
        other => Err(Fault::bad_holder("list keys of", other.type_name())),
    }
}

fn method_has(recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
    match receiver(recv) {
        Value::Hash(mapping) => Ok(Value::bool(
            mapping.lock().unwrap().contains_key(&arg(args, 0).as_key()),
        )),
        other => Err(Fault::bad_holder("probe keys of", other.type_name())),
    }
}

fn method_read_line(recv: Option<&Value>, _args: &[Value]) -> Result<Value, Fault> {
    match receiver(recv) {
        Value::File(handle) => read_line_from(handle),
        other => Err(Fault::bad_holder("read from", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_lookup_by_category() {
        assert!(dispatch_lookup("array", "push").is_some());
        assert!(dispatch_lookup("string", "upper").is_some());
        assert!(dispatch_lookup("hash", "keys").is_some());
        assert!(dispatch_lookup("array", "upper").is_none());
        assert!(dispatch_lookup("number", "len").is_none());
    }

    #[test]
    fn test_bincall_registry_roundtrip() {
        fn double(_recv: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
            Ok(Value::number(args[0].to_number() * 2.0))
        }
        register("test.double", double);
        let out = native_bincall(
            None,
            &[Value::str("test.double"), Value::number(21.0)],
        )
        .unwrap();
        assert_eq!(out, Value::str("42"));
    }

    #[test]
    fn test_bincall_unknown_key_faults() {
        assert!(native_bincall(None, &[Value::str("no.such.key")]).is_err());
    }

    #[test]
    fn test_push_appends_to_receiver() {
        let items = Value::array(vec![Value::str("1")]);
        method_push(Some(&items), &[Value::str("2")]).unwrap();
        assert_eq!(
            items,
            Value::array(vec![Value::str("1"), Value::str("2")])
        );
    }
}
