//! In-process host runtime.
//!
//! [`MemoryRuntime`] implements [`HostRuntime`] with `BytesIO`-like objects
//! held in a table, so the adapter can be embedded and exercised without an
//! interpreter. It behaves like a small interpreter would: objects carry
//! reference counts and die when the count reaches zero, a re-entrant
//! execution lock serializes every access, and failed calls leave an error
//! pending until it is fetched.
//!
//! Every method call is recorded together with whether the execution lock
//! was held at the time, and objects can be configured to return short
//! reads or to fail selected calls.

use super::{HostRuntime, HostValue, LockState, RawObject};
use crate::error::HostError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

/// Largest buffer a write or seek-past-end may produce.
const MAX_BUFFER_LEN: u64 = 1 << 32;

/// Address of the first object; ids are spaced like aligned heap pointers.
const FIRST_OBJECT_ADDR: usize = 0x1000;
const OBJECT_ADDR_STRIDE: usize = 0x10;

/// One recorded `call_method` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    pub object: RawObject,
    pub method: String,
    pub args: Vec<HostValue>,
    pub lock_held: bool,
}

/// Counters describing how the runtime has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub increfs: usize,
    pub decrefs: usize,
    /// Decrefs of objects that were already dead (double release).
    pub invalid_decrefs: usize,
    /// Object accesses made without holding the execution lock.
    pub unlocked_accesses: usize,
    pub lock_acquisitions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FailRule {
    Method(String),
    SeekFrom(i64),
}

#[derive(Debug)]
struct BytesIo {
    data: Vec<u8>,
    pos: u64,
    closed: bool,
    max_read: Option<usize>,
    failing: HashSet<FailRule>,
    truncatable: bool,
    write_returns_none: bool,
}

#[derive(Debug)]
enum ObjectKind {
    BytesIo(BytesIo),
    /// An object of some other type with no file-like methods.
    Opaque(String),
}

#[derive(Debug)]
struct Entry {
    refcount: usize,
    kind: ObjectKind,
}

type CallResult = std::result::Result<HostValue, HostError>;

/// Host runtime backed by Rust objects.
#[derive(Debug)]
pub struct MemoryRuntime {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    objects: Mutex<HashMap<usize, Entry>>,
    next_addr: AtomicUsize,
    pending: Mutex<Option<HostError>>,
    calls: Mutex<Vec<HostCall>>,
    recording: AtomicBool,
    stats: Mutex<RuntimeStats>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
            objects: Mutex::new(HashMap::new()),
            next_addr: AtomicUsize::new(FIRST_OBJECT_ADDR),
            pending: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            recording: AtomicBool::new(true),
            stats: Mutex::new(RuntimeStats::default()),
        }
    }

    /// Start building a `BytesIO`-like object holding `data`.
    pub fn bytes_io(&self, data: Vec<u8>) -> ObjectBuilder<'_> {
        ObjectBuilder {
            runtime: self,
            io: BytesIo {
                data,
                pos: 0,
                closed: false,
                max_read: None,
                failing: HashSet::new(),
                truncatable: true,
                write_returns_none: false,
            },
        }
    }

    /// Create an object of type `type_name` without file-like methods.
    pub fn opaque(&self, type_name: &str) -> RawObject {
        self.insert(ObjectKind::Opaque(type_name.to_string()))
    }

    /// Drop the reference returned by object creation.
    pub fn release(&self, object: RawObject) {
        let _lock = super::HostLock::acquire(self);
        self.decref(object);
    }

    /// Current reference count, `None` once the object is dead.
    pub fn refcount(&self, object: RawObject) -> Option<usize> {
        self.objects
            .lock()
            .get(&object.addr())
            .map(|entry| entry.refcount)
    }

    pub fn contents(&self, object: RawObject) -> Option<Vec<u8>> {
        self.with_bytes_io(object, |io| io.data.clone())
    }

    pub fn position(&self, object: RawObject) -> Option<u64> {
        self.with_bytes_io(object, |io| io.pos)
    }

    pub fn is_closed(&self, object: RawObject) -> Option<bool> {
        self.with_bytes_io(object, |io| io.closed)
    }

    /// Make every later call of `method` on `object` fail.
    pub fn set_fail_on(&self, object: RawObject, method: &str) {
        self.with_bytes_io(object, |io| {
            io.failing.insert(FailRule::Method(method.to_string()))
        });
    }

    pub fn clear_failures(&self, object: RawObject) {
        self.with_bytes_io(object, |io| io.failing.clear());
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    /// Method names of the recorded calls, in order.
    pub fn method_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.method.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Turn call recording on or off (on by default).
    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RuntimeStats {
        *self.stats.lock()
    }

    pub fn error_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    fn insert(&self, kind: ObjectKind) -> RawObject {
        let addr = self
            .next_addr
            .fetch_add(OBJECT_ADDR_STRIDE, Ordering::Relaxed);
        self.objects.lock().insert(addr, Entry { refcount: 1, kind });
        RawObject::from_addr(addr)
    }

    fn with_bytes_io<T>(&self, object: RawObject, f: impl FnOnce(&mut BytesIo) -> T) -> Option<T> {
        match self.objects.lock().get_mut(&object.addr()) {
            Some(Entry {
                kind: ObjectKind::BytesIo(io),
                ..
            }) => Some(f(io)),
            _ => None,
        }
    }

    fn holds_lock(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    fn check_lock(&self) -> bool {
        let held = self.holds_lock();
        if !held {
            self.stats.lock().unlocked_accesses += 1;
        }
        held
    }
}

impl HostRuntime for MemoryRuntime {
    fn ensure_lock(&self) -> LockState {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            return LockState::AlreadyHeld;
        }
        while owner.is_some() {
            self.released.wait(&mut owner);
        }
        *owner = Some(me);
        drop(owner);
        self.stats.lock().lock_acquisitions += 1;
        LockState::Acquired
    }

    fn release_lock(&self, state: LockState) {
        if state == LockState::AlreadyHeld {
            return;
        }
        let mut owner = self.owner.lock();
        if *owner == Some(thread::current().id()) {
            *owner = None;
            self.released.notify_one();
        }
    }

    fn incref(&self, object: RawObject) {
        self.check_lock();
        if let Some(entry) = self.objects.lock().get_mut(&object.addr()) {
            entry.refcount += 1;
        }
        self.stats.lock().increfs += 1;
    }

    fn decref(&self, object: RawObject) {
        self.check_lock();
        let mut objects = self.objects.lock();
        let mut stats = self.stats.lock();
        match objects.get_mut(&object.addr()) {
            Some(entry) => {
                stats.decrefs += 1;
                entry.refcount -= 1;
                if entry.refcount == 0 {
                    objects.remove(&object.addr());
                }
            }
            None => stats.invalid_decrefs += 1,
        }
    }

    fn has_method(&self, object: RawObject, name: &str) -> bool {
        self.check_lock();
        match self.objects.lock().get(&object.addr()) {
            Some(Entry {
                kind: ObjectKind::BytesIo(io),
                ..
            }) => match name {
                "read" | "write" | "seek" | "tell" | "close" => true,
                "truncate" => io.truncatable,
                _ => false,
            },
            _ => false,
        }
    }

    fn call_method(&self, object: RawObject, name: &str, args: &[HostValue]) -> Option<HostValue> {
        let lock_held = self.check_lock();
        if self.recording.load(Ordering::Relaxed) {
            self.calls.lock().push(HostCall {
                object,
                method: name.to_string(),
                args: args.to_vec(),
                lock_held,
            });
        }

        let result = match self.objects.lock().get_mut(&object.addr()) {
            Some(Entry {
                kind: ObjectKind::BytesIo(io),
                ..
            }) => io.call(name, args),
            Some(Entry {
                kind: ObjectKind::Opaque(type_name),
                ..
            }) => Err(HostError::new(
                "AttributeError",
                format!("'{type_name}' object has no attribute '{name}'"),
            )),
            None => Err(HostError::new(
                "SystemError",
                format!("call of {name}() on a dead object"),
            )),
        };

        match result {
            Ok(value) => Some(value),
            Err(err) => {
                *self.pending.lock() = Some(err);
                None
            }
        }
    }

    fn fetch_error(&self) -> Option<HostError> {
        self.check_lock();
        self.pending.lock().take()
    }
}

/// Configures a `BytesIO`-like object before it is created.
pub struct ObjectBuilder<'a> {
    runtime: &'a MemoryRuntime,
    io: BytesIo,
}

impl ObjectBuilder<'_> {
    /// Return at most `max` bytes from each `read` call.
    pub fn short_reads(mut self, max: usize) -> Self {
        self.io.max_read = Some(max);
        self
    }

    /// Make every call of `method` fail with `OSError`.
    pub fn fail_on(mut self, method: &str) -> Self {
        self.io.failing.insert(FailRule::Method(method.to_string()));
        self
    }

    /// Make `seek` fail for the given whence code only.
    pub fn fail_seek_from(mut self, whence: i64) -> Self {
        self.io.failing.insert(FailRule::SeekFrom(whence));
        self
    }

    /// Whether the object exposes a `truncate` method (default: yes).
    pub fn truncatable(mut self, truncatable: bool) -> Self {
        self.io.truncatable = truncatable;
        self
    }

    /// Have `write` return `None` instead of a byte count.
    pub fn write_returns_none(mut self) -> Self {
        self.io.write_returns_none = true;
        self
    }

    /// Create the object; the caller owns one reference.
    pub fn create(self) -> RawObject {
        self.runtime.insert(ObjectKind::BytesIo(self.io))
    }
}

impl BytesIo {
    fn call(&mut self, name: &str, args: &[HostValue]) -> CallResult {
        if self.is_failing(name, args) {
            return Err(HostError::new(
                "OSError",
                format!("injected failure in {name}()"),
            ));
        }
        if self.closed && name != "close" {
            return Err(HostError::new("ValueError", "I/O operation on closed file."));
        }
        match name {
            "read" => self.read(args),
            "write" => self.write(args),
            "seek" => self.seek(args),
            "tell" => self.pos_i64(),
            "close" => {
                self.closed = true;
                Ok(HostValue::None)
            }
            "truncate" if self.truncatable => self.truncate(args),
            _ => Err(HostError::new(
                "AttributeError",
                format!("'_io.BytesIO' object has no attribute '{name}'"),
            )),
        }
    }

    fn is_failing(&self, name: &str, args: &[HostValue]) -> bool {
        self.failing.iter().any(|rule| match rule {
            FailRule::Method(method) => method == name,
            FailRule::SeekFrom(whence) => {
                name == "seek" && args.get(1).and_then(HostValue::as_int).unwrap_or(0) == *whence
            }
        })
    }

    fn pos_i64(&self) -> CallResult {
        i64::try_from(self.pos)
            .map(HostValue::Int)
            .map_err(|_| HostError::new("OverflowError", "position out of range"))
    }

    fn read(&mut self, args: &[HostValue]) -> CallResult {
        let requested = match args.first() {
            None | Some(HostValue::None) => -1,
            Some(value) => value
                .as_int()
                .ok_or_else(|| type_error("read", "int", value))?,
        };

        let len = self.data.len();
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(len);
        let available = len - start;
        let mut count = if requested < 0 {
            available
        } else {
            usize::try_from(requested).unwrap_or(usize::MAX).min(available)
        };
        if let Some(max) = self.max_read {
            count = count.min(max);
        }

        let chunk = self.data[start..start + count].to_vec();
        if count > 0 {
            self.pos = (start + count) as u64;
        }
        Ok(HostValue::Bytes(chunk))
    }

    fn write(&mut self, args: &[HostValue]) -> CallResult {
        let bytes = match args.first() {
            Some(HostValue::Bytes(bytes)) => bytes,
            Some(value) => return Err(type_error("write", "bytes", value)),
            None => return Err(missing_argument("write")),
        };

        let end = self.pos + bytes.len() as u64;
        if end > MAX_BUFFER_LEN {
            return Err(HostError::new("MemoryError", "buffer too large"));
        }
        let start = self.pos as usize;
        let end = end as usize;
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        self.pos = end as u64;

        if self.write_returns_none {
            Ok(HostValue::None)
        } else {
            Ok(HostValue::Int(bytes.len() as i64))
        }
    }

    fn seek(&mut self, args: &[HostValue]) -> CallResult {
        let offset = match args.first() {
            Some(value) => value
                .as_int()
                .ok_or_else(|| type_error("seek", "int", value))?,
            None => return Err(missing_argument("seek")),
        };
        let whence = match args.get(1) {
            Some(value) => value
                .as_int()
                .ok_or_else(|| type_error("seek", "int", value))?,
            None => 0,
        };

        let base: i64 = match whence {
            0 => 0,
            1 => i64::try_from(self.pos).unwrap_or(i64::MAX),
            2 => self.data.len() as i64,
            other => {
                return Err(HostError::new(
                    "ValueError",
                    format!("invalid whence ({other}, should be 0, 1 or 2)"),
                ))
            }
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| HostError::new("OverflowError", "seek position out of range"))?;
        if target < 0 {
            return Err(HostError::new(
                "ValueError",
                format!("negative seek value {target}"),
            ));
        }
        if target as u64 > MAX_BUFFER_LEN {
            return Err(HostError::new("OverflowError", "seek position out of range"));
        }

        self.pos = target as u64;
        Ok(HostValue::Int(target))
    }

    fn truncate(&mut self, args: &[HostValue]) -> CallResult {
        let size = match args.first() {
            None | Some(HostValue::None) => i64::try_from(self.pos).unwrap_or(i64::MAX),
            Some(value) => value
                .as_int()
                .ok_or_else(|| type_error("truncate", "int", value))?,
        };
        if size < 0 {
            return Err(HostError::new(
                "ValueError",
                format!("negative size value {size}"),
            ));
        }
        if size as u64 > MAX_BUFFER_LEN {
            return Err(HostError::new("MemoryError", "buffer too large"));
        }
        self.data.resize(size as usize, 0);
        Ok(HostValue::Int(size))
    }
}

fn type_error(method: &str, expected: &str, got: &HostValue) -> HostError {
    HostError::new(
        "TypeError",
        format!(
            "{method}() argument must be {expected}, not {}",
            got.type_name()
        ),
    )
}

fn missing_argument(method: &str) -> HostError {
    HostError::new(
        "TypeError",
        format!("{method}() takes exactly one argument (0 given)"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostLock;

    fn call(rt: &MemoryRuntime, obj: RawObject, name: &str, args: &[HostValue]) -> CallResult {
        let _lock = HostLock::acquire(rt);
        rt.call_method(obj, name, args)
            .ok_or_else(|| rt.fetch_error().expect("error is pending"))
    }

    #[test]
    fn test_bytes_io_read_seek_tell() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(b"0123456789".to_vec()).create();

        let chunk = call(&rt, obj, "read", &[HostValue::Int(4)]).unwrap();
        assert_eq!(chunk, HostValue::Bytes(b"0123".to_vec()));
        assert_eq!(call(&rt, obj, "tell", &[]).unwrap(), HostValue::Int(4));

        call(&rt, obj, "seek", &[HostValue::Int(-2), HostValue::Int(2)]).unwrap();
        let rest = call(&rt, obj, "read", &[]).unwrap();
        assert_eq!(rest, HostValue::Bytes(b"89".to_vec()));

        let past_end = call(&rt, obj, "read", &[HostValue::Int(5)]).unwrap();
        assert_eq!(past_end, HostValue::Bytes(Vec::new()));
    }

    #[test]
    fn test_bytes_io_write_past_end_pads_with_zeros() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(b"ab".to_vec()).create();

        call(&rt, obj, "seek", &[HostValue::Int(4), HostValue::Int(0)]).unwrap();
        let written = call(&rt, obj, "write", &[HostValue::Bytes(b"xy".to_vec())]).unwrap();
        assert_eq!(written, HostValue::Int(2));
        assert_eq!(rt.contents(obj).unwrap(), b"ab\0\0xy".to_vec());
        assert_eq!(rt.position(obj), Some(6));
    }

    #[test]
    fn test_negative_seek_is_a_value_error() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(Vec::new()).create();

        let err = call(&rt, obj, "seek", &[HostValue::Int(-1), HostValue::Int(0)]).unwrap_err();
        assert_eq!(err.kind, "ValueError");
        assert!(!rt.error_pending());
    }

    #[test]
    fn test_closed_object_rejects_io() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(b"data".to_vec()).create();

        call(&rt, obj, "close", &[]).unwrap();
        assert_eq!(rt.is_closed(obj), Some(true));
        let err = call(&rt, obj, "read", &[HostValue::Int(1)]).unwrap_err();
        assert_eq!(err.message, "I/O operation on closed file.");
    }

    #[test]
    fn test_short_reads_and_injected_failures() {
        let rt = MemoryRuntime::new();
        let obj = rt
            .bytes_io(b"abcdef".to_vec())
            .short_reads(2)
            .fail_seek_from(2)
            .create();

        let chunk = call(&rt, obj, "read", &[HostValue::Int(6)]).unwrap();
        assert_eq!(chunk, HostValue::Bytes(b"ab".to_vec()));

        assert!(call(&rt, obj, "seek", &[HostValue::Int(0), HostValue::Int(2)]).is_err());
        assert!(call(&rt, obj, "seek", &[HostValue::Int(1), HostValue::Int(0)]).is_ok());

        rt.set_fail_on(obj, "tell");
        assert_eq!(call(&rt, obj, "tell", &[]).unwrap_err().kind, "OSError");
        rt.clear_failures(obj);
        assert_eq!(call(&rt, obj, "tell", &[]).unwrap(), HostValue::Int(1));
    }

    #[test]
    fn test_opaque_objects_are_not_file_like() {
        let rt = MemoryRuntime::new();
        let obj = rt.opaque("str");
        let _lock = HostLock::acquire(&rt);

        assert!(!rt.has_method(obj, "read"));
        assert!(rt.call_method(obj, "read", &[]).is_none());
        let err = rt.fetch_error().unwrap();
        assert_eq!(err.kind, "AttributeError");
    }

    #[test]
    fn test_truncate_visibility() {
        let rt = MemoryRuntime::new();
        let with = rt.bytes_io(Vec::new()).create();
        let without = rt.bytes_io(Vec::new()).truncatable(false).create();
        let _lock = HostLock::acquire(&rt);

        assert!(rt.has_method(with, "truncate"));
        assert!(!rt.has_method(without, "truncate"));
        assert!(rt.call_method(without, "truncate", &[HostValue::Int(0)]).is_none());
        rt.fetch_error();
    }

    #[test]
    fn test_release_kills_object_and_counts_double_release() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(Vec::new()).create();

        rt.release(obj);
        assert_eq!(rt.refcount(obj), None);
        assert_eq!(rt.stats().invalid_decrefs, 0);

        rt.release(obj);
        assert_eq!(rt.stats().invalid_decrefs, 1);
    }

    #[test]
    fn test_recording_can_be_paused() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(b"abc".to_vec()).create();

        rt.set_recording(false);
        call(&rt, obj, "read", &[HostValue::Int(1)]).unwrap();
        assert!(rt.calls().is_empty());

        rt.set_recording(true);
        call(&rt, obj, "tell", &[]).unwrap();
        assert_eq!(rt.method_names(), vec!["tell".to_string()]);
    }

    #[test]
    fn test_unlocked_access_is_counted() {
        let rt = MemoryRuntime::new();
        let obj = rt.bytes_io(Vec::new()).create();

        rt.incref(obj);
        assert_eq!(rt.stats().unlocked_accesses, 1);
        assert!(!rt.calls().iter().any(|call| call.lock_held));
    }

    #[test]
    fn test_lock_serializes_threads() {
        use std::sync::Arc;

        let rt = Arc::new(MemoryRuntime::new());
        let obj = rt.bytes_io(Vec::new()).create();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rt = Arc::clone(&rt);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _lock = HostLock::acquire(rt.as_ref());
                        rt.call_method(obj, "write", &[HostValue::Bytes(vec![1])]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(rt.contents(obj).unwrap().len(), 200);
        assert_eq!(rt.stats().unlocked_accesses, 0);
        assert!(!rt.is_locked());
    }
}
