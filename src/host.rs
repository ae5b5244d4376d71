//! Host runtime boundary.
//!
//! The embedding runtime (an interpreter with reference-counted objects, a
//! global execution lock and a per-thread error indicator) is consumed only
//! through the [`HostRuntime`] capability. Everything that touches a host
//! object goes through [`OwnedObject`], which pairs the reference count with
//! Rust ownership and wraps each call in a [`HostLock`] guard.

pub mod memory;

use crate::error::{HostError, Result, VsiError};
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

pub use memory::{MemoryRuntime, ObjectBuilder};

/// Opaque, possibly-null reference to a host object.
///
/// Never dereferenced on this side of the boundary; it is only handed back
/// to the [`HostRuntime`] that produced it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawObject(*mut c_void);

// SAFETY: the pointer is an opaque token. Only the runtime interprets it,
// and every such use happens while the runtime's execution lock is held.
unsafe impl Send for RawObject {}

impl RawObject {
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// Token for runtimes that identify objects by integer id.
    pub fn from_addr(addr: usize) -> Self {
        Self(addr as *mut c_void)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn addr(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawObject({:#x})", self.addr())
    }
}

/// A value passed to or returned from a host method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Str(String),
}

impl HostValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(value) => Some(*value),
            HostValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::None => "NoneType",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Bytes(_) => "bytes",
            HostValue::Str(_) => "str",
        }
    }
}

/// Outcome of [`HostRuntime::ensure_lock`], to be handed back on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The calling thread took the lock and must give it back.
    Acquired,
    /// The calling thread already held the lock; release is a no-op.
    AlreadyHeld,
}

/// Capabilities of the embedding runtime consumed by the adapter.
///
/// Except for the lock pair itself, every method must be called with the
/// execution lock held.
pub trait HostRuntime: Send + Sync {
    /// Take the execution lock for the calling thread (re-entrant).
    fn ensure_lock(&self) -> LockState;

    /// Undo a matching [`ensure_lock`](Self::ensure_lock).
    fn release_lock(&self, state: LockState);

    /// Acquire an owning reference.
    fn incref(&self, object: RawObject);

    /// Release an owning reference.
    fn decref(&self, object: RawObject);

    /// Whether `object` has a callable attribute `name`.
    fn has_method(&self, object: RawObject, name: &str) -> bool;

    /// Invoke `object.name(*args)`.
    ///
    /// Returns `None` on failure, leaving the error pending until
    /// [`fetch_error`](Self::fetch_error) is called.
    fn call_method(
        &self,
        object: RawObject,
        name: &str,
        args: &[HostValue],
    ) -> Option<HostValue>;

    /// Take and clear the pending error, if any.
    fn fetch_error(&self) -> Option<HostError>;
}

/// Scoped hold of the host execution lock.
pub struct HostLock<'a> {
    runtime: &'a dyn HostRuntime,
    state: LockState,
}

impl<'a> HostLock<'a> {
    pub fn acquire(runtime: &'a dyn HostRuntime) -> Self {
        let state = runtime.ensure_lock();
        Self { runtime, state }
    }

    pub fn state(&self) -> LockState {
        self.state
    }
}

impl Drop for HostLock<'_> {
    fn drop(&mut self) {
        self.runtime.release_lock(self.state);
    }
}

/// An owning reference to a non-null host object.
///
/// The reference count is incremented on construction and decremented
/// exactly once on drop. Not `Clone`: the raw reference is never aliased.
pub struct OwnedObject {
    runtime: Arc<dyn HostRuntime>,
    raw: RawObject,
}

impl OwnedObject {
    pub fn acquire(runtime: Arc<dyn HostRuntime>, raw: RawObject) -> Result<Self> {
        if raw.is_null() {
            return Err(VsiError::NullHostObject);
        }
        {
            let _lock = HostLock::acquire(runtime.as_ref());
            runtime.incref(raw);
        }
        Ok(Self { runtime, raw })
    }

    pub fn raw(&self) -> RawObject {
        self.raw
    }

    /// Call a method, consuming any pending host error on failure.
    pub fn call(
        &self,
        method: &str,
        args: &[HostValue],
    ) -> std::result::Result<HostValue, HostError> {
        let _lock = HostLock::acquire(self.runtime.as_ref());
        match self.runtime.call_method(self.raw, method, args) {
            Some(value) => Ok(value),
            None => Err(self
                .runtime
                .fetch_error()
                .unwrap_or_else(|| HostError::unset(method))),
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        let _lock = HostLock::acquire(self.runtime.as_ref());
        self.runtime.has_method(self.raw, method)
    }
}

impl fmt::Debug for OwnedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedObject").field("raw", &self.raw).finish()
    }
}

impl Drop for OwnedObject {
    fn drop(&mut self) {
        let _lock = HostLock::acquire(self.runtime.as_ref());
        self.runtime.decref(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Arc<MemoryRuntime> {
        Arc::new(MemoryRuntime::new())
    }

    #[test]
    fn test_null_reference_is_rejected() {
        let rt = runtime();
        let result = OwnedObject::acquire(rt.clone(), RawObject::null());
        assert!(matches!(result, Err(VsiError::NullHostObject)));
        assert_eq!(rt.stats().increfs, 0);
    }

    #[test]
    fn test_acquire_and_drop_balance_refcount() {
        let rt = runtime();
        let raw = rt.bytes_io(b"abc".to_vec()).create();
        assert_eq!(rt.refcount(raw), Some(1));

        let owned = OwnedObject::acquire(rt.clone(), raw).unwrap();
        assert_eq!(rt.refcount(raw), Some(2));

        drop(owned);
        assert_eq!(rt.refcount(raw), Some(1));
        assert_eq!(rt.stats().invalid_decrefs, 0);
    }

    #[test]
    fn test_failed_call_clears_pending_error() {
        let rt = runtime();
        let raw = rt.bytes_io(Vec::new()).fail_on("tell").create();
        let owned = OwnedObject::acquire(rt.clone(), raw).unwrap();

        let err = owned.call("tell", &[]).unwrap_err();
        assert_eq!(err.kind, "OSError");
        assert!(!rt.error_pending());
    }

    #[test]
    fn test_calls_run_under_the_execution_lock() {
        let rt = runtime();
        let raw = rt.bytes_io(b"hello".to_vec()).create();
        let owned = OwnedObject::acquire(rt.clone(), raw).unwrap();

        owned.call("read", &[HostValue::Int(2)]).unwrap();
        owned.call("tell", &[]).unwrap();
        assert!(!rt.is_locked());

        let calls = rt.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|call| call.lock_held));
        assert_eq!(rt.stats().unlocked_accesses, 0);
    }

    #[test]
    fn test_nested_lock_is_reentrant() {
        let rt = runtime();
        let outer = HostLock::acquire(rt.as_ref());
        assert_eq!(outer.state(), LockState::Acquired);
        {
            let inner = HostLock::acquire(rt.as_ref());
            assert_eq!(inner.state(), LockState::AlreadyHeld);
        }
        assert!(rt.is_locked());
        drop(outer);
        assert!(!rt.is_locked());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(HostValue::Int(7).as_int(), Some(7));
        assert_eq!(HostValue::Bool(true).as_int(), Some(1));
        assert_eq!(HostValue::None.as_int(), None);
        assert_eq!(HostValue::Str("x".into()).type_name(), "str");
    }
}
