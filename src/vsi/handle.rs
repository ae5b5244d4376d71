//! Virtual handle over a host file-like object.
//!
//! Each [`VirtualHandle`] operation becomes a method call on the wrapped
//! object. Host failures never leave this module: they are logged, the host
//! error indicator is cleared by [`OwnedObject::call`], and the caller sees
//! the native return code for the operation.

use super::{extend_with_zeros, RangeStatus, VirtualHandle, Whence, ZERO_FILL_CHUNK};
use crate::config::AdapterConfig;
use crate::error::{HostError, Result, VsiError};
use crate::host::{HostRuntime, HostValue, OwnedObject, RawObject};
use log::debug;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

/// Adapter exposing a host file-like object as a [`VirtualHandle`].
///
/// Holds one owning reference to the object and nothing else: the cursor
/// lives in the host object.
#[derive(Debug)]
pub struct ForeignFileHandle {
    object: OwnedObject,
    zero_fill_chunk: usize,
}

impl ForeignFileHandle {
    /// Wrap `object`, taking a new reference to it.
    ///
    /// # Errors
    /// * `VsiError::NullHostObject` if `object` is null
    pub fn new(runtime: Arc<dyn HostRuntime>, object: RawObject) -> Result<Self> {
        Ok(Self {
            object: OwnedObject::acquire(runtime, object)?,
            zero_fill_chunk: ZERO_FILL_CHUNK,
        })
    }

    pub fn with_config(
        runtime: Arc<dyn HostRuntime>,
        object: RawObject,
        config: &AdapterConfig,
    ) -> Result<Self> {
        let mut handle = Self::new(runtime, object)?;
        handle.zero_fill_chunk = config.zero_fill_chunk;
        Ok(handle)
    }

    /// Current position of the host object.
    ///
    /// # Errors
    /// * `VsiError::Host` if `tell()` fails or returns something other than
    ///   a non-negative integer
    pub fn position(&self) -> Result<u64> {
        let value = self
            .call("tell", &[])
            .map_err(|err| VsiError::host("tell", err))?;
        value
            .as_int()
            .and_then(|pos| u64::try_from(pos).ok())
            .ok_or_else(|| {
                VsiError::host(
                    "tell",
                    HostError::new(
                        "TypeError",
                        format!("tell() returned {} instead of a position", value.type_name()),
                    ),
                )
            })
    }

    fn call(
        &self,
        method: &str,
        args: &[HostValue],
    ) -> std::result::Result<HostValue, HostError> {
        self.object.call(method, args).map_err(|err| {
            debug!("{:?}.{}() failed: {}", self.object.raw(), method, err);
            err
        })
    }

    /// Byte count of a `size * count` request, bounded by `available`.
    fn request_len(size: usize, count: usize, available: usize) -> Option<usize> {
        let len = size.checked_mul(count)?.min(available);
        (len > 0).then_some(len)
    }
}

impl VirtualHandle for ForeignFileHandle {
    fn seek(&mut self, offset: u64, whence: Whence) -> i32 {
        let offset = match whence {
            Whence::Start => match i64::try_from(offset) {
                Ok(offset) => offset,
                Err(_) => {
                    debug!("seek offset {} does not fit a host position", offset);
                    return -1;
                }
            },
            // Deltas arrive as two's-complement unsigned values.
            Whence::Current | Whence::End => offset as i64,
        };

        match self.call(
            "seek",
            &[HostValue::Int(offset), HostValue::Int(whence.host_code())],
        ) {
            Ok(_) => 0,
            Err(_) => -1,
        }
    }

    fn tell(&mut self) -> u64 {
        self.try_tell().unwrap_or(0)
    }

    fn try_tell(&mut self) -> Option<u64> {
        match self.position() {
            Ok(pos) => Some(pos),
            Err(err) => {
                debug!("{:?}: {}", self.object.raw(), err);
                None
            }
        }
    }

    fn read(&mut self, buffer: &mut [u8], size: usize, count: usize) -> usize {
        let Some(requested) = Self::request_len(size, count, buffer.len()) else {
            return 0;
        };

        let bytes = match self.call("read", &[HostValue::Int(requested as i64)]) {
            Ok(HostValue::Bytes(bytes)) => bytes,
            Ok(other) => {
                debug!("read() returned {} instead of bytes", other.type_name());
                return 0;
            }
            Err(_) => return 0,
        };

        let filled = bytes.len().min(requested);
        buffer[..filled].copy_from_slice(&bytes[..filled]);
        filled / size
    }

    fn read_multi_range(
        &mut self,
        buffers: &mut [&mut [u8]],
        offsets: &[u64],
        sizes: &[usize],
    ) -> i32 {
        super::sequential_read_multi_range(self, buffers, offsets, sizes)
    }

    fn write(&mut self, buffer: &[u8], size: usize, count: usize) -> usize {
        let Some(requested) = Self::request_len(size, count, buffer.len()) else {
            return 0;
        };

        let written = match self.call("write", &[HostValue::Bytes(buffer[..requested].to_vec())]) {
            Ok(HostValue::Int(n)) => usize::try_from(n).unwrap_or(0).min(requested),
            Ok(HostValue::None) => requested,
            Ok(other) => {
                debug!("write() returned {} instead of a count", other.type_name());
                0
            }
            Err(_) => 0,
        };
        written / size
    }

    fn eof(&mut self) -> i32 {
        let Some(current) = self.try_tell() else {
            return 0;
        };
        let at_end = self.seek(0, Whence::End) == 0 && self.try_tell() == Some(current);
        self.seek(current, Whence::Start);
        i32::from(at_end)
    }

    fn flush(&mut self) -> i32 {
        0
    }

    fn close(&mut self) -> i32 {
        match self.call("close", &[]) {
            Ok(_) => 0,
            Err(_) => -1,
        }
    }

    fn truncate(&mut self, new_size: u64) -> i32 {
        if !self.object.has_method("truncate") {
            let chunk = self.zero_fill_chunk;
            return extend_with_zeros(self, new_size, chunk);
        }
        let Ok(size) = i64::try_from(new_size) else {
            return -1;
        };
        match self.call("truncate", &[HostValue::Int(size)]) {
            Ok(_) => 0,
            Err(_) => -1,
        }
    }

    fn native_file_descriptor(&self) -> Option<NonNull<c_void>> {
        None
    }

    fn range_status(&self, _offset: u64, _length: u64) -> RangeStatus {
        RangeStatus::Unknown
    }
}
