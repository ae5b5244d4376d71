//! Virtual file handles and the in-memory path registry.
//!
//! [`VirtualHandle`] is the native capability set every backend provides to
//! path-based file APIs. [`ForeignFileHandle`] implements it on top of a
//! host file-like object, [`MemVfs`] installs handles under `/vsimem/`
//! paths, and [`create_py_vsi_in_mem`] ties the two together.

pub mod factory;
pub mod handle;
pub mod host_file;
pub mod registry;

use log::debug;
use std::ffi::c_void;
use std::ptr::NonNull;

pub use factory::{create_py_vsi_in_mem, synthetic_path};
pub use handle::ForeignFileHandle;
pub use host_file::{HostFile, HostFileOptions};
pub use registry::{MemVfs, VsiFile};

/// Write granularity of the extend-only truncation policy.
pub const ZERO_FILL_CHUNK: usize = 4096;

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// `SEEK_SET`
    Start,
    /// `SEEK_CUR`
    Current,
    /// `SEEK_END`
    End,
}

impl Whence {
    /// Value of the host's `io.SEEK_*` constant.
    pub fn host_code(self) -> i64 {
        match self {
            Whence::Start => 0,
            Whence::Current => 1,
            Whence::End => 2,
        }
    }
}

/// Residency of a byte range, as far as a handle can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    Unknown,
    Data,
    Hole,
}

/// Native virtual-handle contract.
///
/// Return values follow the native conventions: `0`/`-1` for status
/// operations, element counts for `read`/`write` (a short count is not an
/// error). Implementations are used from one thread at a time.
pub trait VirtualHandle: Send {
    fn seek(&mut self, offset: u64, whence: Whence) -> i32;

    fn tell(&mut self) -> u64;

    /// Current position, or `None` when it cannot be determined.
    ///
    /// Unlike [`tell`](Self::tell), a failure is distinguishable from offset 0.
    fn try_tell(&mut self) -> Option<u64> {
        Some(self.tell())
    }

    /// Read up to `size * count` bytes into `buffer`; returns whole elements read.
    fn read(&mut self, buffer: &mut [u8], size: usize, count: usize) -> usize;

    /// Fill `buffers[i]` with `sizes[i]` bytes read at `offsets[i]`.
    fn read_multi_range(
        &mut self,
        buffers: &mut [&mut [u8]],
        offsets: &[u64],
        sizes: &[usize],
    ) -> i32 {
        sequential_read_multi_range(self, buffers, offsets, sizes)
    }

    /// Write `size * count` bytes from `buffer`; returns whole elements written.
    fn write(&mut self, buffer: &[u8], size: usize, count: usize) -> usize;

    /// Nonzero when positioned at end of file.
    fn eof(&mut self) -> i32;

    fn flush(&mut self) -> i32 {
        0
    }

    fn close(&mut self) -> i32;

    fn truncate(&mut self, new_size: u64) -> i32 {
        extend_with_zeros(self, new_size, ZERO_FILL_CHUNK)
    }

    fn native_file_descriptor(&self) -> Option<NonNull<c_void>> {
        None
    }

    fn range_status(&self, _offset: u64, _length: u64) -> RangeStatus {
        RangeStatus::Unknown
    }
}

/// Base multi-range read: one seek and one read per range, in order.
///
/// Stops at the first range that cannot be fully satisfied; ranges before
/// it keep the data already read into their buffers.
pub fn sequential_read_multi_range<H>(
    handle: &mut H,
    buffers: &mut [&mut [u8]],
    offsets: &[u64],
    sizes: &[usize],
) -> i32
where
    H: VirtualHandle + ?Sized,
{
    if buffers.len() != offsets.len() || buffers.len() != sizes.len() {
        debug!(
            "read_multi_range: {} buffers, {} offsets, {} sizes",
            buffers.len(),
            offsets.len(),
            sizes.len()
        );
        return -1;
    }
    if buffers
        .iter()
        .zip(sizes)
        .any(|(buffer, &size)| size > buffer.len())
    {
        return -1;
    }

    for ((buffer, &offset), &size) in buffers.iter_mut().zip(offsets).zip(sizes) {
        if handle.seek(offset, Whence::Start) != 0 {
            return -1;
        }
        if handle.read(&mut buffer[..size], 1, size) != size {
            return -1;
        }
    }
    0
}

/// Base truncation: grows the file with zero bytes, refuses to shrink it.
///
/// The cursor is returned to where it was before the call. Nothing is
/// written when the current position or the file size cannot be read.
pub fn extend_with_zeros<H>(handle: &mut H, new_size: u64, chunk: usize) -> i32
where
    H: VirtualHandle + ?Sized,
{
    let Some(original) = handle.try_tell() else {
        debug!("truncate: current position unknown, file left untouched");
        return -1;
    };
    let status = append_zeros(handle, new_size, chunk.max(1));
    let restored = handle.seek(original, Whence::Start) == 0;
    if status == 0 && restored {
        0
    } else {
        -1
    }
}

fn append_zeros<H>(handle: &mut H, new_size: u64, chunk: usize) -> i32
where
    H: VirtualHandle + ?Sized,
{
    if handle.seek(0, Whence::End) != 0 {
        return -1;
    }
    let Some(mut current) = handle.try_tell() else {
        debug!("truncate: file size unknown, file left untouched");
        return -1;
    };
    if new_size < current {
        debug!(
            "truncation from {} to {} bytes is not supported without a host truncate()",
            current, new_size
        );
        return -1;
    }

    let zeros = vec![0u8; chunk];
    while current < new_size {
        let step = (new_size - current).min(chunk as u64) as usize;
        if handle.write(&zeros[..step], 1, step) != step {
            return -1;
        }
        current += step as u64;
    }
    0
}
