//! In-memory path registry for virtual handles.
//!
//! [`MemVfs`] maps synthetic paths under a prefix (`/vsimem/` by default) to
//! installed [`VirtualHandle`]s, and [`MemVfs::open`] hands out [`VsiFile`]
//! pointers on them. Several pointers may be open on one path; they share
//! the handle and its cursor. Closing the last pointer closes the handle and
//! unregisters the path.

use super::{RangeStatus, VirtualHandle, Whence};
use crate::config::AdapterConfig;
use crate::error::{Result, VsiError};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

struct SlotState {
    handle: Box<dyn VirtualHandle>,
    open_files: usize,
    closed: bool,
}

/// An installed handle and the bookkeeping of its open pointers.
struct Slot {
    state: Mutex<SlotState>,
}

struct Registry {
    prefix: String,
    entries: RwLock<HashMap<String, Arc<Slot>>>,
}

/// Registry of handles addressable by path.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct MemVfs {
    inner: Arc<Registry>,
}

impl Default for MemVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemVfs {
    pub fn new() -> Self {
        Self::from_prefix(AdapterConfig::default().mem_prefix)
    }

    pub fn with_config(config: &AdapterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_prefix(config.mem_prefix.clone()))
    }

    fn from_prefix(prefix: String) -> Self {
        Self {
            inner: Arc::new(Registry {
                prefix,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Install `handle` at `path`.
    ///
    /// # Errors
    /// * `OutsidePrefix` if `path` does not name a file under the prefix
    /// * `PathInUse` if a handle is already installed at `path`
    pub fn install(&self, path: &str, handle: Box<dyn VirtualHandle>) -> Result<()> {
        let prefix = self.prefix();
        if !path.starts_with(prefix) || path.len() == prefix.len() || path.ends_with('/') {
            return Err(VsiError::OutsidePrefix {
                path: path.to_string(),
                prefix: prefix.to_string(),
            });
        }

        let mut entries = self.inner.entries.write();
        if entries.contains_key(path) {
            return Err(VsiError::PathInUse {
                path: path.to_string(),
            });
        }
        entries.insert(
            path.to_string(),
            Arc::new(Slot {
                state: Mutex::new(SlotState {
                    handle,
                    open_files: 0,
                    closed: false,
                }),
            }),
        );
        debug!("installed virtual handle at {}", path);
        Ok(())
    }

    /// Open a file pointer on the handle installed at `path`.
    pub fn open(&self, path: &str) -> Result<VsiFile> {
        let slot = self
            .inner
            .entries
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| VsiError::not_found(path))?;

        {
            let mut state = slot.state.lock();
            if state.closed {
                return Err(VsiError::not_found(path));
            }
            state.open_files += 1;
        }

        Ok(VsiFile {
            path: path.to_string(),
            slot,
            vfs: self.clone(),
            closed: false,
        })
    }

    /// Remove `path` from the registry.
    ///
    /// Pointers already open keep working; the handle is dropped with the
    /// last of them.
    pub fn unlink(&self, path: &str) -> Result<()> {
        match self.inner.entries.write().remove(path) {
            Some(_) => {
                debug!("unlinked {}", path);
                Ok(())
            }
            None => Err(VsiError::not_found(path)),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.entries.read().contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.inner.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn release(&self, path: &str, slot: &Arc<Slot>) {
        let mut entries = self.inner.entries.write();
        if entries
            .get(path)
            .is_some_and(|installed| Arc::ptr_eq(installed, slot))
        {
            entries.remove(path);
            debug!("released {}", path);
        }
    }
}

impl fmt::Debug for MemVfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemVfs")
            .field("prefix", &self.inner.prefix)
            .field("paths", &self.paths())
            .finish()
    }
}

/// Generic file pointer on an installed handle.
///
/// Mirrors the native `VSIF*L` calls and their return conventions. Dropping
/// the pointer closes it.
pub struct VsiFile {
    path: String,
    slot: Arc<Slot>,
    vfs: MemVfs,
    closed: bool,
}

impl VsiFile {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn with_handle<T>(&self, f: impl FnOnce(&mut dyn VirtualHandle) -> T) -> T {
        let mut state = self.slot.state.lock();
        f(state.handle.as_mut())
    }

    pub fn seek(&mut self, offset: u64, whence: Whence) -> i32 {
        self.with_handle(|h| h.seek(offset, whence))
    }

    pub fn tell(&mut self) -> u64 {
        self.with_handle(|h| h.tell())
    }

    pub fn read(&mut self, buffer: &mut [u8], size: usize, count: usize) -> usize {
        self.with_handle(|h| h.read(buffer, size, count))
    }

    pub fn read_multi_range(
        &mut self,
        buffers: &mut [&mut [u8]],
        offsets: &[u64],
        sizes: &[usize],
    ) -> i32 {
        self.with_handle(|h| h.read_multi_range(buffers, offsets, sizes))
    }

    pub fn write(&mut self, buffer: &[u8], size: usize, count: usize) -> usize {
        self.with_handle(|h| h.write(buffer, size, count))
    }

    pub fn eof(&mut self) -> i32 {
        self.with_handle(|h| h.eof())
    }

    pub fn flush(&mut self) -> i32 {
        self.with_handle(|h| h.flush())
    }

    pub fn truncate(&mut self, new_size: u64) -> i32 {
        self.with_handle(|h| h.truncate(new_size))
    }

    pub fn native_file_descriptor(&self) -> Option<NonNull<c_void>> {
        self.with_handle(|h| h.native_file_descriptor())
    }

    pub fn range_status(&self, offset: u64, length: u64) -> RangeStatus {
        self.with_handle(|h| h.range_status(offset, length))
    }

    /// Close the pointer; returns the handle's close status when this was
    /// the last pointer open on it, `0` otherwise.
    pub fn close(mut self) -> i32 {
        self.close_inner()
    }

    fn close_inner(&mut self) -> i32 {
        if self.closed {
            return 0;
        }
        self.closed = true;

        let mut state = self.slot.state.lock();
        state.open_files -= 1;
        if state.open_files > 0 || state.closed {
            return 0;
        }
        state.closed = true;
        let status = state.handle.close();
        drop(state);

        self.vfs.release(&self.path, &self.slot);
        status
    }
}

impl Drop for VsiFile {
    fn drop(&mut self) {
        self.close_inner();
    }
}

impl fmt::Debug for VsiFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsiFile").field("path", &self.path).finish()
    }
}

impl io::Read for VsiFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(VsiFile::read(self, buf, 1, buf.len()))
    }
}

impl io::Write for VsiFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = VsiFile::write(self, buf, 1, buf.len());
        if written == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("write to {} failed", self.path),
            ));
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match VsiFile::flush(self) {
            0 => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("flush of {} failed", self.path),
            )),
        }
    }
}

impl io::Seek for VsiFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(offset) => (offset, Whence::Start),
            io::SeekFrom::Current(delta) => (delta as u64, Whence::Current),
            io::SeekFrom::End(delta) => (delta as u64, Whence::End),
        };
        if VsiFile::seek(self, offset, whence) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek in {} failed", self.path),
            ));
        }
        Ok(VsiFile::tell(self))
    }
}
