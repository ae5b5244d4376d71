//! Owning wrapper that publishes a host file-like object under `/vsimem/`.

use super::{create_py_vsi_in_mem, synthetic_path, ForeignFileHandle, MemVfs, VsiFile};
use crate::config::AdapterConfig;
use crate::error::{Result, VsiError};
use crate::host::{HostLock, HostRuntime, RawObject};
use std::sync::Arc;

/// Naming options for the synthetic path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFileOptions {
    pub dirname: Option<String>,
    pub filename: Option<String>,
    pub ext: Option<String>,
}

impl HostFileOptions {
    pub fn ext(ext: impl Into<String>) -> Self {
        Self {
            ext: Some(ext.into()),
            ..Self::default()
        }
    }
}

/// A host file-like object registered at a synthetic path.
///
/// Holds one pointer open on the path for its whole life, so the host
/// object stays reachable through [`open`](Self::open) until
/// [`close`](Self::close) or drop.
#[derive(Debug)]
pub struct HostFile {
    name: String,
    vfs: MemVfs,
    file: Option<VsiFile>,
}

impl HostFile {
    pub fn new(
        vfs: &MemVfs,
        runtime: Arc<dyn HostRuntime>,
        object: RawObject,
        options: &HostFileOptions,
    ) -> Result<Self> {
        Self::with_config(vfs, runtime, object, options, &AdapterConfig::default())
    }

    /// # Errors
    /// * `NullHostObject` if `object` is null
    /// * `NotFileLike` if `object` lacks one of `config.required_methods`
    /// * `Registration` if the synthetic path could not be installed or reopened
    pub fn with_config(
        vfs: &MemVfs,
        runtime: Arc<dyn HostRuntime>,
        object: RawObject,
        options: &HostFileOptions,
        config: &AdapterConfig,
    ) -> Result<Self> {
        if object.is_null() {
            return Err(VsiError::NullHostObject);
        }
        if let Some(method) = missing_method(runtime.as_ref(), object, &config.required_methods) {
            return Err(VsiError::NotFileLike { method });
        }

        let name = synthetic_path(
            vfs.prefix(),
            options.dirname.as_deref(),
            options.filename.as_deref(),
            options.ext.as_deref(),
        );
        let handle = ForeignFileHandle::with_config(runtime, object, config)?;
        let file = create_py_vsi_in_mem(vfs, &name, handle)
            .ok_or_else(|| VsiError::Registration { path: name.clone() })?;

        Ok(Self {
            name,
            vfs: vfs.clone(),
            file: Some(file),
        })
    }

    /// The synthetic path.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn closed(&self) -> bool {
        self.file.is_none()
    }

    /// Open another pointer on the synthetic path.
    pub fn open(&self) -> Result<VsiFile> {
        if self.closed() {
            return Err(VsiError::closed(&self.name));
        }
        self.vfs.open(&self.name)
    }

    /// Read up to `size` bytes from the current position.
    pub fn read(&mut self, size: usize) -> Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| VsiError::closed(&self.name))?;
        let mut buffer = vec![0u8; size];
        let n = file.read(&mut buffer, 1, size);
        buffer.truncate(n);
        Ok(buffer)
    }

    /// Close this wrapper's pointer; closing an already closed file is a no-op.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            file.close();
        }
    }
}

impl Drop for HostFile {
    fn drop(&mut self) {
        self.close();
    }
}

fn missing_method(
    runtime: &dyn HostRuntime,
    object: RawObject,
    required: &[String],
) -> Option<String> {
    let _lock = HostLock::acquire(runtime);
    required
        .iter()
        .find(|method| !runtime.has_method(object, method.as_str()))
        .cloned()
}
