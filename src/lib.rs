//! # pyvsi-handle - Host File Objects as Virtual File Handles
//!
//! Lets a file-like object owned by an embedding host runtime (anything with
//! `read`, `write`, `seek`, `tell` and `close` methods) be addressed as an
//! ordinary virtual file by path, the way a geospatial library's `/vsimem/`
//! files are.
//!
//! ## Architecture
//!
//! - [`error`] - Centralized error types and handling
//! - [`config`] - Adapter settings and optional TOML loading
//! - [`host`] - The host runtime capability, owned references and the
//!   execution lock, plus the in-process [`MemoryRuntime`]
//! - [`vsi`] - The [`VirtualHandle`] contract, the [`ForeignFileHandle`]
//!   adapter, the [`MemVfs`] registry and [`create_py_vsi_in_mem`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use pyvsi_handle::{create_py_vsi_in_mem, ForeignFileHandle, MemVfs, MemoryRuntime, Whence};
//!
//! let runtime = Arc::new(MemoryRuntime::new());
//! let object = runtime.bytes_io(b"GIF89a...".to_vec()).create();
//!
//! let handle = ForeignFileHandle::new(runtime.clone(), object).unwrap();
//! let vfs = MemVfs::new();
//! let mut file = create_py_vsi_in_mem(&vfs, "/vsimem/image.gif", handle).unwrap();
//!
//! let mut magic = [0u8; 6];
//! assert_eq!(file.read(&mut magic, 1, 6), 6);
//! assert_eq!(&magic, b"GIF89a");
//! assert_eq!(file.seek(0, Whence::End), 0);
//! assert_eq!(file.close(), 0);
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod vsi;

// Re-export commonly used types for convenience
pub use config::AdapterConfig;
pub use error::{HostError, Result, VsiError};
pub use host::{HostRuntime, HostValue, MemoryRuntime, OwnedObject, RawObject};
pub use vsi::{
    create_py_vsi_in_mem, ForeignFileHandle, HostFile, HostFileOptions, MemVfs, RangeStatus,
    VirtualHandle, VsiFile, Whence,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
