//! Registration of host-backed handles under synthetic paths.

use super::{ForeignFileHandle, MemVfs, VsiFile};
use log::warn;
use uuid::Uuid;

/// Install `handle` at `name` and reopen it as an ordinary file pointer.
///
/// Returns `None` when either step fails. A handle that was installed but
/// could not be reopened is unlinked again, and a handle that was never
/// installed is dropped, releasing its host reference.
pub fn create_py_vsi_in_mem(
    vfs: &MemVfs,
    name: &str,
    handle: ForeignFileHandle,
) -> Option<VsiFile> {
    if let Err(err) = vfs.install(name, Box::new(handle)) {
        warn!("could not install handle at {}: {}", name, err);
        return None;
    }

    match vfs.open(name) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!("could not reopen {}: {}", name, err);
            let _ = vfs.unlink(name);
            None
        }
    }
}

/// Build `{prefix}{dirname}/{filename}`.
///
/// A missing `dirname` becomes a random UUID; a missing `filename` becomes a
/// random UUID with `ext` appended when one is given.
pub fn synthetic_path(
    prefix: &str,
    dirname: Option<&str>,
    filename: Option<&str>,
    ext: Option<&str>,
) -> String {
    let dirname = match dirname {
        Some(dirname) => dirname.trim_matches('/').to_string(),
        None => Uuid::new_v4().to_string(),
    };
    let filename = match (filename, ext) {
        (Some(filename), _) => filename.to_string(),
        (None, Some(ext)) => format!("{}.{}", Uuid::new_v4(), ext.trim_start_matches('.')),
        (None, None) => Uuid::new_v4().to_string(),
    };

    if dirname.is_empty() {
        format!("{prefix}{filename}")
    } else {
        format!("{prefix}{dirname}/{filename}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostValue, MemoryRuntime, RawObject};
    use crate::vsi::Whence;
    use std::sync::Arc;

    fn handle_for(rt: &Arc<MemoryRuntime>, data: &[u8]) -> (ForeignFileHandle, RawObject) {
        let obj = rt.bytes_io(data.to_vec()).create();
        (ForeignFileHandle::new(rt.clone(), obj).unwrap(), obj)
    }

    #[test]
    fn test_factory_routes_calls_to_host_object() {
        let rt = Arc::new(MemoryRuntime::new());
        let (handle, obj) = handle_for(&rt, b"0123456789");
        let vfs = MemVfs::new();

        let mut file = create_py_vsi_in_mem(&vfs, "/vsimem/routed.bin", handle)
            .expect("registration succeeds");
        assert!(vfs.exists("/vsimem/routed.bin"));

        let mut buf = [0u8; 4];
        assert_eq!(file.seek(2, Whence::Start), 0);
        assert_eq!(file.read(&mut buf, 1, 4), 4);
        assert_eq!(&buf, b"2345");
        assert_eq!(file.write(b"ab", 1, 2), 2);
        assert_eq!(file.tell(), 8);
        assert_eq!(file.close(), 0);

        let calls = rt.calls();
        let sequence: Vec<_> = calls
            .iter()
            .map(|call| (call.method.as_str(), call.args.clone()))
            .collect();
        assert_eq!(
            sequence,
            vec![
                ("seek", vec![HostValue::Int(2), HostValue::Int(0)]),
                ("read", vec![HostValue::Int(4)]),
                ("write", vec![HostValue::Bytes(b"ab".to_vec())]),
                ("tell", vec![]),
                ("close", vec![]),
            ]
        );
        assert!(calls.iter().all(|call| call.object == obj));
        assert!(!vfs.exists("/vsimem/routed.bin"));
        assert_eq!(rt.refcount(obj), Some(1));
    }

    #[test]
    fn test_factory_fails_outside_prefix_and_releases_handle() {
        let rt = Arc::new(MemoryRuntime::new());
        let (handle, obj) = handle_for(&rt, b"x");
        let vfs = MemVfs::new();

        assert!(create_py_vsi_in_mem(&vfs, "/tmp/not-vsimem.tif", handle).is_none());
        assert_eq!(rt.refcount(obj), Some(1));
        assert!(rt.calls().is_empty());
    }

    #[test]
    fn test_factory_fails_on_taken_path() {
        let rt = Arc::new(MemoryRuntime::new());
        let (first, _) = handle_for(&rt, b"first");
        let (second, second_obj) = handle_for(&rt, b"second");
        let vfs = MemVfs::new();

        let _file = create_py_vsi_in_mem(&vfs, "/vsimem/taken", first).unwrap();
        assert!(create_py_vsi_in_mem(&vfs, "/vsimem/taken", second).is_none());
        assert_eq!(rt.refcount(second_obj), Some(1));
    }

    #[test]
    fn test_synthetic_path_shapes() {
        assert_eq!(
            synthetic_path("/vsimem/", Some("foo"), Some("bar.tif"), None),
            "/vsimem/foo/bar.tif"
        );
        assert_eq!(
            synthetic_path("/vsimem/", Some("/foo/"), Some("bar.tif"), Some("vrt")),
            "/vsimem/foo/bar.tif"
        );
        assert_eq!(
            synthetic_path("/vsimem/", Some(""), Some("bar.tif"), None),
            "/vsimem/bar.tif"
        );

        let generated = synthetic_path("/vsimem/", None, None, Some(".vrt"));
        let rest = generated.strip_prefix("/vsimem/").unwrap();
        let (dir, file) = rest.split_once('/').unwrap();
        assert!(Uuid::parse_str(dir).is_ok());
        assert!(file.ends_with(".vrt"));
        assert!(Uuid::parse_str(file.trim_end_matches(".vrt")).is_ok());

        let bare = synthetic_path("/vsimem/", Some("d"), None, None);
        assert!(Uuid::parse_str(bare.trim_start_matches("/vsimem/d/")).is_ok());

        assert_ne!(
            synthetic_path("/vsimem/", None, None, None),
            synthetic_path("/vsimem/", None, None, None)
        );
    }
}
