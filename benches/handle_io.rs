use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pyvsi_handle::{
    create_py_vsi_in_mem, ForeignFileHandle, MemVfs, MemoryRuntime, VirtualHandle, Whence,
};
use std::sync::Arc;

fn create_test_data(size_kb: usize) -> Vec<u8> {
    (0..size_kb * 1024).map(|i| (i % 251) as u8).collect()
}

fn bench_sequential_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_read");

    for size_kb in [64, 1024] {
        let data = create_test_data(size_kb);
        group.throughput(Throughput::Bytes(data.len() as u64));

        for chunk in [512usize, 16 * 1024] {
            group.bench_with_input(
                BenchmarkId::new(format!("{size_kb}KB"), chunk),
                &chunk,
                |b, &chunk| {
                    let rt = Arc::new(MemoryRuntime::new());
                    rt.set_recording(false);
                    let obj = rt.bytes_io(data.clone()).create();
                    let mut handle = ForeignFileHandle::new(rt.clone(), obj).unwrap();
                    let mut buffer = vec![0u8; chunk];

                    b.iter(|| {
                        handle.seek(0, Whence::Start);
                        let mut total = 0;
                        loop {
                            let n = handle.read(&mut buffer, 1, chunk);
                            if n == 0 {
                                break;
                            }
                            total += n;
                        }
                        black_box(total)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_multi_range(c: &mut Criterion) {
    let data = create_test_data(1024);
    let rt = Arc::new(MemoryRuntime::new());
    rt.set_recording(false);
    let obj = rt.bytes_io(data).create();
    let handle = ForeignFileHandle::new(rt.clone(), obj).unwrap();
    let vfs = MemVfs::new();
    let mut file = create_py_vsi_in_mem(&vfs, "/vsimem/bench/tiles.tif", handle).unwrap();

    let offsets: Vec<u64> = (0..16).map(|i| i * 64 * 1024).collect();
    let sizes = vec![4096usize; offsets.len()];
    let mut storage = vec![vec![0u8; 4096]; offsets.len()];

    c.bench_function("multi_range_16x4KB", |b| {
        b.iter(|| {
            let mut buffers: Vec<&mut [u8]> =
                storage.iter_mut().map(|buf| buf.as_mut_slice()).collect();
            black_box(file.read_multi_range(&mut buffers, &offsets, &sizes))
        });
    });
}

criterion_group!(benches, bench_sequential_read, bench_multi_range);
criterion_main!(benches);
