//! Streaming throughput benchmarks for the ar, cpio and tar codecs
//!
//! Each benchmark writes an archive of equally sized members into memory,
//! or reads one back, so the numbers cover header encoding, padding and the
//! bounded body copy.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use oxitape_archive::ArchiveFormat;
use oxitape_core::{ArchiveReader, ArchiveWriter, Header};
use std::hint::black_box;
use std::io::Cursor;

const FORMATS: [ArchiveFormat; 3] = [ArchiveFormat::Ar, ArchiveFormat::Cpio, ArchiveFormat::Tar];

/// Member sizes: header-dominated through body-dominated.
const SIZES: [(&str, usize, usize); 3] = [
    ("1000x100B", 1000, 100),
    ("100x16KB", 100, 16 * 1024),
    ("4x1MB", 4, 1024 * 1024),
];

fn text_like(size: usize) -> Vec<u8> {
    let text = b"The quick brown fox jumps over the lazy dog. ";
    text.iter().copied().cycle().take(size).collect()
}

fn build_archive(format: ArchiveFormat, count: usize, body: &[u8]) -> Vec<u8> {
    let mut output = Vec::new();
    {
        let mut writer = format.create_writer(&mut output).unwrap();
        for i in 0..count {
            let header = Header::file(format!("member{:05}.txt", i), body.len() as u64);
            writer.append(&header, body).unwrap();
        }
        writer.close().unwrap();
    }
    output
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    for (size_name, count, size) in SIZES {
        let body = text_like(size);
        group.throughput(Throughput::Bytes((count * size) as u64));
        for format in FORMATS {
            group.bench_with_input(
                BenchmarkId::new(format.to_string(), size_name),
                &body,
                |b, body| {
                    b.iter(|| black_box(build_archive(format, count, black_box(body))));
                },
            );
        }
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    for (size_name, count, size) in SIZES {
        let body = text_like(size);
        group.throughput(Throughput::Bytes((count * size) as u64));
        for format in FORMATS {
            let archive = build_archive(format, count, &body);
            group.bench_with_input(
                BenchmarkId::new(format.to_string(), size_name),
                &archive,
                |b, archive| {
                    b.iter(|| {
                        let mut reader = format.open_reader(Cursor::new(archive.as_slice())).unwrap();
                        let mut buffer = [0u8; 8192];
                        let mut total = 0usize;
                        while reader.next_entry().unwrap().is_some() {
                            loop {
                                let n = reader.read_data(&mut buffer).unwrap();
                                if n == 0 {
                                    break;
                                }
                                total += n;
                            }
                        }
                        black_box(total);
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_skip(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_only");

    let body = text_like(16 * 1024);
    for format in FORMATS {
        let archive = build_archive(format, 100, &body);
        group.bench_with_input(
            BenchmarkId::from_parameter(format.to_string()),
            &archive,
            |b, archive| {
                b.iter(|| {
                    let mut reader = format.open_reader(Cursor::new(archive.as_slice())).unwrap();
                    let mut entries = 0usize;
                    while reader.next_entry().unwrap().is_some() {
                        entries += 1;
                    }
                    black_box(entries);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_write, bench_read, bench_skip);
criterion_main!(benches);
