use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use std::time::SystemTime;

use appserver::cache::{ArtifactCache, FileCache};
use appserver::engine::Template;

fn cache_push_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_push");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut cache = FileCache::from_capacity(size);
                let time = SystemTime::now();
                let content = Bytes::from("test content");

                for i in 0..size {
                    let filename = format!("file{}.txt", i);
                    cache.push(
                        black_box(&filename),
                        black_box(content.clone()),
                        black_box(time),
                    );
                }
            });
        });
    }

    group.finish();
}

fn cache_find_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_find");

    for size in [10, 100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut cache = FileCache::from_capacity(size);
            let time = SystemTime::now();
            let content = Bytes::from("test content");

            for i in 0..size {
                let filename = format!("file{}.txt", i);
                cache.push(&filename, content.clone(), time);
            }

            b.iter(|| {
                for i in 0..size {
                    let filename = format!("file{}.txt", i);
                    let _ = cache.find(black_box(&filename), black_box(time));
                }
            });
        });
    }

    group.finish();
}

fn cache_find_miss_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_find_miss");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut cache = FileCache::from_capacity(size);
            let time = SystemTime::now();
            let content = Bytes::from("test content");

            for i in 0..size {
                let filename = format!("file{}.txt", i);
                cache.push(&filename, content.clone(), time);
            }

            b.iter(|| {
                let _ = cache.find(black_box("nonexistent.txt"), black_box(time));
            });
        });
    }

    group.finish();
}

fn cache_eviction_benchmark(c: &mut Criterion) {
    c.bench_function("cache_eviction", |b| {
        b.iter(|| {
            let mut cache = FileCache::from_capacity(100);
            let time = SystemTime::now();
            let content = Bytes::from("test content");

            for i in 0..200 {
                let filename = format!("file{}.txt", i);
                cache.push(
                    black_box(&filename),
                    black_box(content.clone()),
                    black_box(time),
                );
            }
        });
    });
}

fn cache_time_invalidation_benchmark(c: &mut Criterion) {
    c.bench_function("cache_time_invalidation", |b| {
        let mut cache = FileCache::from_capacity(100);
        let time1 = SystemTime::now();
        let time2 = time1 + std::time::Duration::from_secs(1);
        let content = Bytes::from("test content");

        for i in 0..100 {
            let filename = format!("file{}.txt", i);
            cache.push(&filename, content.clone(), time1);
        }

        b.iter(|| {
            for i in 0..100 {
                let filename = format!("file{}.txt", i);
                let _ = cache.find(black_box(&filename), black_box(time2));
            }
        });
    });
}

/// 编译产物缓存：命中路径的开销（mtime stat + HashMap 查找 + Arc 克隆）
fn artifact_cache_hit_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.tpl");
    fs::write(&path, "<h1>{{ title }}</h1><p>{{ body }}</p>").unwrap();

    let mut cache: ArtifactCache<Template> = ArtifactCache::new();
    let name = path.to_string_lossy().to_string();
    cache
        .get_or_build(&path, |src| Template::compile(&name, src))
        .unwrap();

    c.bench_function("artifact_cache_hit", |b| {
        b.iter(|| {
            let _ = cache
                .get_or_build(black_box(&path), |src| Template::compile(&name, src))
                .unwrap();
        });
    });
}

/// 编译产物缓存：未命中时的完整编译路径
fn artifact_cache_rebuild_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.tpl");
    fs::write(&path, "<h1>{{ title }}</h1><p>{{ body }}</p>").unwrap();
    let name = path.to_string_lossy().to_string();

    c.bench_function("artifact_cache_rebuild", |b| {
        b.iter(|| {
            // 每轮新建缓存，强制走读文件 + 编译路径
            let mut cache: ArtifactCache<Template> = ArtifactCache::new();
            let _ = cache
                .get_or_build(black_box(&path), |src| Template::compile(&name, src))
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    cache_push_benchmark,
    cache_find_benchmark,
    cache_find_miss_benchmark,
    cache_eviction_benchmark,
    cache_time_invalidation_benchmark,
    artifact_cache_hit_benchmark,
    artifact_cache_rebuild_benchmark
);
criterion_main!(benches);
