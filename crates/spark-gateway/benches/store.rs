//! 请求路径上的版本查找开销：单路由多版本与多路由存储两种形态。

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use criterion::{Criterion, criterion_group, criterion_main};
use spark_gateway::endpoint::{Endpoint, RouteKey};
use spark_gateway::store::{EndpointStore, MultiVersionEndpoint};

fn endpoint(pattern: &str, version: &str) -> Endpoint {
    Endpoint {
        version: version.to_owned(),
        http_method: "GET".to_owned(),
        http_pattern: pattern.to_owned(),
        upstream_uri: format!("/backend{pattern}"),
        ..Endpoint::default()
    }
}

fn bench_find_by_version(c: &mut Criterion) {
    let route = MultiVersionEndpoint::new();
    for index in 0..16 {
        let version = format!("v{index}");
        route.update(&version, endpoint("/users", &version));
    }

    c.bench_function("multi_version/find_hit", |b| {
        b.iter(|| black_box(route.find_by_version(black_box("v7"))))
    });
    c.bench_function("multi_version/find_miss", |b| {
        b.iter(|| black_box(route.find_by_version(black_box("v99"))))
    });
}

fn bench_store_lookup(c: &mut Criterion) {
    let store = EndpointStore::new();
    for index in 0..1024 {
        let pattern = format!("/api/{index}");
        let (route, _) = store.select_or_insert(RouteKey::new("GET", &pattern));
        route.update("v1", endpoint(&pattern, "v1"));
    }
    let key = RouteKey::new("GET", "/api/512");

    c.bench_function("store/route_then_version", |b| {
        b.iter(|| {
            let route = store.get(black_box(&key));
            black_box(route.and_then(|route| route.find_by_version("v1")))
        })
    });
}

/// 后台读者与写者同时运行时的查找开销。
fn bench_contended_find(c: &mut Criterion) {
    let route = Arc::new(MultiVersionEndpoint::new());
    route.update("v1", endpoint("/users", "v1"));
    let stop = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::new();
    for _ in 0..3 {
        let route = Arc::clone(&route);
        let stop = Arc::clone(&stop);
        workers.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                black_box(route.find_by_version("v1"));
            }
        }));
    }
    {
        let route = Arc::clone(&route);
        let stop = Arc::clone(&stop);
        workers.push(thread::spawn(move || {
            let mut marker = 0u64;
            while !stop.load(Ordering::Relaxed) {
                marker = marker.wrapping_add(1);
                route.update("v1", endpoint(&format!("/users/{marker}"), "v1"));
                thread::yield_now();
            }
        }));
    }

    c.bench_function("multi_version/find_contended", |b| {
        b.iter(|| black_box(route.find_by_version(black_box("v1"))))
    });

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }
}

criterion_group!(
    benches,
    bench_find_by_version,
    bench_store_lookup,
    bench_contended_find
);
criterion_main!(benches);
