//! # Scope Kernel Benchmarks
//!
//! | Scenario | What is measured |
//! |----------|------------------|
//! | Fork churn | create + dispose of a fork under an existing runtime |
//! | Dependency flap | bind + unbind of a service watched by N forks |
//! | Config diff | classification of a config change against acceptors |
//! | Restart | soft-clear and re-run of a runtime with N disposables |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use scope_kernel::{diff, Acceptor, Context, Plugin, Service};
use serde_json::{json, Map, Value};
use std::time::Duration;

fn bench_fork_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("fork-churn");
    group.measurement_time(Duration::from_secs(5));

    let root = Context::new();
    let plugin = Plugin::builder("churn").reusable().apply(|_, _| Ok(())).build();
    // keep the runtime alive between iterations
    let _anchor = root.plugin(&plugin, json!({})).expect("anchor fork");

    group.bench_function("plugin_then_dispose", |b| {
        b.iter(|| {
            let fork = root.plugin(&plugin, json!({})).expect("fork");
            black_box(fork.dispose())
        })
    });
    group.finish();
}

fn bench_dependency_flap(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency-flap");

    for forks in [1usize, 10, 100] {
        let root = Context::new();
        let plugin = Plugin::builder("watcher")
            .inject(["dep"])
            .reusable()
            .apply(|ctx, _| {
                ctx.on_dispose(|| {});
                Ok(())
            })
            .build();
        let _forks: Vec<_> = (0..forks)
            .map(|_| root.plugin(&plugin, json!({})).expect("fork"))
            .collect();

        group.throughput(Throughput::Elements(forks as u64));
        group.bench_with_input(BenchmarkId::new("bind_unbind", forks), &forks, |b, _| {
            b.iter(|| {
                root.set("dep", Some(Service::data(()))).expect("bind");
                root.set("dep", None).expect("unbind");
            })
        });
    }
    group.finish();
}

fn bench_config_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("config-diff");

    for keys in [4usize, 64, 512] {
        let old: Map<String, Value> = (0..keys).map(|i| (format!("k{i}"), json!(i))).collect();
        let mut new = old.clone();
        new.insert("k0".to_string(), json!("changed"));
        let (old, new) = (Value::Object(old), Value::Object(new));
        let acceptors = vec![
            Acceptor::keys((0..keys / 2).map(|i| format!("k{i}"))),
            Acceptor::keys(["k1"]).on_change(|_| false),
        ];

        group.bench_with_input(BenchmarkId::new("diff", keys), &keys, |b, _| {
            b.iter(|| black_box(diff(&old, &new, &acceptors)))
        });
    }
    group.finish();
}

fn bench_restart(c: &mut Criterion) {
    let mut group = c.benchmark_group("restart");

    for effects in [1usize, 32, 256] {
        let root = Context::new();
        let plugin = Plugin::function("heavy", move |ctx, _| {
            for _ in 0..effects {
                ctx.on_dispose(|| {});
            }
            Ok(())
        });
        let fork = root.plugin(&plugin, json!({})).expect("fork");
        let runtime = fork.runtime();

        group.throughput(Throughput::Elements(effects as u64));
        group.bench_with_input(BenchmarkId::new("runtime_restart", effects), &effects, |b, _| {
            b.iter(|| runtime.restart())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fork_churn,
    bench_dependency_flap,
    bench_config_diff,
    bench_restart
);
criterion_main!(benches);
