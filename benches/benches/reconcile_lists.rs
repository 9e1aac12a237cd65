// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::rc::Rc;

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_reconciler::host::noop::{NoopHost, NoopNode};
use understory_reconciler::scheduler::manual::ManualScheduler;
use understory_reconciler::{Node, Root, h, text};

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

fn keyed_list(keys: &[usize]) -> Node {
    Node::list(
        keys.iter()
            .map(|k| h("li").key(k.to_string().as_str()).child(text(k)).into()),
    )
}

fn mounted(keys: &[usize]) -> (Root<NoopHost>, NoopNode) {
    let host = NoopHost::new();
    let container = host.container();
    let root = Root::new(host, container.clone(), Rc::new(ManualScheduler::new()));
    root.render_sync(keyed_list(keys)).unwrap();
    (root, container)
}

fn shuffled(keys: &[usize], seed: u64) -> Vec<usize> {
    let mut out = keys.to_vec();
    let mut rng = Rng::new(seed);
    for i in (1..out.len()).rev() {
        let j = rng.below(i + 1);
        out.swap(i, j);
    }
    out
}

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount");
    for &n in &[100usize, 1_000] {
        let keys: Vec<usize> = (0..n).collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("keyed_list_n{}", n), |b| {
            b.iter(|| {
                let (_root, container) = mounted(&keys);
                black_box(container.children().len());
            });
        });
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    for &n in &[100usize, 1_000] {
        let keys: Vec<usize> = (0..n).collect();
        let reversed: Vec<usize> = keys.iter().rev().copied().collect();
        let shuffled = shuffled(&keys, 0xBADC_F00D_1234_5678);
        let mut appended = keys.clone();
        appended.push(n);
        group.throughput(Throughput::Elements(n as u64));
        for (name, next) in [
            ("identical", &keys),
            ("reverse", &reversed),
            ("shuffle", &shuffled),
            ("append_one", &appended),
        ] {
            group.bench_function(format!("{}_n{}", name, n), |b| {
                b.iter_batched(
                    || mounted(&keys),
                    |(root, container)| {
                        root.render_sync(keyed_list(next)).unwrap();
                        black_box(container.children().len());
                    },
                    BatchSize::SmallInput,
                );
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_mount, bench_update);
criterion_main!(benches);
