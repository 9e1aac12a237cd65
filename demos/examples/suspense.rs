// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Suspense basics.
//!
//! A component reads a value that is not ready yet. The nearest boundary shows its fallback
//! while the primary content stays mounted but hidden, and the content is revealed once the
//! value resolves.
//!
//! Run:
//! - `cargo run -p understory_demos --example suspense`

use std::cell::RefCell;
use std::rc::Rc;

use tracing_subscriber::EnvFilter;
use understory_reconciler::host::noop::NoopHost;
use understory_reconciler::scheduler::manual::ManualScheduler;
use understory_reconciler::{Component, Node, Root, Thenable, h, suspense, text};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let source = Rc::new(RefCell::new(Thenable::resolved("first page")));
    let reader = source.clone();
    let page = Component::new("Page", move |hooks, _| {
        let thenable = reader.borrow().clone();
        let body = hooks.use_thenable(&thenable)?;
        Ok(h("article")
            .child(text(body.as_str().unwrap_or_default()))
            .into())
    });
    let app = |generation: i64| -> Node {
        suspense(
            h("p").child("loading..."),
            h(page.clone()).prop("generation", generation),
        )
        .into()
    };

    let host = NoopHost::new();
    let container = host.container();
    let scheduler = Rc::new(ManualScheduler::new());
    let root = Root::new(host.clone(), container.clone(), scheduler.clone());

    root.render_sync(app(0)).unwrap();
    println!("== Ready ==");
    println!("visible: {}", container.visible_markup());

    let next = Thenable::new();
    *source.borrow_mut() = next.clone();
    root.render_sync(app(1)).unwrap();
    println!("== Waiting ==");
    println!("visible: {}", container.visible_markup());
    println!("mounted: {}", container.markup());

    next.resolve("second page");
    host.flush_microtasks();
    scheduler.flush_all();
    println!("== Resolved ==");
    println!("visible: {}", container.visible_markup());
    for op in host.take_ops() {
        println!("  {op:?}");
    }
}
