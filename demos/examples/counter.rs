// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Counter basics.
//!
//! Mounts a counter, dispatches state updates at different priorities, and prints the host
//! operations each commit produced. A transition is interrupted by an urgent update and then
//! replayed on top of it.
//!
//! Run:
//! - `cargo run -p understory_demos --example counter`
//! - `RUST_LOG=understory_reconciler=debug cargo run -p understory_demos --example counter`

use std::cell::RefCell;
use std::rc::Rc;

use tracing_subscriber::EnvFilter;
use understory_reconciler::host::noop::NoopHost;
use understory_reconciler::scheduler::manual::ManualScheduler;
use understory_reconciler::{Component, Root, SetState, h, text};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let setter: Rc<RefCell<Option<SetState<i64>>>> = Rc::default();
    let slot = setter.clone();
    let counter = Component::new("Counter", move |hooks, _| {
        let (count, set) = hooks.use_state(0_i64)?;
        *slot.borrow_mut() = Some(set);
        Ok(h("div")
            .child(h("span").child("count: "))
            .child(h("b").child(text(count)))
            .into())
    });

    let host = NoopHost::new();
    let container = host.container();
    let scheduler = Rc::new(ManualScheduler::new());
    let root = Root::new(host.clone(), container.clone(), scheduler.clone());

    root.render(h(counter)).unwrap();
    scheduler.flush_all();
    println!("== Mount ==");
    println!("{}", container.markup());
    for op in host.take_ops() {
        println!("  {op:?}");
    }

    let set = setter.borrow().clone().unwrap();

    println!("== Three updates, one render ==");
    root.flush_sync(|| {
        set.update(|n| n + 1);
        set.update(|n| n + 1);
        set.update(|n| n + 1);
    })
    .unwrap();
    println!("{}", container.markup());
    for op in host.take_ops() {
        println!("  {op:?}");
    }

    println!("== Transition interrupted by an urgent update ==");
    root.start_transition(|| set.update(|n| n * 100));
    scheduler.set_yield_budget(Some(1));
    scheduler.flush_one();
    scheduler.set_yield_budget(None);
    println!("after yielding:  {}", container.markup());
    root.flush_sync(|| set.update(|n| n + 1)).unwrap();
    println!("after urgent:    {}", container.markup());
    scheduler.flush_all();
    println!("after replaying: {}", container.markup());
    for op in host.take_ops() {
        println!("  {op:?}");
    }
}
