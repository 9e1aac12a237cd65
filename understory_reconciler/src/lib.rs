// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_reconciler --heading-base-level=0

//! Understory Reconciler: incremental, interruptible reconciliation of declarative UI trees.
//!
//! Components describe what the UI should look like as a tree of [`Node`]s. A [`Root`] keeps
//! the tree that was last committed, works out what changed when a new description arrives
//! or component state changes, and applies exactly those changes to a host tree through a
//! [`HostConfig`].
//!
//! - Work is split into one unit per fiber, so a render can yield to a [`Scheduler`] and
//!   resume later.
//! - Every update carries a priority lane. Urgent lanes render first; skipped updates are
//!   replayed in order when their lane is rendered.
//! - Subtrees whose inputs did not change are skipped without running any component.
//! - Keyed children are matched by key and moved rather than recreated.
//! - A component can suspend on a [`Thenable`]; the nearest suspense boundary shows its
//!   fallback and retries once the value settles.
//!
//! ## API overview
//!
//! - [`Root`]: mount point; `render`, `flush_sync`, `start_transition`, `unmount`.
//! - [`element`]: [`h`], [`text`], [`fragment`], [`provider`], [`suspense`], [`Component`],
//!   [`memo`].
//! - [`Hooks`]: `use_state`, `use_effect`, `use_layout_effect`, `use_ref`, `use_memo`,
//!   `use_callback`, `use_context`, `use_thenable`, `use_transition`.
//! - [`HostConfig`]: the platform adapter. [`host::noop::NoopHost`] records every operation.
//! - [`Scheduler`]: the cooperative task queue. [`scheduler::manual::ManualScheduler`] is
//!   flushed explicitly, which makes tests and demos deterministic.
//!
//! ## Minimal usage
//!
//! ```
//! use std::rc::Rc;
//! use understory_reconciler::element::{h, text, Component};
//! use understory_reconciler::host::noop::NoopHost;
//! use understory_reconciler::scheduler::manual::ManualScheduler;
//! use understory_reconciler::Root;
//!
//! let greeting = Component::new("Greeting", |_hooks, props| {
//!     let name = props.get("name").and_then(|v| v.as_str()).unwrap_or("world");
//!     Ok(h("p").child(text(format!("hello {name}"))).into())
//! });
//!
//! let host = NoopHost::new();
//! let container = host.container();
//! let scheduler = Rc::new(ManualScheduler::new());
//! let root = Root::new(host, container.clone(), scheduler);
//!
//! root.render_sync(h(greeting.clone()).prop("name", "reconciler")).unwrap();
//! assert_eq!(container.markup(), "<p>hello reconciler</p>");
//! ```
//!
//! This crate is `no_std` and uses `alloc`. The single-threaded model uses `Rc` throughout.

#![no_std]

extern crate alloc;

pub mod context;
pub mod element;
pub mod error;
pub mod fiber;
pub mod flags;
pub mod hooks;
pub mod host;
pub mod lanes;
pub mod root;
pub mod scheduler;
pub mod suspense;
mod update_queue;
pub mod value;

mod begin_work;
mod child_fibers;
mod commit;
mod complete_work;
mod work_loop;

#[cfg(test)]
mod scenarios;

pub use context::Context;
pub use element::{
    Component, Element, ElementType, Key, Memo, Node, create_element, fragment, h, memo, memo_with,
    provider, suspense, text,
};
pub use error::{Interrupt, ReconcileError};
pub use fiber::{FiberId, FiberKind};
pub use flags::Flags;
pub use hooks::{Destroy, Hooks, SetState, StartTransition};
pub use host::{HostConfig, HostUpdate};
pub use lanes::{Lane, Lanes};
pub use root::{Root, RootOptions};
pub use scheduler::{Priority, Scheduler, Task, TaskHandle};
pub use suspense::{Thenable, ThenableState};
pub use value::{Callback, Props, Ref, Value, shallow_equals};
