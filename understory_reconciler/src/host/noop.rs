// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory host for tests, benchmarks, and demos.
//!
//! Nodes live behind shared handles ([`NoopNode`]), inserts move already-attached nodes the
//! way a DOM does, and every host call is recorded as a [`HostOp`]. Microtasks queue up until
//! [`NoopHost::flush_microtasks`] runs them.
//!
//! ```
//! use understory_reconciler::host::HostConfig;
//! use understory_reconciler::host::noop::NoopHost;
//! use understory_reconciler::value::Props;
//!
//! let mut host = NoopHost::new();
//! let container = host.container();
//! let div = host.create_instance("div", &Props::empty());
//! let text = host.create_text_instance("hi");
//! host.append_initial_child(&div, &text);
//! host.append_child_to_container(&container, &div);
//! assert_eq!(container.markup(), "<div>hi</div>");
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt::{self, Write as _};

use super::{HostConfig, HostUpdate};
use crate::value::Props;

/// A recorded host call. Node ids are [`NoopNode::id`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// `create_instance`.
    Create {
        /// New node.
        id: u32,
        /// Element tag.
        ty: Rc<str>,
    },
    /// `create_text_instance`.
    CreateText {
        /// New node.
        id: u32,
        /// Initial content.
        text: String,
    },
    /// `append_initial_child`.
    AppendInitial {
        /// Parent node.
        parent: u32,
        /// Appended node.
        child: u32,
    },
    /// `append_child_to_container`.
    Append {
        /// Parent node.
        parent: u32,
        /// Appended node.
        child: u32,
    },
    /// `insert_child_to_container`.
    Insert {
        /// Parent node.
        parent: u32,
        /// Inserted node.
        child: u32,
        /// Reference sibling.
        before: u32,
    },
    /// `remove_child`.
    Remove {
        /// Parent node.
        parent: u32,
        /// Removed node.
        child: u32,
    },
    /// `commit_update`.
    Update {
        /// Updated node.
        id: u32,
    },
    /// `hide_instance` or `hide_text_instance`.
    Hide {
        /// Hidden node.
        id: u32,
    },
    /// `unhide_instance` or `unhide_text_instance`.
    Unhide {
        /// Revealed node.
        id: u32,
    },
}

impl HostOp {
    /// Returns true for operations that attach or move a node.
    pub fn is_placement(&self) -> bool {
        matches!(self, Self::Append { .. } | Self::Insert { .. })
    }
}

#[derive(Debug)]
enum NodeKind {
    Container,
    Element(Rc<str>),
    Text,
}

#[derive(Debug)]
struct NodeData {
    id: u32,
    kind: NodeKind,
    text: String,
    props: Props,
    hidden: bool,
    children: Vec<NoopNode>,
    parent: Option<Weak<RefCell<NodeData>>>,
}

/// Shared handle to an in-memory host node.
#[derive(Clone)]
pub struct NoopNode(Rc<RefCell<NodeData>>);

impl fmt::Debug for NoopNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("NoopNode")
            .field("id", &data.id)
            .field("kind", &data.kind)
            .finish_non_exhaustive()
    }
}

impl NoopNode {
    fn new(id: u32, kind: NodeKind, text: &str, props: Props) -> Self {
        Self(Rc::new(RefCell::new(NodeData {
            id,
            kind,
            text: text.into(),
            props,
            hidden: false,
            children: Vec::new(),
            parent: None,
        })))
    }

    /// Stable node id, as used in [`HostOp`].
    pub fn id(&self) -> u32 {
        self.0.borrow().id
    }

    /// Element tag, or `None` for text nodes and containers.
    pub fn tag(&self) -> Option<Rc<str>> {
        match &self.0.borrow().kind {
            NodeKind::Element(tag) => Some(tag.clone()),
            _ => None,
        }
    }

    /// Text content of a text node.
    pub fn text(&self) -> Option<String> {
        let data = self.0.borrow();
        matches!(data.kind, NodeKind::Text).then(|| data.text.clone())
    }

    /// Last committed props of an element node.
    pub fn props(&self) -> Props {
        self.0.borrow().props.clone()
    }

    /// Returns true if hidden by an offscreen boundary.
    pub fn is_hidden(&self) -> bool {
        self.0.borrow().hidden
    }

    /// Attached children in order.
    pub fn children(&self) -> Vec<Self> {
        self.0.borrow().children.clone()
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Serialize the subtree, hidden nodes included. Containers contribute only their children.
    pub fn markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out, true);
        out
    }

    /// Serialize the subtree, skipping hidden nodes.
    pub fn visible_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out, false);
        out
    }

    fn write_markup(&self, out: &mut String, include_hidden: bool) {
        let data = self.0.borrow();
        if data.hidden && !include_hidden {
            return;
        }
        match &data.kind {
            NodeKind::Text => out.push_str(&data.text),
            NodeKind::Container => {
                for child in &data.children {
                    child.write_markup(out, include_hidden);
                }
            }
            NodeKind::Element(tag) => {
                let _ = write!(out, "<{tag}>");
                for child in &data.children {
                    child.write_markup(out, include_hidden);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn detach(&self) {
        let parent = self.0.borrow_mut().parent.take();
        if let Some(parent) = parent.and_then(|p| p.upgrade()) {
            parent
                .borrow_mut()
                .children
                .retain(|c| !Rc::ptr_eq(&c.0, &self.0));
        }
    }

    fn push_child(&self, child: &Self) {
        child.detach();
        child.0.borrow_mut().parent = Some(Rc::downgrade(&self.0));
        self.0.borrow_mut().children.push(child.clone());
    }
}

#[derive(Default)]
struct Shared {
    next_id: u32,
    ops: Vec<HostOp>,
    microtasks: VecDeque<Box<dyn FnOnce()>>,
}

/// In-memory [`HostConfig`]. Clones share the same op log and microtask queue.
#[derive(Clone, Default)]
pub struct NoopHost {
    shared: Rc<RefCell<Shared>>,
}

impl fmt::Debug for NoopHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("NoopHost")
            .field("ops", &shared.ops.len())
            .field("microtasks", &shared.microtasks.len())
            .finish_non_exhaustive()
    }
}

impl NoopHost {
    /// Create a host with an empty op log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh container node.
    pub fn container(&self) -> NoopNode {
        let id = self.next_id();
        NoopNode::new(id, NodeKind::Container, "", Props::empty())
    }

    /// Drain the op log.
    pub fn take_ops(&self) -> Vec<HostOp> {
        core::mem::take(&mut self.shared.borrow_mut().ops)
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.shared.borrow().microtasks.len()
    }

    /// Run queued microtasks, including ones queued while flushing.
    pub fn flush_microtasks(&self) {
        loop {
            let next = self.shared.borrow_mut().microtasks.pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn next_id(&self) -> u32 {
        let mut shared = self.shared.borrow_mut();
        let id = shared.next_id;
        shared.next_id += 1;
        id
    }

    fn log(&self, op: HostOp) {
        self.shared.borrow_mut().ops.push(op);
    }
}

impl HostConfig for NoopHost {
    type Instance = NoopNode;

    fn create_instance(&mut self, ty: &str, props: &Props) -> NoopNode {
        let id = self.next_id();
        let tag: Rc<str> = ty.into();
        self.log(HostOp::Create {
            id,
            ty: tag.clone(),
        });
        NoopNode::new(id, NodeKind::Element(tag), "", props.clone())
    }

    fn create_text_instance(&mut self, content: &str) -> NoopNode {
        let id = self.next_id();
        self.log(HostOp::CreateText {
            id,
            text: content.into(),
        });
        NoopNode::new(id, NodeKind::Text, content, Props::empty())
    }

    fn append_initial_child(&mut self, parent: &NoopNode, child: &NoopNode) {
        self.log(HostOp::AppendInitial {
            parent: parent.id(),
            child: child.id(),
        });
        parent.push_child(child);
    }

    fn append_child_to_container(&mut self, container: &NoopNode, child: &NoopNode) {
        self.log(HostOp::Append {
            parent: container.id(),
            child: child.id(),
        });
        container.push_child(child);
    }

    fn insert_child_to_container(
        &mut self,
        child: &NoopNode,
        container: &NoopNode,
        before: &NoopNode,
    ) {
        self.log(HostOp::Insert {
            parent: container.id(),
            child: child.id(),
            before: before.id(),
        });
        child.detach();
        let index = container
            .0
            .borrow()
            .children
            .iter()
            .position(|c| c.ptr_eq(before));
        let Some(index) = index else {
            tracing::warn!(before = before.id(), "insert before a node that is not a child; appending");
            container.push_child(child);
            return;
        };
        child.0.borrow_mut().parent = Some(Rc::downgrade(&container.0));
        container
            .0
            .borrow_mut()
            .children
            .insert(index, child.clone());
    }

    fn remove_child(&mut self, child: &NoopNode, container: &NoopNode) {
        self.log(HostOp::Remove {
            parent: container.id(),
            child: child.id(),
        });
        let attached = child
            .0
            .borrow()
            .parent
            .as_ref()
            .is_some_and(|p| core::ptr::eq(p.as_ptr(), Rc::as_ptr(&container.0)));
        if !attached {
            tracing::warn!(child = child.id(), "removing a node from a parent it is not attached to");
        }
        child.detach();
    }

    fn commit_update(&mut self, instance: &NoopNode, update: HostUpdate<'_>) {
        self.log(HostOp::Update { id: instance.id() });
        let mut data = instance.0.borrow_mut();
        match update {
            HostUpdate::Text(text) => data.text = text.into(),
            HostUpdate::Props { new, .. } => data.props = new.clone(),
        }
    }

    fn hide_instance(&mut self, instance: &NoopNode) {
        self.log(HostOp::Hide { id: instance.id() });
        instance.0.borrow_mut().hidden = true;
    }

    fn unhide_instance(&mut self, instance: &NoopNode, _props: &Props) {
        self.log(HostOp::Unhide { id: instance.id() });
        instance.0.borrow_mut().hidden = false;
    }

    fn hide_text_instance(&mut self, instance: &NoopNode) {
        self.log(HostOp::Hide { id: instance.id() });
        instance.0.borrow_mut().hidden = true;
    }

    fn unhide_text_instance(&mut self, instance: &NoopNode, content: &str) {
        self.log(HostOp::Unhide { id: instance.id() });
        let mut data = instance.0.borrow_mut();
        data.hidden = false;
        data.text = content.into();
    }

    fn schedule_microtask(&mut self, task: Box<dyn FnOnce()>) {
        self.shared.borrow_mut().microtasks.push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn ids(node: &NoopNode) -> Vec<u32> {
        node.children().iter().map(NoopNode::id).collect()
    }

    #[test]
    fn insert_moves_attached_node() {
        let mut host = NoopHost::new();
        let root = host.container();
        let a = host.create_text_instance("a");
        let b = host.create_text_instance("b");
        let c = host.create_text_instance("c");
        for n in [&a, &b, &c] {
            host.append_child_to_container(&root, n);
        }
        assert_eq!(root.markup(), "abc");
        host.insert_child_to_container(&c, &root, &a);
        assert_eq!(root.markup(), "cab");
        host.append_child_to_container(&root, &c);
        assert_eq!(ids(&root), vec![a.id(), b.id(), c.id()]);
    }

    #[test]
    fn remove_and_hide() {
        let mut host = NoopHost::new();
        let root = host.container();
        let div = host.create_instance("div", &Props::empty());
        let t = host.create_text_instance("x");
        host.append_initial_child(&div, &t);
        host.append_child_to_container(&root, &div);
        host.hide_instance(&div);
        assert_eq!(root.markup(), "<div>x</div>");
        assert_eq!(root.visible_markup(), "");
        host.unhide_instance(&div, &Props::empty());
        assert_eq!(root.visible_markup(), "<div>x</div>");
        host.remove_child(&div, &root);
        assert!(root.children().is_empty());
        let ops = host.take_ops();
        assert!(matches!(ops.last(), Some(HostOp::Remove { .. })));
    }

    #[test]
    fn microtasks_run_in_order() {
        let mut host = NoopHost::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            host.schedule_microtask(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(host.pending_microtasks(), 3);
        host.flush_microtasks();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }
}
