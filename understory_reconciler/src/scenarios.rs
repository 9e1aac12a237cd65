// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end behavior of a root over the in-memory host and the manual scheduler.

use alloc::boxed::Box;
use alloc::format;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::context::Context;
use crate::element::{Component, Node, h, memo, provider, suspense, text};
use crate::error::ReconcileError;
use crate::flags::Flags;
use crate::hooks::{Destroy, SetState, StartTransition};
use crate::host::noop::{HostOp, NoopHost, NoopNode};
use crate::lanes::Lanes;
use crate::root::Root;
use crate::scheduler::manual::ManualScheduler;
use crate::suspense::Thenable;
use crate::value::{Ref, Value};
use crate::work_loop::RootExitStatus;

type Slot<T> = Rc<RefCell<Option<T>>>;
type Log = Rc<RefCell<Vec<(&'static str, &'static str)>>>;

struct Harness {
    host: NoopHost,
    container: NoopNode,
    scheduler: Rc<ManualScheduler>,
    root: Root<NoopHost>,
}

fn harness() -> Harness {
    let host = NoopHost::new();
    let container = host.container();
    let scheduler = Rc::new(ManualScheduler::new());
    let root = Root::new(host.clone(), container.clone(), scheduler.clone());
    Harness {
        host,
        container,
        scheduler,
        root,
    }
}

impl Harness {
    /// Run microtasks and scheduled tasks until both queues are empty.
    fn flush(&self) {
        loop {
            self.host.flush_microtasks();
            if !self.scheduler.flush_one() {
                break;
            }
        }
    }

    fn markup(&self) -> alloc::string::String {
        self.container.markup()
    }

    fn child_ids(&self) -> Vec<u32> {
        self.container.children().iter().map(NoopNode::id).collect()
    }
}

fn counter(renders: &Rc<Cell<u32>>, setter: &Slot<SetState<i64>>) -> Component {
    let renders = renders.clone();
    let setter = setter.clone();
    Component::new("Counter", move |hooks, _| {
        renders.set(renders.get() + 1);
        let (n, set) = hooks.use_state(0_i64)?;
        *setter.borrow_mut() = Some(set);
        Ok(h("span").child(text(n)).into())
    })
}

fn setter_of<T>(slot: &Slot<T>) -> T
where
    T: Clone,
{
    slot.borrow().clone().expect("component has rendered")
}

fn keyed(keys: &[&str]) -> Node {
    Node::list(keys.iter().map(|k| h("li").key(*k).child(text(k)).into()))
}

fn effect_logger(name: &'static str, log: &Log) -> Component {
    let log = log.clone();
    Component::new(name, move |hooks, _| {
        let l = log.clone();
        hooks.use_effect(
            move || {
                l.borrow_mut().push(("create", name));
                let l = l.clone();
                Some(Box::new(move || l.borrow_mut().push(("destroy", name))) as Destroy)
            },
            None,
        )?;
        Ok(Node::Empty)
    })
}

fn data(source: &Rc<RefCell<Thenable>>) -> Component {
    let source = source.clone();
    Component::new("Data", move |hooks, _| {
        let thenable = source.borrow().clone();
        let value = hooks.use_thenable(&thenable)?;
        Ok(h("span").child(text(value.as_str().unwrap_or("?"))).into())
    })
}

#[test]
fn mount_then_update_touches_only_changed_text() {
    let t = harness();
    let renders = Rc::new(Cell::new(0));
    let setter = Slot::default();
    t.root.render(h(counter(&renders, &setter))).unwrap();
    assert_eq!(t.markup(), "", "nothing renders before the scheduler runs");
    t.flush();
    assert_eq!(t.markup(), "<span>0</span>");
    let ops = t.host.take_ops();
    assert_eq!(ops.iter().filter(|op| op.is_placement()).count(), 1);

    let text_id = t.container.children()[0].children()[0].id();
    setter_of(&setter).set(5);
    t.flush();
    assert_eq!(t.markup(), "<span>5</span>");
    assert_eq!(t.host.take_ops(), vec![HostOp::Update { id: text_id }]);
    assert_eq!(renders.get(), 2);
}

#[test]
fn unchanged_child_element_is_not_rerendered() {
    let t = harness();
    let child_renders = Rc::new(Cell::new(0));
    let cr = child_renders.clone();
    let child = Component::new("Child", move |_, _| {
        cr.set(cr.get() + 1);
        Ok(h("b").child("child").into())
    });
    let stable: Node = h(child).into();
    let setter: Slot<SetState<i64>> = Slot::default();
    let s = setter.clone();
    let parent = Component::new("Parent", move |hooks, _| {
        let (n, set) = hooks.use_state(0_i64)?;
        *s.borrow_mut() = Some(set);
        Ok(h("div").child(text(n)).child(stable.clone()).into())
    });

    t.root.render_sync(h(parent)).unwrap();
    assert_eq!(t.markup(), "<div>0<b>child</b></div>");
    setter_of(&setter).set(1);
    t.flush();
    assert_eq!(t.markup(), "<div>1<b>child</b></div>");
    assert_eq!(child_renders.get(), 1);
}

#[test]
fn keyed_reorder_moves_instead_of_recreating() {
    for (next, moves) in [(["b", "c", "a"], 1), (["c", "a", "b"], 2)] {
        let t = harness();
        t.root.render_sync(keyed(&["a", "b", "c"])).unwrap();
        let ids = t.child_ids();
        t.host.take_ops();

        t.root.render_sync(keyed(&next)).unwrap();
        let ops = t.host.take_ops();
        assert!(ops.iter().all(HostOp::is_placement), "only moves expected: {ops:?}");
        assert_eq!(ops.len(), moves);

        let expected: Vec<u32> = next
            .iter()
            .map(|k| match *k {
                "a" => ids[0],
                "b" => ids[1],
                _ => ids[2],
            })
            .collect();
        assert_eq!(t.child_ids(), expected);
        assert_eq!(
            t.markup(),
            format!("<li>{}</li><li>{}</li><li>{}</li>", next[0], next[1], next[2])
        );
    }
}

#[test]
fn removed_keys_are_deleted_and_new_keys_created() {
    let t = harness();
    t.root.render_sync(keyed(&["a", "b", "c"])).unwrap();
    t.host.take_ops();
    t.root.render_sync(keyed(&["c", "d"])).unwrap();
    assert_eq!(t.markup(), "<li>c</li><li>d</li>");
    let ops = t.host.take_ops();
    assert_eq!(
        ops.iter()
            .filter(|op| matches!(op, HostOp::Remove { .. }))
            .count(),
        2
    );
    assert_eq!(
        ops.iter()
            .filter(|op| matches!(op, HostOp::Create { .. }))
            .count(),
        1
    );
}

#[test]
fn updaters_in_one_batch_compose() {
    let t = harness();
    let renders = Rc::new(Cell::new(0));
    let setter = Slot::default();
    t.root.render_sync(h(counter(&renders, &setter))).unwrap();
    let set = setter_of(&setter);
    t.root
        .flush_sync(|| {
            set.update(|n| n + 1);
            set.update(|n| n + 1);
            set.update(|n| n + 1);
        })
        .unwrap();
    assert_eq!(t.markup(), "<span>3</span>");
    assert_eq!(renders.get(), 2, "one render for the whole batch");
}

#[test]
fn interrupted_render_keeps_lower_priority_updates() {
    let t = harness();
    let renders = Rc::new(Cell::new(0));
    let setter = Slot::default();
    t.root.render_sync(h(counter(&renders, &setter))).unwrap();
    t.flush();
    let set = setter_of(&setter);

    set.update(|n| n + 1);
    t.scheduler.set_yield_budget(Some(1));
    assert!(t.scheduler.flush_one());
    assert_eq!(t.markup(), "<span>0</span>", "yielded before commit");
    t.scheduler.set_yield_budget(None);

    t.root.flush_sync(|| set.update(|n| n * 10)).unwrap();
    // The sync render skips the earlier default update and everything after it.
    assert_eq!(t.markup(), "<span>0</span>");
    assert!(t.root.pending_lanes().unwrap().contains(Lanes::DEFAULT));

    t.flush();
    assert_eq!(t.markup(), "<span>10</span>");
    assert!(t.root.pending_lanes().unwrap().is_empty());
}

#[test]
fn all_cleanups_run_before_any_create() {
    let t = harness();
    let log: Log = Rc::default();
    let a = effect_logger("A", &log);
    let b = effect_logger("B", &log);
    let tree = |v: i64| {
        Node::list([
            h(a.clone()).prop("v", v).into(),
            h(b.clone()).prop("v", v).into(),
        ])
    };

    t.root.render_sync(tree(1)).unwrap();
    assert!(t.root.flush_passive_effects().unwrap());
    assert_eq!(*log.borrow(), [("create", "A"), ("create", "B")]);
    log.borrow_mut().clear();

    t.root.render_sync(tree(2)).unwrap();
    t.root.flush_passive_effects().unwrap();
    assert_eq!(
        *log.borrow(),
        [
            ("destroy", "A"),
            ("destroy", "B"),
            ("create", "A"),
            ("create", "B")
        ]
    );
    log.borrow_mut().clear();

    t.root.unmount().unwrap();
    t.root.flush_passive_effects().unwrap();
    assert_eq!(*log.borrow(), [("destroy", "A"), ("destroy", "B")]);
    assert_eq!(t.markup(), "");
}

#[test]
fn layout_effects_run_during_commit_and_passive_later() {
    let t = harness();
    let log: Log = Rc::default();
    let l = log.clone();
    let comp = Component::new("Effects", move |hooks, _| {
        let layout = l.clone();
        hooks.use_layout_effect(
            move || {
                layout.borrow_mut().push(("layout", "create"));
                None
            },
            Some(vec![]),
        )?;
        let passive = l.clone();
        hooks.use_effect(
            move || {
                passive.borrow_mut().push(("passive", "create"));
                None
            },
            Some(vec![]),
        )?;
        Ok(Node::Empty)
    });

    t.root.render_sync(h(comp.clone())).unwrap();
    assert_eq!(*log.borrow(), [("layout", "create")]);
    t.flush();
    assert_eq!(*log.borrow(), [("layout", "create"), ("passive", "create")]);

    // Re-rendered with unchanged deps: nothing runs again.
    t.root.render_sync(h(comp).prop("again", true)).unwrap();
    t.flush();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn suspended_update_shows_fallback_then_reveals_same_nodes() {
    let t = harness();
    let source = Rc::new(RefCell::new(Thenable::resolved("one")));
    let data = data(&source);
    let app = |generation: i64| -> Node {
        suspense(text("loading"), h(data.clone()).prop("gen", generation)).into()
    };

    t.root.render_sync(app(0)).unwrap();
    assert_eq!(t.markup(), "<span>one</span>");
    let span = t.container.children()[0].clone();

    let pending = Thenable::new();
    *source.borrow_mut() = pending.clone();
    t.root.render_sync(app(1)).unwrap();
    assert_eq!(t.container.visible_markup(), "loading");
    assert_eq!(t.markup(), "<span>one</span>loading", "primary stays mounted");
    assert!(span.is_hidden());

    pending.resolve("two");
    t.flush();
    assert_eq!(t.markup(), "<span>two</span>");
    assert!(t.container.children()[0].ptr_eq(&span));
    assert!(!span.is_hidden());
}

#[test]
fn suspended_mount_shows_fallback_then_mounts_primary() {
    let t = harness();
    let pending = Thenable::new();
    let source = Rc::new(RefCell::new(pending.clone()));
    let app: Node = suspense(text("loading"), h(data(&source))).into();

    t.root.render_sync(app).unwrap();
    assert_eq!(t.markup(), "loading");

    pending.resolve("ready");
    t.flush();
    assert_eq!(t.markup(), "<span>ready</span>");
    assert_eq!(t.container.visible_markup(), "<span>ready</span>");
}

#[test]
fn suspended_fallback_is_caught_by_outer_boundary() {
    let t = harness();
    let fallback = Thenable::new();
    let inner = Thenable::new();
    let fallback_source = Rc::new(RefCell::new(fallback.clone()));
    let inner_source = Rc::new(RefCell::new(inner.clone()));
    let nested = suspense(h(data(&fallback_source)), h(data(&inner_source)));
    let app: Node = suspense(text("outer"), Node::list([text("x"), nested.into()])).into();

    t.root.render_sync(app).unwrap();
    assert_eq!(t.markup(), "outer");

    // The retry builds a fresh inner boundary that waits on `inner` again.
    fallback.resolve("fb");
    t.flush();
    assert_eq!(t.markup(), "x<span>fb</span>");
    assert_eq!(t.container.visible_markup(), "x<span>fb</span>");

    inner.resolve("in");
    t.flush();
    assert_eq!(t.markup(), "x<span>in</span>");
    assert_eq!(t.container.visible_markup(), "x<span>in</span>");
    assert!(t.root.pending_lanes().unwrap().is_empty());
}

#[test]
fn suspension_without_boundary_commits_nothing_until_ping() {
    let t = harness();
    let pending = Thenable::new();
    let source = Rc::new(RefCell::new(pending.clone()));

    t.root.render_sync(h(data(&source))).unwrap();
    assert_eq!(t.markup(), "");
    assert!(t.root.pending_lanes().unwrap().contains(Lanes::SYNC));

    pending.resolve("late");
    t.flush();
    assert_eq!(t.markup(), "<span>late</span>");
}

#[test]
fn rejected_thenable_is_reported() {
    let t = harness();
    let source = Rc::new(RefCell::new(Thenable::new()));
    source.borrow().reject("offline");
    let err = t.root.render_sync(h(data(&source))).unwrap_err();
    assert_eq!(err, ReconcileError::Rejected("offline".into()));
    assert_eq!(t.markup(), "");
}

#[test]
fn context_change_rerenders_only_readers() {
    let t = harness();
    let ctx = Context::new("level", 0_i64);
    let reader_renders = Rc::new(Cell::new(0));
    let other_renders = Rc::new(Cell::new(0));

    let (c, rr) = (ctx.clone(), reader_renders.clone());
    let reader = Component::new("Reader", move |hooks, _| {
        rr.set(rr.get() + 1);
        let v = hooks.use_context(&c);
        Ok(h("span").child(text(v.as_int().unwrap_or(-1))).into())
    });
    let or = other_renders.clone();
    let other = Component::new("Other", move |_, _| {
        or.set(or.get() + 1);
        Ok(h("span").child("other").into())
    });

    // Created once so the provider's children are identical across renders.
    let stable = Node::list([h(reader).into(), h(other).into()]);
    let setter: Slot<SetState<i64>> = Slot::default();
    let s = setter.clone();
    let app = Component::new("App", move |hooks, _| {
        let (level, set) = hooks.use_state(1_i64)?;
        *s.borrow_mut() = Some(set);
        Ok(provider(&ctx, level, stable.clone()).into())
    });

    t.root.render_sync(h(app)).unwrap();
    assert_eq!(t.markup(), "<span>1</span><span>other</span>");

    setter_of(&setter).set(2);
    t.flush();
    assert_eq!(t.markup(), "<span>2</span><span>other</span>");
    assert_eq!(reader_renders.get(), 2);
    assert_eq!(other_renders.get(), 1);
}

#[test]
fn context_default_applies_without_provider() {
    let t = harness();
    let ctx = Context::new("name", "anon");
    let reader = Component::new("Reader", move |hooks, _| {
        let v = hooks.use_context(&ctx);
        Ok(text(v.as_str().unwrap_or("")))
    });
    t.root.render_sync(h(reader)).unwrap();
    assert_eq!(t.markup(), "anon");
}

#[test]
fn identical_tree_produces_no_host_effects() {
    let t = harness();
    let tree = || -> Node {
        h("div")
            .prop("id", 1)
            .child(h("p").child("x"))
            .child(Node::list([h("i").key("k").into(), text("tail")]))
            .into()
    };
    t.root.render_sync(tree()).unwrap();
    t.flush();
    t.host.take_ops();

    t.root.with_engine_for_test(|engine| {
        engine.update_container(tree(), Lanes::SYNC);
        assert_eq!(
            engine.render_root(Lanes::SYNC, false),
            RootExitStatus::Completed
        );
        let wip_root = engine.session.wip_root.expect("render in progress");
        let mut stack = vec![wip_root];
        while let Some(id) = stack.pop() {
            let f = &engine.arena[id];
            assert!(
                !f.flags
                    .intersects(Flags::PLACEMENT | Flags::UPDATE | Flags::CHILD_DELETION),
                "unexpected effect on {f:?}"
            );
            assert!(f.deletions.is_empty(), "unexpected deletion under {f:?}");
            stack.extend(f.child);
            if id != wip_root {
                stack.extend(f.sibling);
            }
        }
        engine.commit_root();
    });
    t.flush();
    assert!(t.host.take_ops().is_empty());
    assert_eq!(t.markup(), "<div><p>x</p><i></i>tail</div>");
}

#[test]
fn hook_order_change_is_fatal() {
    let t = harness();
    let flaky = Component::new("Flaky", |hooks, props| {
        if props.get("n").and_then(Value::as_int) == Some(1) {
            let _ = hooks.use_state(0_i64)?;
        } else {
            let _ = hooks.use_ref()?;
        }
        Ok(text("ok"))
    });
    t.root.render_sync(h(flaky.clone()).prop("n", 1)).unwrap();
    let err = t.root.render_sync(h(flaky).prop("n", 2)).unwrap_err();
    assert_eq!(
        err,
        ReconcileError::HookOrderChanged {
            component: "Flaky",
            index: 0
        }
    );
    assert_eq!(t.markup(), "ok", "committed tree is untouched");
    assert_eq!(
        t.root.take_errors().unwrap(),
        vec![ReconcileError::HookOrderChanged {
            component: "Flaky",
            index: 0
        }],
        "the returned error also stays queued"
    );
    assert!(t.root.take_errors().unwrap().is_empty());
}

#[test]
fn fewer_hooks_than_last_render_is_fatal() {
    let t = harness();
    let shrinking = Component::new("Shrinking", |hooks, props| {
        let _ = hooks.use_ref()?;
        if props.get("more").is_some() {
            let _ = hooks.use_ref()?;
        }
        Ok(Node::Empty)
    });
    t.root
        .render_sync(h(shrinking.clone()).prop("more", true))
        .unwrap();
    let err = t.root.render_sync(h(shrinking)).unwrap_err();
    assert_eq!(
        err,
        ReconcileError::TooFewHooks {
            component: "Shrinking"
        }
    );
}

#[test]
fn setting_the_same_state_schedules_nothing() {
    let t = harness();
    let renders = Rc::new(Cell::new(0));
    let setter = Slot::default();
    t.root.render_sync(h(counter(&renders, &setter))).unwrap();
    t.flush();

    setter_of(&setter).set(0);
    assert_eq!(t.scheduler.pending_count(), 0);
    assert_eq!(t.host.pending_microtasks(), 0);
    assert!(t.root.pending_lanes().unwrap().is_empty());
    assert_eq!(renders.get(), 1);

    setter_of(&setter).set(1);
    assert_eq!(t.scheduler.pending_count(), 1);
    t.flush();
    assert_eq!(t.markup(), "<span>1</span>");
}

#[test]
fn transition_renders_after_its_pending_flag() {
    let t = harness();
    let slot: Slot<(StartTransition, SetState<i64>)> = Slot::default();
    let s = slot.clone();
    let search = Component::new("Search", move |hooks, _| {
        let (pending, start) = hooks.use_transition()?;
        let (count, set_count) = hooks.use_state(0_i64)?;
        *s.borrow_mut() = Some((start, set_count));
        let state = if pending { "pending" } else { "idle" };
        Ok(text(format!("{state}:{count}")))
    });

    t.root.render_sync(h(search)).unwrap();
    t.flush();
    assert_eq!(t.markup(), "idle:0");

    let (start, set_count) = setter_of(&slot);
    start.start(|| set_count.set(1));
    assert_eq!(
        t.root.pending_lanes().unwrap(),
        Lanes::DEFAULT | Lanes::TRANSITION
    );

    assert!(t.scheduler.flush_one());
    assert_eq!(t.markup(), "pending:0");
    t.flush();
    assert_eq!(t.markup(), "idle:1");
}

#[test]
fn root_transition_yields_to_urgent_update() {
    let t = harness();
    t.root.start_transition(|| t.root.render(text("slow")).unwrap());
    assert_eq!(t.root.pending_lanes().unwrap(), Lanes::TRANSITION);
    t.root.render_sync(text("urgent")).unwrap();
    assert_eq!(t.markup(), "urgent");
    t.flush();
    // Root renders replay in dispatch order, so the later urgent render wins.
    assert_eq!(t.markup(), "urgent");
}

#[test]
fn time_sliced_render_commits_only_when_complete() {
    let t = harness();
    let items: Vec<Node> = (0..20).map(|i| h("li").key(format!("{i}").as_str()).into()).collect();
    t.root.render(Node::list(items)).unwrap();

    t.scheduler.set_yield_budget(Some(3));
    assert!(t.scheduler.flush_one());
    assert_eq!(t.markup(), "");
    assert_eq!(t.scheduler.pending_count(), 1, "continuation queued");

    t.scheduler.set_yield_budget(None);
    t.flush();
    assert_eq!(t.container.children().len(), 20);
}

#[test]
fn host_refs_attach_and_detach() {
    let t = harness();
    let r = Ref::new();
    t.root.render_sync(h("div").ref_(r.clone())).unwrap();
    let node = r.current::<NoopNode>().expect("attached after commit");
    assert_eq!(node.tag().as_deref(), Some("div"));

    t.root.unmount().unwrap();
    assert!(!r.is_set());
}

#[test]
fn memo_skips_shallow_equal_props() {
    let t = harness();
    let renders = Rc::new(Cell::new(0));
    let r = renders.clone();
    let label = memo(Component::new("Label", move |_, props| {
        r.set(r.get() + 1);
        let s = props.get("text").and_then(Value::as_str).unwrap_or("");
        Ok(h("em").child(text(s)).into())
    }));
    let setter: Slot<SetState<i64>> = Slot::default();
    let s = setter.clone();
    let app = Component::new("App", move |hooks, _| {
        let (n, set) = hooks.use_state(0_i64)?;
        *s.borrow_mut() = Some(set);
        Ok(Node::list([
            text(n),
            h(label.clone()).prop("text", "same").into(),
        ]))
    });

    t.root.render_sync(h(app)).unwrap();
    setter_of(&setter).set(1);
    t.flush();
    assert_eq!(t.markup(), "1<em>same</em>");
    assert_eq!(renders.get(), 1);
}

#[test]
fn endless_commit_updates_hit_the_depth_limit() {
    let t = harness();
    let looping = Component::new("Looping", |hooks, _| {
        let (n, set) = hooks.use_state(0_i64)?;
        hooks.use_layout_effect(
            move || {
                set.update(|n| n + 1);
                None
            },
            None,
        )?;
        Ok(text(n))
    });
    let err = t.root.render_sync(h(looping)).unwrap_err();
    assert_eq!(err, ReconcileError::MaximumUpdateDepth(50));
}

#[test]
fn using_the_root_inside_a_render_is_rejected() {
    let t = harness();
    let root = Rc::new(t.root);
    let inner: Slot<Result<(), ReconcileError>> = Slot::default();
    let (weak, i) = (Rc::downgrade(&root), inner.clone());
    let comp = Component::new("Reentrant", move |_, _| {
        if let Some(root) = weak.upgrade() {
            *i.borrow_mut() = Some(root.render(Node::Empty));
        }
        Ok(Node::Empty)
    });
    root.render_sync(h(comp)).unwrap();
    assert_eq!(setter_of(&inner), Err(ReconcileError::Reentrant));
}
