// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hooks: per-instance state and effects for function components.
//!
//! A component receives a [`Hooks`] handle for the duration of one render. Each hook call
//! claims the next position in the fiber's hook list; on re-render the same position must
//! be claimed by the same kind of hook, in the same order. Breaking that contract is a fatal
//! [`ReconcileError`].
//!
//! ```
//! use understory_reconciler::element::{h, text, Component, Node};
//!
//! let counter = Component::new("Counter", |hooks, _props| {
//!     let (count, set_count) = hooks.use_state(0_i64)?;
//!     hooks.use_effect(
//!         move || {
//!             let _ = &set_count;
//!             None
//!         },
//!         Some(vec![count.into()]),
//!     )?;
//!     Ok(h("span").child(text(count)).into())
//! });
//! # let _: Node = h(counter).into();
//! ```

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use core::fmt;
use core::marker::PhantomData;

use crate::context::{Context, ContextDependency, ContextStack};
use crate::error::{Interrupt, ReconcileError};
use crate::fiber::FiberId;
use crate::flags::{EffectTag, Flags};
use crate::lanes::Lanes;
use crate::root::Signals;
use crate::suspense::{Thenable, ThenableState};
use crate::update_queue::{Action, Update, process_update_queue};
use crate::value::{Callback, Ref, Value};

/// Cleanup returned by an effect.
pub type Destroy = Box<dyn FnOnce()>;

type Create = Box<dyn FnOnce() -> Option<Destroy>>;

/// Cleanup slot shared by every render's copy of one effect hook.
#[derive(Default)]
pub(crate) struct EffectInstance {
    destroy: RefCell<Option<Destroy>>,
}

/// One registered effect.
pub(crate) struct Effect {
    pub(crate) tag: EffectTag,
    create: RefCell<Option<Create>>,
    deps: Option<Vec<Value>>,
    inst: Rc<EffectInstance>,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

impl Effect {
    /// Returns true if this effect is of `kind` and must run this commit.
    pub(crate) fn needs_run(&self, kind: EffectTag) -> bool {
        self.tag.contains(kind | EffectTag::HAS_EFFECT)
    }

    pub(crate) fn run_create(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let destroy = create();
            *self.inst.destroy.borrow_mut() = destroy;
        }
    }

    pub(crate) fn run_destroy(&self) {
        let destroy = self.inst.destroy.borrow_mut().take();
        if let Some(destroy) = destroy {
            destroy();
        }
    }
}

/// Shared queue of a state hook. Dispatchers hold it; the hook reads it on render.
pub(crate) struct StateQueue {
    pub(crate) fiber: FiberId,
    pub(crate) pending: RefCell<Vec<Update<Action>>>,
    pub(crate) last_rendered: RefCell<Rc<dyn Any>>,
    pub(crate) equals: fn(&dyn Any, &dyn Any) -> bool,
}

impl fmt::Debug for StateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateQueue")
            .field("fiber", &self.fiber)
            .field("pending", &self.pending.borrow().len())
            .finish_non_exhaustive()
    }
}

fn eq_any<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[derive(Clone)]
pub(crate) struct StateHook {
    memoized: Rc<dyn Any>,
    base_state: Rc<dyn Any>,
    /// Updates not yet committed: skipped ones plus everything after the first skip.
    base_queue: Rc<RefCell<Vec<Update<Action>>>>,
    queue: Rc<StateQueue>,
}

#[derive(Clone)]
pub(crate) struct MemoHook {
    value: Rc<dyn Any>,
    deps: Option<Vec<Value>>,
}

/// A hook record, matched by position across renders.
#[derive(Clone)]
pub(crate) enum Hook {
    State(StateHook),
    Effect(Rc<Effect>),
    Ref(Ref),
    Memo(MemoHook),
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(s) => f.debug_tuple("State").field(&s.queue).finish(),
            Self::Effect(e) => f.debug_tuple("Effect").field(e).finish(),
            Self::Ref(r) => f.debug_tuple("Ref").field(r).finish(),
            Self::Memo(m) => f.debug_tuple("Memo").field(&m.deps).finish(),
        }
    }
}

fn deps_equal(next: Option<&[Value]>, prev: Option<&[Value]>) -> bool {
    match (next, prev) {
        (Some(next), Some(prev)) => {
            next.len() == prev.len() && next.iter().zip(prev).all(|(a, b)| a.is(b))
        }
        _ => false,
    }
}

/// Everything one component render produces besides its children.
pub(crate) struct HookRenderState {
    fiber: FiberId,
    component: &'static str,
    /// Hooks of the committed render, or `None` on mount.
    current: Option<Vec<Hook>>,
    cursor: usize,
    render_lanes: Lanes,
    signals: Rc<Signals>,
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<Rc<Effect>>,
    pub(crate) flags: Flags,
    pub(crate) skipped_lanes: Lanes,
    pub(crate) did_receive_update: bool,
    pub(crate) dependencies: Vec<ContextDependency>,
}

impl HookRenderState {
    pub(crate) fn new(
        fiber: FiberId,
        component: &'static str,
        current: Option<Vec<Hook>>,
        render_lanes: Lanes,
        signals: Rc<Signals>,
    ) -> Self {
        Self {
            fiber,
            component,
            current,
            cursor: 0,
            render_lanes,
            signals,
            hooks: Vec::new(),
            effects: Vec::new(),
            flags: Flags::empty(),
            skipped_lanes: Lanes::empty(),
            did_receive_update: false,
            dependencies: Vec::new(),
        }
    }

    /// Check the hook count against the previous render.
    pub(crate) fn finish(&self) -> Result<(), ReconcileError> {
        match &self.current {
            Some(current) if self.cursor < current.len() => Err(ReconcileError::TooFewHooks {
                component: self.component,
            }),
            _ => Ok(()),
        }
    }
}

/// Hook dispatcher handed to a function component while it renders.
pub struct Hooks<'a> {
    state: &'a mut HookRenderState,
    contexts: &'a ContextStack,
}

impl fmt::Debug for Hooks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("component", &self.state.component)
            .field("cursor", &self.state.cursor)
            .finish_non_exhaustive()
    }
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(state: &'a mut HookRenderState, contexts: &'a ContextStack) -> Self {
        Self { state, contexts }
    }
}

impl Hooks<'_> {
    /// Claim the next hook position; returns the committed hook there, if updating.
    fn advance(&mut self) -> Result<(usize, Option<Hook>), ReconcileError> {
        let index = self.state.cursor;
        self.state.cursor += 1;
        match &self.state.current {
            None => Ok((index, None)),
            Some(current) => match current.get(index) {
                Some(hook) => Ok((index, Some(hook.clone()))),
                None => Err(ReconcileError::TooManyHooks {
                    component: self.state.component,
                }),
            },
        }
    }

    fn order_changed(&self, index: usize) -> ReconcileError {
        ReconcileError::HookOrderChanged {
            component: self.state.component,
            index,
        }
    }

    fn type_mismatch(&self, index: usize) -> ReconcileError {
        ReconcileError::StateTypeMismatch {
            component: self.state.component,
            index,
        }
    }

    /// A piece of state and its setter.
    ///
    /// Updates are replayed in enqueue order at the lane they were dispatched at. Updates of
    /// other lanes are skipped during this render and kept for a later one.
    pub fn use_state<T: Clone + PartialEq + 'static>(
        &mut self,
        initial: T,
    ) -> Result<(T, SetState<T>), ReconcileError> {
        let (index, current) = self.advance()?;
        let hook = match current {
            None => {
                let value: Rc<dyn Any> = Rc::new(initial.clone());
                let queue = Rc::new(StateQueue {
                    fiber: self.state.fiber,
                    pending: RefCell::default(),
                    last_rendered: RefCell::new(value.clone()),
                    equals: eq_any::<T>,
                });
                self.state.hooks.push(Hook::State(StateHook {
                    memoized: value.clone(),
                    base_state: value,
                    base_queue: Rc::default(),
                    queue: queue.clone(),
                }));
                return Ok((initial, SetState::new(queue, self.state.signals.clone())));
            }
            Some(Hook::State(hook)) => hook,
            Some(_) => return Err(self.order_changed(index)),
        };
        if !hook.memoized.is::<T>() {
            return Err(self.type_mismatch(index));
        }

        // Fold new updates into the committed hook's base queue so an interrupted render
        // does not drop them.
        let pending = core::mem::take(&mut *hook.queue.pending.borrow_mut());
        if !pending.is_empty() {
            hook.base_queue.borrow_mut().extend(pending);
        }
        let queue = hook.base_queue.borrow().clone();
        let processed = process_update_queue(
            hook.base_state.clone(),
            &queue,
            self.state.render_lanes,
            |state, action| action.apply(state),
        );

        if !(hook.queue.equals)(&*processed.memoized_state, &*hook.memoized) {
            self.state.did_receive_update = true;
        }
        self.state.skipped_lanes |= processed.skipped_lanes;
        *hook.queue.last_rendered.borrow_mut() = processed.memoized_state.clone();

        let value = processed
            .memoized_state
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| self.type_mismatch(index))?;
        let setter = SetState::new(hook.queue.clone(), self.state.signals.clone());
        self.state.hooks.push(Hook::State(StateHook {
            memoized: processed.memoized_state,
            base_state: processed.base_state,
            base_queue: Rc::new(RefCell::new(processed.base_queue)),
            queue: hook.queue,
        }));
        Ok((value, setter))
    }

    fn push_effect(
        &mut self,
        kind: EffectTag,
        fiber_flag: Flags,
        create: Create,
        deps: Option<Vec<Value>>,
    ) -> Result<(), ReconcileError> {
        let (index, current) = self.advance()?;
        let (tag, inst) = match current {
            None => (kind | EffectTag::HAS_EFFECT, Rc::default()),
            Some(Hook::Effect(prev)) if prev.tag.contains(kind) => {
                if deps_equal(deps.as_deref(), prev.deps.as_deref()) {
                    (kind, prev.inst.clone())
                } else {
                    (kind | EffectTag::HAS_EFFECT, prev.inst.clone())
                }
            }
            Some(_) => return Err(self.order_changed(index)),
        };
        if tag.contains(EffectTag::HAS_EFFECT) {
            self.state.flags |= fiber_flag;
        }
        let effect = Rc::new(Effect {
            tag,
            create: RefCell::new(Some(create)),
            deps,
            inst,
        });
        self.state.hooks.push(Hook::Effect(effect.clone()));
        self.state.effects.push(effect);
        Ok(())
    }

    /// Run `create` after commit, asynchronously, whenever `deps` change.
    ///
    /// `None` deps re-run the effect after every render. The cleanup returned by the previous
    /// run is called before the next run and on unmount.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<Destroy> + 'static,
        deps: Option<Vec<Value>>,
    ) -> Result<(), ReconcileError> {
        self.push_effect(
            EffectTag::PASSIVE,
            Flags::PASSIVE_EFFECT,
            Box::new(create),
            deps,
        )
    }

    /// Like [`Hooks::use_effect`], but runs synchronously during commit, after host
    /// mutations and before any passive effect.
    pub fn use_layout_effect(
        &mut self,
        create: impl FnOnce() -> Option<Destroy> + 'static,
        deps: Option<Vec<Value>>,
    ) -> Result<(), ReconcileError> {
        self.push_effect(
            EffectTag::LAYOUT,
            Flags::LAYOUT_EFFECT,
            Box::new(create),
            deps,
        )
    }

    /// A mutable cell that is allocated once and returned unchanged on every render.
    pub fn use_ref(&mut self) -> Result<Ref, ReconcileError> {
        let (index, current) = self.advance()?;
        let r = match current {
            None => Ref::new(),
            Some(Hook::Ref(r)) => r,
            Some(_) => return Err(self.order_changed(index)),
        };
        self.state.hooks.push(Hook::Ref(r.clone()));
        Ok(r)
    }

    /// Recompute a value only when `deps` change.
    pub fn use_memo<T: Clone + 'static>(
        &mut self,
        compute: impl FnOnce() -> T,
        deps: Option<Vec<Value>>,
    ) -> Result<T, ReconcileError> {
        let (index, current) = self.advance()?;
        match current {
            Some(Hook::Memo(prev)) if deps_equal(deps.as_deref(), prev.deps.as_deref()) => {
                let value = prev
                    .value
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or_else(|| self.type_mismatch(index))?;
                self.state.hooks.push(Hook::Memo(prev));
                Ok(value)
            }
            None | Some(Hook::Memo(_)) => {
                let value = compute();
                self.state.hooks.push(Hook::Memo(MemoHook {
                    value: Rc::new(value.clone()),
                    deps,
                }));
                Ok(value)
            }
            Some(_) => Err(self.order_changed(index)),
        }
    }

    /// Keep the identity of `callback` stable until `deps` change.
    pub fn use_callback(
        &mut self,
        callback: Callback,
        deps: Option<Vec<Value>>,
    ) -> Result<Callback, ReconcileError> {
        self.use_memo(move || callback, deps)
    }

    /// Read the innermost provided value of `context` and subscribe to its changes.
    pub fn use_context(&mut self, context: &Context) -> Value {
        let value = self.contexts.read(context);
        self.state.dependencies.push(ContextDependency {
            context: context.clone(),
            memoized_value: value.clone(),
        });
        value
    }

    /// Read a settled value, or suspend the render until `thenable` settles.
    pub fn use_thenable(&mut self, thenable: &Thenable) -> Result<Value, Interrupt> {
        match thenable.state() {
            ThenableState::Fulfilled(value) => Ok(value),
            ThenableState::Rejected(reason) => {
                Err(Interrupt::Error(ReconcileError::Rejected(reason)))
            }
            ThenableState::Pending => Err(Interrupt::Suspend(thenable.clone())),
        }
    }

    /// A pending flag and a starter that runs updates at the transition lane.
    pub fn use_transition(&mut self) -> Result<(bool, StartTransition), ReconcileError> {
        let (pending, set_pending) = self.use_state(false)?;
        Ok((
            pending,
            StartTransition {
                set_pending,
                signals: self.state.signals.clone(),
            },
        ))
    }
}

/// Setter returned by [`Hooks::use_state`]. Cloning keeps the identity.
pub struct SetState<T> {
    queue: Rc<StateQueue>,
    signals: Rc<Signals>,
    marker: PhantomData<fn(T)>,
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            signals: self.signals.clone(),
            marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SetState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SetState").field(&self.queue).finish()
    }
}

impl<T: 'static> SetState<T> {
    fn new(queue: Rc<StateQueue>, signals: Rc<Signals>) -> Self {
        Self {
            queue,
            signals,
            marker: PhantomData,
        }
    }

    /// Replace the state.
    pub fn set(&self, value: T) {
        self.signals
            .dispatch(self.queue.clone(), Action::Replace(Rc::new(value)));
    }

    /// Derive the next state from the previous one.
    ///
    /// `f` may run more than once when updates are rebased across lanes.
    pub fn update(&self, f: impl Fn(&T) -> T + 'static) {
        let reduce = move |prev: &dyn Any| -> Option<Rc<dyn Any>> {
            let next: Rc<dyn Any> = Rc::new(f(prev.downcast_ref::<T>()?));
            Some(next)
        };
        self.signals
            .dispatch(self.queue.clone(), Action::Reduce(Rc::new(reduce)));
    }

    /// Returns true if both setters drive the same hook.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

/// Starter returned by [`Hooks::use_transition`].
#[derive(Clone)]
pub struct StartTransition {
    set_pending: SetState<bool>,
    signals: Rc<Signals>,
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartTransition").finish_non_exhaustive()
    }
}

impl StartTransition {
    /// Mark the transition pending at the current priority, then run `scope` with every
    /// update it dispatches assigned to the transition lane.
    pub fn start(&self, scope: impl FnOnce()) {
        self.set_pending.set(true);
        let prev = self.signals.set_transition(true);
        self.set_pending.set(false);
        scope();
        self.signals.set_transition(prev);
    }
}
