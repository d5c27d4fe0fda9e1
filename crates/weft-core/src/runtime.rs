//! Node arena, tracking context, and transaction machinery.
//!
//! Every cell, derived value, and reaction owns one slot in a thread-local
//! slotmap. A slot holds bookkeeping only (edges, flags, write epoch);
//! values and closures live behind the public handles. Downstream edges are
//! plain `NodeKey`s: when the slot a key points at has been freed, the
//! generation check fails and the edge is pruned on the producer's next
//! write. Upstream edges are rebuilt on every evaluation, so conditional
//! reads drop stale subscriptions automatically.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Weak;

use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

new_key_type! {
    /// Generation-checked index of a node in the thread-local arena.
    pub struct NodeKey;
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct NodeFlags: u8 {
        /// A dependency changed since the cached value was produced.
        const DIRTY = 1 << 0;
        /// The node's own evaluation is on the call stack right now.
        const RUNNING = 1 << 1;
        /// Queued in the current transaction's pending set.
        const PENDING = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Cell,
    Derived,
    Reaction,
}

/// Re-run entry point for reactions. The arena holds it weakly so a slot
/// never keeps its node alive; a dead runner is an implicitly dropped
/// subscription.
pub(crate) trait Rerun {
    fn rerun(&self);
}

struct NodeSlot {
    kind: NodeKind,
    flags: NodeFlags,
    epoch: u64,
    /// Upstream edges, rebuilt on every evaluation.
    deps: SmallVec<[NodeKey; 4]>,
    /// Downstream edges; stale keys are pruned lazily.
    subs: SmallVec<[NodeKey; 4]>,
    runner: Option<Weak<dyn Rerun>>,
}

struct Runtime {
    nodes: SlotMap<NodeKey, NodeSlot>,
    /// The node whose evaluation is currently tracking reads, if any.
    observer: Option<NodeKey>,
    batch_depth: usize,
    /// Reactions scheduled for the current transaction, insertion order.
    pending: VecDeque<NodeKey>,
    flushing: bool,
}

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime {
        nodes: SlotMap::with_key(),
        observer: None,
        batch_depth: 0,
        pending: VecDeque::new(),
        flushing: false,
    });
}

impl Runtime {
    /// Copies a node's downstream edges, dropping keys whose slots are gone.
    fn live_subs(&mut self, key: NodeKey, out: &mut Vec<NodeKey>) {
        let Some(slot) = self.nodes.get_mut(key) else {
            return;
        };
        let subs = std::mem::take(&mut slot.subs);
        let live: SmallVec<[NodeKey; 4]> = subs
            .into_iter()
            .filter(|k| self.nodes.contains_key(*k))
            .collect();
        out.extend(live.iter().copied());
        if let Some(slot) = self.nodes.get_mut(key) {
            slot.subs = live;
        }
    }

    /// Marks everything downstream of `root`: derived nodes become dirty
    /// (transitively), reactions join the pending set once each. Nothing is
    /// re-run here; reactions run when the transaction settles and derived
    /// values recompute on their next read.
    fn mark_downstream(&mut self, root: NodeKey) {
        let mut work = Vec::new();
        self.live_subs(root, &mut work);
        while let Some(key) = work.pop() {
            let Some(slot) = self.nodes.get_mut(key) else {
                continue;
            };
            match slot.kind {
                NodeKind::Derived => {
                    if !slot.flags.contains(NodeFlags::DIRTY) {
                        slot.flags.insert(NodeFlags::DIRTY);
                        self.live_subs(key, &mut work);
                    }
                }
                NodeKind::Reaction => {
                    // A reaction that is currently running never schedules
                    // itself; writes it makes to its own sources would loop
                    // otherwise.
                    if !slot.flags.intersects(NodeFlags::PENDING | NodeFlags::RUNNING) {
                        slot.flags.insert(NodeFlags::PENDING);
                        self.pending.push_back(key);
                    }
                }
                NodeKind::Cell => {}
            }
        }
    }
}

pub(crate) fn new_node(kind: NodeKind, runner: Option<Weak<dyn Rerun>>) -> NodeKey {
    RUNTIME.with(|rt| {
        rt.borrow_mut().nodes.insert(NodeSlot {
            kind,
            flags: NodeFlags::empty(),
            epoch: 0,
            deps: SmallVec::new(),
            subs: SmallVec::new(),
            runner,
        })
    })
}

/// Frees a node's slot and detaches it from its upstream edges. Downstream
/// keys that still mention it fail the generation check and get pruned on
/// the producers' next write. Safe to call more than once.
pub(crate) fn release(key: NodeKey) {
    RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let Some(slot) = rt.nodes.remove(key) else {
            return;
        };
        for dep in slot.deps {
            if let Some(dslot) = rt.nodes.get_mut(dep) {
                dslot.subs.retain(|s| *s != key);
            }
        }
    });
}

pub(crate) fn contains(key: NodeKey) -> bool {
    RUNTIME.with(|rt| rt.borrow().nodes.contains_key(key))
}

pub(crate) fn flags(key: NodeKey) -> Option<NodeFlags> {
    RUNTIME.with(|rt| rt.borrow().nodes.get(key).map(|slot| slot.flags))
}

pub(crate) fn epoch(key: NodeKey) -> u64 {
    RUNTIME.with(|rt| rt.borrow().nodes.get(key).map(|slot| slot.epoch).unwrap_or(0))
}

/// Clears the dirty flag and bumps the epoch after a successful evaluation.
pub(crate) fn mark_clean(key: NodeKey) {
    RUNTIME.with(|rt| {
        if let Some(slot) = rt.borrow_mut().nodes.get_mut(key) {
            slot.flags.remove(NodeFlags::DIRTY);
            slot.epoch += 1;
        }
    });
}

/// Registers an edge from `source` to the currently evaluating node.
pub(crate) fn register_read(source: NodeKey) {
    RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let Some(obs) = rt.observer else {
            return;
        };
        if obs == source || !rt.nodes.contains_key(source) {
            return;
        }
        let Some(oslot) = rt.nodes.get_mut(obs) else {
            return;
        };
        if !oslot.deps.contains(&source) {
            oslot.deps.push(source);
        }
        let Some(sslot) = rt.nodes.get_mut(source) else {
            return;
        };
        if !sslot.subs.contains(&obs) {
            sslot.subs.push(obs);
        }
    });
}

/// Records a write to `key`: bumps the epoch, marks downstream, and settles
/// immediately when no transaction is open (an implicit one-write batch).
pub(crate) fn notify_write(key: NodeKey) {
    let written = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let Some(slot) = rt.nodes.get_mut(key) else {
            return false;
        };
        slot.epoch += 1;
        rt.mark_downstream(key);
        true
    });
    if written {
        settle_if_idle();
    }
}

fn settle_if_idle() {
    let idle = RUNTIME.with(|rt| {
        let rt = rt.borrow();
        rt.batch_depth == 0 && !rt.flushing
    });
    if idle {
        flush();
    }
}

/// Runs every pending reaction exactly once, in insertion order. All dirty
/// marking happened at write time, so each reaction observes the settled
/// state of the whole batch; derived values it reads recompute on demand.
/// Writes made by a running reaction extend the queue and drain in the same
/// pass.
fn flush() {
    struct FlushGuard;
    impl Drop for FlushGuard {
        fn drop(&mut self) {
            RUNTIME.with(|rt| {
                let mut rt = rt.borrow_mut();
                let leftover = std::mem::take(&mut rt.pending);
                for key in leftover {
                    if let Some(slot) = rt.nodes.get_mut(key) {
                        slot.flags.remove(NodeFlags::PENDING);
                    }
                }
                rt.flushing = false;
            });
        }
    }

    RUNTIME.with(|rt| rt.borrow_mut().flushing = true);
    let _guard = FlushGuard;
    loop {
        let next = RUNTIME.with(|rt| {
            let mut rt = rt.borrow_mut();
            while let Some(key) = rt.pending.pop_front() {
                let Some(slot) = rt.nodes.get_mut(key) else {
                    continue;
                };
                if !slot.flags.contains(NodeFlags::PENDING) {
                    continue;
                }
                slot.flags.remove(NodeFlags::PENDING);
                match slot.runner.as_ref().and_then(Weak::upgrade) {
                    Some(runner) => return Some(runner),
                    // The consumer was reclaimed while the slot survived;
                    // treat the subscription as dropped.
                    None => {
                        rt.nodes.remove(key);
                    }
                }
            }
            None
        });
        match next {
            Some(runner) => runner.rerun(),
            None => break,
        }
    }
}

/// Coalesces writes made inside `f` into one notification pass: every
/// affected reaction runs at most once, after the outermost batch returns.
/// Nested calls extend the outer transaction.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    struct BatchGuard;
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let settle = RUNTIME.with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.batch_depth -= 1;
                rt.batch_depth == 0 && !rt.flushing
            });
            if !settle {
                return;
            }
            if std::thread::panicking() {
                // Don't run user code mid-unwind; abandon the queue.
                RUNTIME.with(|rt| {
                    let mut rt = rt.borrow_mut();
                    let leftover = std::mem::take(&mut rt.pending);
                    for key in leftover {
                        if let Some(slot) = rt.nodes.get_mut(key) {
                            slot.flags.remove(NodeFlags::PENDING);
                        }
                    }
                });
            } else {
                flush();
            }
        }
    }

    RUNTIME.with(|rt| rt.borrow_mut().batch_depth += 1);
    let _guard = BatchGuard;
    f()
}

/// Runs `f` with dependency tracking suspended: reads inside register no
/// edges, like calling `peek` on every source.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    struct ObserverGuard(Option<NodeKey>);
    impl Drop for ObserverGuard {
        fn drop(&mut self) {
            let prev = self.0;
            RUNTIME.with(|rt| rt.borrow_mut().observer = prev);
        }
    }

    let prev = RUNTIME.with(|rt| rt.borrow_mut().observer.take());
    let _guard = ObserverGuard(prev);
    f()
}

/// Evaluates `f` as `key`'s tracked run: reads register edges onto `key`,
/// and the dependency set is diffed against the previous run on exit so
/// edges reflect only what was actually read this time.
pub(crate) fn with_tracked<R>(key: NodeKey, f: impl FnOnce() -> R) -> R {
    struct EvalGuard {
        key: NodeKey,
        prev_deps: SmallVec<[NodeKey; 4]>,
        prev_observer: Option<NodeKey>,
    }
    impl Drop for EvalGuard {
        fn drop(&mut self) {
            let prev_deps = std::mem::take(&mut self.prev_deps);
            let key = self.key;
            let prev_observer = self.prev_observer;
            RUNTIME.with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.observer = prev_observer;
                let new_deps = match rt.nodes.get_mut(key) {
                    Some(slot) => {
                        slot.flags.remove(NodeFlags::RUNNING);
                        slot.deps.clone()
                    }
                    None => SmallVec::new(),
                };
                // Unsubscribe from dependencies that were not re-read.
                for dep in prev_deps {
                    if !new_deps.contains(&dep)
                        && let Some(dslot) = rt.nodes.get_mut(dep)
                    {
                        dslot.subs.retain(|s| *s != key);
                    }
                }
            });
        }
    }

    let started = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let Some(slot) = rt.nodes.get_mut(key) else {
            return None;
        };
        slot.flags.insert(NodeFlags::RUNNING);
        let prev_deps = std::mem::take(&mut slot.deps);
        let prev_observer = rt.observer.replace(key);
        Some((prev_deps, prev_observer))
    });
    match started {
        Some((prev_deps, prev_observer)) => {
            let _guard = EvalGuard {
                key,
                prev_deps,
                prev_observer,
            };
            f()
        }
        // The slot is already gone; evaluate without tracking.
        None => untracked(f),
    }
}

/// Number of live downstream edges on `key`. Test hook.
#[cfg(test)]
pub(crate) fn dependent_count(key: NodeKey) -> usize {
    RUNTIME.with(|rt| {
        let rt = rt.borrow();
        rt.nodes
            .get(key)
            .map(|slot| {
                slot.subs
                    .iter()
                    .filter(|k| rt.nodes.contains_key(**k))
                    .count()
            })
            .unwrap_or(0)
    })
}
