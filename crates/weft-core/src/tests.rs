#[cfg(test)]
mod tests {
    use crate::cell::*;
    use crate::derived::*;
    use crate::error::CycleError;
    use crate::reaction::Reaction;
    use crate::runtime::{batch, untracked};
    use crate::scope::*;
    use crate::store::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counter() -> (Rc<RefCell<usize>>, impl Fn()) {
        let n = Rc::new(RefCell::new(0usize));
        let bump = {
            let n = n.clone();
            move || *n.borrow_mut() += 1
        };
        (n, bump)
    }

    #[test]
    fn test_cell_basic() {
        let c = cell(42);
        assert_eq!(c.get(), 42);

        c.set(100);
        assert_eq!(c.get(), 100);

        c.update(|v| *v += 1);
        assert_eq!(c.get(), 101);
        assert_eq!(c.version(), 2);
    }

    #[test]
    fn test_set_if_changed_skips_equal_writes() {
        let c = cell(5);
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let c = c.clone();
            move || {
                let _ = c.get();
                bump();
            }
        });
        assert_eq!(*runs.borrow(), 1);

        c.set_if_changed(5);
        assert_eq!(*runs.borrow(), 1);
        assert_eq!(c.version(), 0);

        c.set_if_changed(6);
        assert_eq!(*runs.borrow(), 2);
        assert_eq!(c.version(), 1);
    }

    #[test]
    fn test_derived_is_lazy_and_memoized() {
        let evals = Rc::new(RefCell::new(0usize));
        let c = cell(2);
        let d = derived({
            let c = c.clone();
            let evals = evals.clone();
            move || {
                *evals.borrow_mut() += 1;
                c.get() * 10
            }
        });
        // Nothing runs at creation.
        assert_eq!(*evals.borrow(), 0);

        assert_eq!(d.get(), 20);
        assert_eq!(d.get(), 20);
        assert_eq!(*evals.borrow(), 1);

        // A write only marks dirty; the read pays for the recompute.
        c.set(3);
        assert_eq!(*evals.borrow(), 1);
        assert_eq!(d.get(), 30);
        assert_eq!(*evals.borrow(), 2);
    }

    #[test]
    fn test_dynamic_dependencies_follow_branches() {
        let which = cell(true);
        let a = cell(1);
        let b = cell(100);
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let (which, a, b) = (which.clone(), a.clone(), b.clone());
            move || {
                if which.get() {
                    let _ = a.get();
                } else {
                    let _ = b.get();
                }
                bump();
            }
        });
        assert_eq!(*runs.borrow(), 1);

        // `b` was not read; writing it must not re-run.
        b.set(101);
        assert_eq!(*runs.borrow(), 1);

        which.set(false);
        assert_eq!(*runs.borrow(), 2);

        // Now the branch flipped: `a` is no longer a dependency.
        a.set(2);
        assert_eq!(*runs.borrow(), 2);
        b.set(102);
        assert_eq!(*runs.borrow(), 3);
    }

    #[test]
    fn test_batch_runs_reaction_once_with_final_values() {
        let a = cell(1);
        let b = cell(2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _r = Reaction::new({
            let (a, b, seen) = (a.clone(), b.clone(), seen.clone());
            move || seen.borrow_mut().push((a.get(), b.get()))
        });

        batch(|| {
            a.set(10);
            a.set(11);
            b.set(20);
        });

        // One initial run, then one settled run with both final values.
        assert_eq!(*seen.borrow(), vec![(1, 2), (11, 20)]);
    }

    #[test]
    fn test_nested_batch_extends_outer() {
        let a = cell(1);
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let a = a.clone();
            move || {
                let _ = a.get();
                bump();
            }
        });

        batch(|| {
            a.set(2);
            batch(|| a.set(3));
            // Inner batch returned; still inside the outer transaction.
            assert_eq!(*runs.borrow(), 1);
        });
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_diamond_is_glitch_free() {
        let c = cell(1);
        let d1 = derived({
            let c = c.clone();
            move || c.get() + 1
        });
        let d2 = derived({
            let c = c.clone();
            move || c.get() * 2
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _r = Reaction::new({
            let (d1, d2, seen) = (d1.clone(), d2.clone(), seen.clone());
            move || seen.borrow_mut().push((d1.get(), d2.get()))
        });

        batch(|| {
            c.set(5);
            c.set(7);
        });

        // Both reads observe the same settled write, never a mix.
        assert_eq!(*seen.borrow(), vec![(2, 2), (8, 14)]);
    }

    #[test]
    fn test_reaction_chain_drains_in_one_pass() {
        let a = cell(0);
        let b = cell(0);
        let out = Rc::new(RefCell::new(Vec::new()));
        let _r1 = Reaction::new({
            let (a, b) = (a.clone(), b.clone());
            move || b.set(a.get() * 2)
        });
        let _r2 = Reaction::new({
            let (b, out) = (b.clone(), out.clone());
            move || out.borrow_mut().push(b.get())
        });

        a.set(3);
        assert_eq!(*out.borrow(), vec![0, 6]);
    }

    #[test]
    fn test_peek_does_not_subscribe() {
        let c = cell(1);
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let c = c.clone();
            move || {
                let _ = c.peek();
                bump();
            }
        });
        assert_eq!(*runs.borrow(), 1);

        c.set(2);
        c.set(3);
        assert_eq!(*runs.borrow(), 1);
    }

    #[test]
    fn test_untracked_reads_do_not_subscribe() {
        let tracked = cell(1);
        let ignored = cell(1);
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let (tracked, ignored) = (tracked.clone(), ignored.clone());
            move || {
                let _ = tracked.get();
                let _ = untracked(|| ignored.get());
                bump();
            }
        });
        assert_eq!(*runs.borrow(), 1);

        ignored.set(2);
        assert_eq!(*runs.borrow(), 1);
        tracked.set(2);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_derived_peek_of_cell_stays_stale() {
        let c = cell(1);
        let d = derived({
            let c = c.clone();
            move || c.peek() * 10
        });
        assert_eq!(d.get(), 10);

        // No edge was registered, so the cache never invalidates.
        c.set(5);
        assert_eq!(d.get(), 10);
    }

    #[test]
    fn test_scope_disposal_makes_nodes_inert() {
        let _ = env_logger::builder().is_test(true).try_init();

        let c = cell(0);
        let (runs, bump) = counter();
        let ((), s) = scope(|| {
            let _r = Reaction::new({
                let c = c.clone();
                move || {
                    let _ = c.get();
                    bump();
                }
            });
        });
        assert_eq!(*runs.borrow(), 1);

        c.set(1);
        assert_eq!(*runs.borrow(), 2);

        s.dispose();
        assert_eq!(crate::runtime::dependent_count(c.key()), 0);

        c.set(2);
        c.set(3);
        assert_eq!(*runs.borrow(), 2);

        // A second disposal is a no-op.
        s.dispose();
    }

    #[test]
    fn test_nested_scope_disposed_with_parent() {
        let c = cell(0);
        let (runs, bump) = counter();
        let ((), outer) = scope(|| {
            let ((), _inner) = scope(|| {
                let _r = Reaction::new({
                    let c = c.clone();
                    move || {
                        let _ = c.get();
                        bump();
                    }
                });
            });
        });

        outer.dispose();
        c.set(1);
        assert_eq!(*runs.borrow(), 1);
    }

    #[test]
    fn test_on_cleanup_runs_at_disposal() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let ((), s) = scope({
            let order = order.clone();
            move || {
                on_cleanup({
                    let order = order.clone();
                    move || order.borrow_mut().push("a")
                });
                on_cleanup({
                    let order = order.clone();
                    move || order.borrow_mut().push("b")
                });
            }
        });
        assert!(order.borrow().is_empty());

        s.dispose();
        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_dropped_reaction_handle_stops_running() {
        let c = cell(0);
        let (runs, bump) = counter();
        let r = Reaction::new({
            let c = c.clone();
            move || {
                let _ = c.get();
                bump();
            }
        });
        c.set(1);
        assert_eq!(*runs.borrow(), 2);

        // No scope holds it; dropping the handle severs the last strong
        // reference and the producer forgets the edge.
        drop(r);
        assert_eq!(crate::runtime::dependent_count(c.key()), 0);
        c.set(2);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_reaction_cleanup_runs_before_rerun_and_on_dispose() {
        let c = cell(0);
        let cleaned = Rc::new(RefCell::new(Vec::new()));
        let r = Reaction::with_cleanup({
            let c = c.clone();
            let cleaned = cleaned.clone();
            move || {
                let v = c.get();
                let cleaned = cleaned.clone();
                move || cleaned.borrow_mut().push(v)
            }
        });
        assert!(cleaned.borrow().is_empty());

        c.set(1);
        assert_eq!(*cleaned.borrow(), vec![0]);
        c.set(2);
        assert_eq!(*cleaned.borrow(), vec![0, 1]);

        r.dispose();
        assert_eq!(*cleaned.borrow(), vec![0, 1, 2]);

        // Disposal is idempotent; the cleanup ran exactly once.
        r.dispose();
        assert_eq!(*cleaned.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reaction_can_dispose_itself_mid_run() {
        let c = cell(0);
        let (runs, bump) = counter();
        let slot: Rc<RefCell<Option<Reaction>>> = Rc::new(RefCell::new(None));
        let r = Reaction::new({
            let c = c.clone();
            let slot = slot.clone();
            move || {
                let v = c.get();
                bump();
                if v > 0 {
                    let taken = slot.borrow_mut().take();
                    if let Some(r) = taken {
                        r.dispose();
                    }
                }
            }
        });
        *slot.borrow_mut() = Some(r.clone());
        c.set(1);
        assert_eq!(*runs.borrow(), 2);

        c.set(2);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_reaction_writing_own_source_does_not_loop() {
        let c = cell(0);
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let c = c.clone();
            move || {
                let v = c.get();
                bump();
                if v < 10 {
                    // A running reaction never re-schedules itself.
                    c.set(100);
                }
            }
        });
        assert_eq!(*runs.borrow(), 1);
        assert_eq!(c.get(), 100);
    }

    #[test]
    fn test_self_referential_derived_reports_cycle() {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let d = derived({
            let slot = slot.clone();
            move || {
                let inner = slot.borrow().clone();
                match inner {
                    Some(d) => match d.try_get() {
                        Ok(v) => v,
                        Err(CycleError) => -1,
                    },
                    None => 0,
                }
            }
        });
        *slot.borrow_mut() = Some(d.clone());
        assert_eq!(d.get(), -1);
    }

    #[test]
    fn test_mutual_cycle_panics_instead_of_overflowing() {
        let a_slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let a = derived({
            let a_slot = a_slot.clone();
            move || {
                let inner = a_slot.borrow().clone();
                inner.map(|b| b.get()).unwrap_or(0)
            }
        });
        let b = derived({
            let a = a.clone();
            move || a.get() + 1
        });
        *a_slot.borrow_mut() = Some(b.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a.get()));
        assert!(result.is_err());

        // The graph stays usable after the unwind.
        let c = cell(1);
        c.set(2);
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn test_disposed_derived_returns_last_value() {
        let c = cell(1);
        let d = derived({
            let c = c.clone();
            move || c.get() * 2
        });
        assert_eq!(d.get(), 2);

        d.dispose();
        assert!(d.is_disposed());
        c.set(50);
        assert_eq!(d.get(), 2);
    }

    #[test]
    fn test_store_materializes_paths_lazily() {
        let s = store();
        assert!(s.is_empty());

        assert_eq!(s.get("width", || 800u32), 800);
        assert_eq!(s.len(), 1);

        s.set("width", 1024u32);
        assert_eq!(s.get("width", || 0u32), 1024);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_store_paths_notify_independently() {
        let s = store();
        let (runs, bump) = counter();
        let _r = Reaction::new({
            let s = s.clone();
            move || {
                let _ = s.get("a", || 0);
                bump();
            }
        });
        assert_eq!(*runs.borrow(), 1);

        s.set("b", 1);
        assert_eq!(*runs.borrow(), 1);

        s.set("a", 1);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_store_child_is_lazy_and_shared() {
        let s = store();
        let user = s.child("user");
        user.set("name", "ada".to_string());

        assert_eq!(s.child("user").get("name", || String::new()), "ada");
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_store_type_mismatch_replaces_slot() {
        let _ = env_logger::builder().is_test(true).try_init();

        let s = store();
        s.set("n", 1i32);
        // Same path, different type: the slot is replaced, with a warning.
        assert_eq!(s.get("n", || "x".to_string()), "x");
    }
}
