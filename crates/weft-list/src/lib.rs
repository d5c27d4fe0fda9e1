//! # Keyed list reconciliation
//!
//! `weft-list` keeps rendered output in step with an ordered, keyed,
//! reactive sequence. On every change it decides, per key, whether the
//! previously produced output is reused as-is, moved, created, or
//! discarded; surviving output is brought into the new order with the
//! fewest relocations (a longest-increasing-subsequence pass, so the whole
//! diff stays O(n log n)).
//!
//! ```rust
//! use weft_core::*;
//! use weft_list::*;
//!
//! #[derive(Clone, PartialEq)]
//! struct Todo { id: u64, text: String }
//!
//! let todos = cell(vec![
//!     Todo { id: 1, text: "feed the cat".into() },
//!     Todo { id: 2, text: "water the plants".into() },
//! ]);
//!
//! let list = each(
//!     todos.clone(),
//!     |todo, _i| todo.id,
//!     |todo| todo.text.clone(),
//! );
//! assert_eq!(list.len(), 2);
//!
//! // Reordering reuses both rendered units; nothing re-renders.
//! let before = list.units();
//! todos.update(|v| v.reverse());
//! let after = list.units();
//! assert!(std::rc::Rc::ptr_eq(&before[0], &after[1]));
//! assert!(std::rc::Rc::ptr_eq(&before[1], &after[0]));
//! ```
//!
//! Two render modes:
//!
//! - [`each`] hands the render callback the bare item. A surviving key
//!   whose item changed is torn down and re-rendered.
//! - [`each_tracked`] hands it an [`ItemCell`]: the callback runs once per
//!   key, and item changes flow through the cell so only the entry's own
//!   dependents react.
//!
//! Sources implement [`ListSource`]: a `Vec` literal, a `Cell`, a
//! `Derived`, or a closure wrapped with [`pull`]. Each entry renders inside
//! its own scope, so reactive nodes created by the callback are disposed
//! with the entry.
//!
//! Duplicate keys keep the first occurrence, drop the rest, and log one
//! warning per offending update; reconciliation never panics over them.

pub mod diff;
pub mod list;
pub mod source;

pub use list::{ItemCell, KeyedList, ListOp, Units, each, each_tracked};
pub use source::{ListSource, Pull, pull};
