use thiserror::Error;

/// A node's evaluation reached a read of the node itself, directly or
/// through other nodes. Surfaced instead of recursing until the stack
/// overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cyclic dependency: a value's evaluation read itself")]
pub struct CycleError;
