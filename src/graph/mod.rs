//! Graph store boundary and traversal primitive.
//!
//! The synthesis core reads and writes node annotations through
//! [`store::GraphHandle`], an in-memory realization of the external
//! graph-store interface: node/edge creation, per-node ingroup/outgroup
//! set properties, and deterministic typed adjacency. [`traverse`] is the
//! directed walk the matcher and validator policies plug into.

pub mod store;
pub mod traverse;

pub use store::{
    Direction, EdgeId, EdgeRecord, GraphHandle, NodeId, NodeRecord, RelKind, StoreError,
};
pub use traverse::{traverse, Decision, Traversal};
