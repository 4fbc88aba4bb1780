//! Single-threaded reactive state: primitive cells, memoized derived cells,
//! lenses onto sub-paths and effects that run when cells change.

pub mod cell;
pub mod effect;
pub mod error;
pub mod graph;
pub mod lens;

pub use cell::{Cell, Derived, Getter, Readable, Writable};
pub use effect::Subscription;
pub use error::GraphError;
pub use graph::{Graph, NodeId};
pub use lens::{Lens, Path};
