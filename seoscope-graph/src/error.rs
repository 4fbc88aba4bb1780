use crate::graph::NodeId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Dependency cycle detected at cell {0}")]
    Cycle(NodeId),
}

pub type Result<T> = std::result::Result<T, GraphError>;
