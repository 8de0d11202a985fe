use std::fmt;

use thiserror::Error;

use crate::ids::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

/// Which reference failed to resolve.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Entity {
    Node,
    Parent,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Node => f.write_str("location"),
            Entity::Parent => f.write_str("parent location"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{entity} with id {id} not found")]
    NotFound { entity: Entity, id: NodeId },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn node_not_found(id: NodeId) -> Self {
        Error::NotFound {
            entity: Entity::Node,
            id,
        }
    }

    pub fn parent_not_found(id: NodeId) -> Self {
        Error::NotFound {
            entity: Entity::Parent,
            id,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Error::InvalidOperation(_))
    }
}
