use std::fmt;

use thiserror::Error;

/// Kind of entity named by a [`MapError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Study,
    Layer,
    Node,
    Link,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Study => "study",
            EntityKind::Layer => "layer",
            EntityKind::Node => "node",
            EntityKind::Link => "link",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("a layer named '{0}' already exists")]
    DuplicateName(String),

    #[error("the default layer cannot be {0}")]
    ProtectedLayer(&'static str),

    #[error("{0}")]
    InvalidState(String),

    #[error("request to the study service failed: {0:#}")]
    Network(#[source] anyhow::Error),
}

impl MapError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        MapError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        MapError::InvalidState(message.into())
    }

    /// Local errors point at a caller bug or a stale id; only network
    /// failures come from outside the process.
    pub fn is_local(&self) -> bool {
        !matches!(self, MapError::Network(_))
    }
}

pub type MapResult<T> = std::result::Result<T, MapError>;
