//! State labels and the per-object-type refresh capability

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a remote object (e.g., "BUILDING", "ACTIVE")
///
/// Meaning differs per object type, except for the two labels this crate
/// synthesizes itself: [`StateLabel::DELETED`] and [`StateLabel::ERROR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateLabel(String);

impl StateLabel {
    /// Remote object is absent
    pub const DELETED: &'static str = "DELETED";
    /// Refresh failed fatally; reported by [`PollError::last_state`]
    ///
    /// [`PollError::last_state`]: crate::error::PollError::last_state
    pub const ERROR: &'static str = "ERROR";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn deleted() -> Self {
        Self::new(Self::DELETED)
    }

    pub fn error() -> Self {
        Self::new(Self::ERROR)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_deleted(&self) -> bool {
        self.0 == Self::DELETED
    }
}

impl From<&str> for StateLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for StateLabel {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One refresh result: the object (if present) and its state label
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub object: Option<T>,
    pub state: StateLabel,
}

impl<T> Observation<T> {
    pub fn found(object: T, state: impl Into<StateLabel>) -> Self {
        Self {
            object: Some(object),
            state: state.into(),
        }
    }

    /// Sentinel for "object absent"
    pub fn absent() -> Self {
        Self {
            object: None,
            state: StateLabel::deleted(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.state.is_deleted()
    }
}

/// Reduces one remote read of an object to an [`Observation`]
///
/// Implemented once per object type. Absence may be reported either as
/// [`Observation::absent`] or as a not-found [`ApiError`]; the poller treats
/// both the same way.
#[async_trait]
pub trait StateRefresher: Send + Sync {
    type Object: Send + fmt::Debug;

    async fn refresh(&self) -> Result<Observation<Self::Object>, ApiError>;
}
