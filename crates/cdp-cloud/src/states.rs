//! Named sets of lifecycle states.
//!
//! CDP services do not share one status vocabulary, so the shared sets
//! below span every service. Each resource module narrows them down to the
//! strings its own API reports.

use std::collections::BTreeSet;
use std::fmt;

/// An ordered, de-duplicated set of state names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSet(BTreeSet<String>);

impl StateSet {
    pub fn new<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(states.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, state: &str) -> bool {
        self.0.contains(state)
    }

    /// Every state in either set.
    pub fn union(&self, other: &StateSet) -> StateSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<&[&str]> for StateSet {
    fn from(states: &[&str]) -> Self {
        Self::new(states.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for StateSet {
    fn from(states: [&str; N]) -> Self {
        Self::new(states)
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", state)?;
        }
        write!(f, "]")
    }
}

// ── Shared vocabularies ─────────────────────────────────────────────────

pub const CREATION_STATES: &[&str] = &[
    "REQUESTED",
    "EXTERNAL_DATABASE_CREATION_IN_PROGRESS",
    "STACK_CREATION_IN_PROGRESS",
    "CREATION_INITIATED",
    "FREEIPA_CREATION_IN_PROGRESS",
    "NETWORK_CREATION_IN_PROGRESS",
    "installation:pending",
    "provision:started",
    "installation:started",
    "ClusterCreationInProgress",
    "Creating",
    "STARTING",
    "ENABLING",
];

pub const STARTED_STATES: &[&str] = &[
    "AVAILABLE",
    "RUNNING",
    "Running",
    "installation:finished",
    "GOOD_HEALTH",
    "ClusterCreationCompleted",
    "Succeeded",
    "Updated",
    "Created",
    "Ready",
    "STARTED",
    "GOOD_STANDING",
];

pub const STOPPED_STATES: &[&str] = &[
    "STOPPED",
    "ENV_STOPPED",
    "Stopped",
    "NOT_ENABLED",
    "ClusterDeletionCompleted",
    "Deleted",
];

pub const FAILED_STATES: &[&str] = &[
    "PROVISIONING_FAILED",
    "CREATE_FAILED",
    "REJECTED",
    "FAILED",
    "TIMEDOUT",
    "DELETE_FAILED",
    "START_FAILED",
    "STOP_FAILED",
    "Error",
    "installation:failed",
    "provision:failed",
    "deprovision:failed",
    "BAD_HEALTH",
    "ClusterCreationFailed",
    "ClusterDeletionFailed",
    "Failed",
    "DeploymentFailed",
    "ENABLE_FAILED",
    "DISABLE_FAILED",
];

pub const REMOVABLE_STATES: &[&str] = &[
    "AVAILABLE",
    "RUNNING",
    "STOPPED",
    "ENV_STOPPED",
    "UPDATE_FAILED",
    "CREATE_FAILED",
    "ENABLE_SECURITY_FAILED",
    "DELETE_FAILED",
    "DELETED_ON_PROVIDER_SIDE",
    "START_FAILED",
    "STOP_FAILED",
    "installation:failed",
    "deprovision:failed",
    "installation:finished",
    "modify:finished",
    "Error",
    "Running",
    "Stopped",
    "GOOD_HEALTH",
    "CONCERNING_HEALTH",
    "BAD_HEALTH",
    "Succeeded",
    "Updated",
    "Failed",
    "Ready",
    "GOOD_STANDING",
    "ENABLE_FAILED",
];

pub const TERMINATION_STATES: &[&str] = &[
    "DELETE_REQUESTED",
    "PRE_DELETE_IN_PROGRESS",
    "EXTERNAL_DATABASE_DELETION_IN_PROGRESS",
    "STACK_DELETION_IN_PROGRESS",
    "FREEIPA_DELETE_IN_PROGRESS",
    "deprovision:started",
    "installation:deleting",
    "ClusterDeletionInProgress",
    "Deleting",
    "DISABLING",
    "TERMINATING",
];
