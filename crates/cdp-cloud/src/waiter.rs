//! Poll a resource until it converges on a declared state.
//!
//! [`wait_for_state`] calls a describe function once per tick and extracts
//! the observed state from the description. It returns when the state is
//! in the target set (or, for [`WaitTarget::Absent`], when the resource is
//! gone), fails when the state is in the failure set, and times out when
//! the budget is spent. Between ticks it sleeps for the configured delay.

use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{CdpError, CdpResult};
use crate::states::StateSet;

pub const DEFAULT_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// What the poll is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitTarget {
    /// Any of these states.
    States(StateSet),
    /// The resource no longer exists.
    Absent,
    /// Any of these states, or gone.
    StatesOrAbsent(StateSet),
}

impl WaitTarget {
    pub fn states(states: impl Into<StateSet>) -> Self {
        Self::States(states.into())
    }

    fn accepts_absence(&self) -> bool {
        !matches!(self, Self::States(_))
    }

    fn accepts(&self, state: &str) -> bool {
        match self {
            Self::States(states) | Self::StatesOrAbsent(states) => states.contains(state),
            Self::Absent => false,
        }
    }
}

impl fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::States(states) => write!(f, "{}", states),
            Self::Absent => write!(f, "removal"),
            Self::StatesOrAbsent(states) => write!(f, "{} or removal", states),
        }
    }
}

/// Timing and failure handling for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOptions {
    pub delay: Duration,
    pub timeout: Duration,
    pub failure_states: StateSet,
    /// Keep polling through failure states (used for forced deletes).
    pub ignore_failures: bool,
    /// Consecutive target observations required before returning.
    pub state_confirmation_retries: u32,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
            failure_states: StateSet::default(),
            ignore_failures: false,
            state_confirmation_retries: 1,
        }
    }
}

impl WaitOptions {
    pub fn new(delay: Duration, timeout: Duration) -> Self {
        Self {
            delay,
            timeout,
            ..Default::default()
        }
    }

    pub fn with_failure_states(mut self, states: impl Into<StateSet>) -> Self {
        self.failure_states = states.into();
        self
    }

    pub fn ignore_failures(mut self, ignore: bool) -> Self {
        self.ignore_failures = ignore;
        self
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.state_confirmation_retries = confirmations.max(1);
        self
    }
}

/// Extractor reading the state at a nested key path, e.g. `&["status", "state"]`.
pub fn field(path: &'static [&'static str]) -> impl Fn(&Value) -> Option<String> + Send + Sync {
    move |value: &Value| {
        let leaf = path.iter().try_fold(value, |v, key| v.get(*key))?;
        match leaf {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// `null`, `{}`, `[]` and `""` all mean "nothing there".
pub fn is_empty_description(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// The resource's own explanation of its state, if it gave one.
pub fn status_message(value: &Value) -> Option<String> {
    let candidates = [
        value.get("statusReason"),
        value.get("statusMessage"),
        value.get("status").and_then(|s| s.get("message")),
        value.get("status").and_then(|s| s.get("detailedState")),
        value.get("failureMessage"),
        value.get("message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

/// Poll `describe` until `target` is reached.
///
/// A `None` or empty description while waiting for a state counts as "not
/// visible yet" and polling continues. While waiting for
/// [`WaitTarget::Absent`] it ends the wait with `Ok(None)`.
pub async fn wait_for_state<D, Fut, E>(
    resource: &str,
    mut describe: D,
    extract: E,
    target: &WaitTarget,
    options: &WaitOptions,
) -> CdpResult<Option<Value>>
where
    D: FnMut() -> Fut,
    Fut: Future<Output = CdpResult<Option<Value>>>,
    E: Fn(&Value) -> Option<String>,
{
    let started = Instant::now();
    let required = options.state_confirmation_retries.max(1);
    let mut confirmations = 0u32;

    loop {
        let description = describe().await?.filter(|d| !is_empty_description(d));

        match description {
            None => {
                confirmations = 0;
                if target.accepts_absence() {
                    log::info!("{} is gone after {:?}", resource, started.elapsed());
                    return Ok(None);
                }
                log::debug!("{} not visible yet ({:?} elapsed)", resource, started.elapsed());
            }
            Some(description) => {
                let observed = extract(&description);
                log::debug!(
                    "{} state: {} ({:?} elapsed)",
                    resource,
                    observed.as_deref().unwrap_or("<none>"),
                    started.elapsed()
                );

                if let Some(ref state) = observed {
                    if !options.ignore_failures && options.failure_states.contains(state) {
                        return Err(CdpError::StateFailure {
                            resource: resource.to_string(),
                            state: state.clone(),
                            message: status_message(&description)
                                .unwrap_or_else(|| "no status message".to_string()),
                        });
                    }
                }

                match observed.as_deref() {
                    Some(state) if target.accepts(state) => {
                        confirmations += 1;
                        if confirmations >= required {
                            log::info!(
                                "{} reached {} after {:?}",
                                resource,
                                state,
                                started.elapsed()
                            );
                            return Ok(Some(description));
                        }
                    }
                    _ => confirmations = 0,
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= options.timeout {
            return Err(CdpError::Timeout {
                resource: resource.to_string(),
                target: target.to_string(),
                elapsed_secs: elapsed.as_secs(),
            });
        }
        tokio::time::sleep(options.delay).await;
    }
}
