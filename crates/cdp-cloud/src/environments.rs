//! CDP Environments client (`/api/v1/environments2`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{present, CdpClient, Squelch};
use crate::error::CdpResult;
use crate::states::StateSet;
use crate::waiter::{field, wait_for_state, WaitOptions, WaitTarget};

const BASE: &str = "/api/v1/environments2";

pub const ENV_STARTED_STATES: &[&str] = &["AVAILABLE"];
pub const ENV_STOPPED_STATES: &[&str] = &["ENV_STOPPED"];
pub const ENV_FAILED_STATES: &[&str] = &[
    "CREATE_FAILED",
    "DELETE_FAILED",
    "START_FAILED",
    "STOP_FAILED",
    "FREEIPA_DELETED_ON_PROVIDER_SIDE",
    "ARCHIVED",
];

/// One subnet of an environment's network.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub subnet_id: String,
    #[serde(default)]
    pub subnet_name: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub cidr: String,
}

/// Environments API.
#[derive(Clone)]
pub struct EnvironmentsClient {
    client: CdpClient,
}

impl EnvironmentsClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    /// Describe an environment by name or CRN. `None` if it does not exist.
    pub async fn describe_environment(&self, name: &str) -> CdpResult<Option<Value>> {
        let resp = self
            .client
            .post(
                &format!("{}/describeEnvironment", BASE),
                Some(&json!({ "environmentName": name })),
                &Squelch::not_found(),
            )
            .await?;
        Ok(present(resp).and_then(|r| present(r.get("environment").cloned())))
    }

    /// Environment summaries.
    pub async fn list_environments(&self) -> CdpResult<Vec<Value>> {
        let resp = self
            .client
            .post(
                &format!("{}/listEnvironments", BASE),
                Some(&json!({})),
                &Squelch::none(),
            )
            .await?;
        Ok(resp
            .and_then(|r| r.get("environments").and_then(Value::as_array).cloned())
            .unwrap_or_default())
    }

    pub async fn get_environment_by_name(&self, name: &str) -> CdpResult<Option<Value>> {
        Ok(self
            .list_environments()
            .await?
            .into_iter()
            .find(|env| env.get("environmentName").and_then(Value::as_str) == Some(name)))
    }

    pub async fn get_environment_crn(&self, name: &str) -> CdpResult<Option<String>> {
        Ok(self
            .get_environment_by_name(name)
            .await?
            .and_then(|env| env.get("crn").and_then(Value::as_str).map(str::to_string)))
    }

    /// Subnets from `network.subnetMetadata`, falling back to bare
    /// `network.subnetIds` when no metadata is present.
    pub async fn get_environment_subnets(&self, name: &str) -> CdpResult<Vec<Subnet>> {
        let env = match self.describe_environment(name).await? {
            Some(env) => env,
            None => return Ok(Vec::new()),
        };
        Ok(subnets_from_environment(&env))
    }

    pub async fn start_environment(
        &self,
        name: &str,
        with_datahub_start: bool,
    ) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/startEnvironment", BASE),
                Some(&json!({
                    "environmentName": name,
                    "withDatahubStart": with_datahub_start,
                })),
                &Squelch::none(),
            )
            .await
    }

    pub async fn stop_environment(&self, name: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/stopEnvironment", BASE),
                Some(&json!({ "environmentName": name })),
                &Squelch::none(),
            )
            .await
    }

    /// Delete an environment. A missing environment is not an error.
    pub async fn delete_environment(
        &self,
        name: &str,
        cascading: bool,
        forced: bool,
    ) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/deleteEnvironment", BASE),
                Some(&json!({
                    "environmentName": name,
                    "cascading": cascading,
                    "forced": forced,
                })),
                &Squelch::not_found(),
            )
            .await
    }

    /// Poll the environment's `status`.
    pub async fn wait_for_environment(
        &self,
        name: &str,
        target: &WaitTarget,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        wait_for_state(
            &format!("environment '{}'", name),
            move || self.describe_environment(name),
            field(&["status"]),
            target,
            options,
        )
        .await
    }

    pub async fn wait_until_available(
        &self,
        name: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        let options = with_default_failures(options);
        self.wait_for_environment(name, &WaitTarget::states(ENV_STARTED_STATES), &options)
            .await
    }

    pub async fn wait_until_stopped(
        &self,
        name: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        let options = with_default_failures(options);
        self.wait_for_environment(name, &WaitTarget::states(ENV_STOPPED_STATES), &options)
            .await
    }

    pub async fn wait_until_deleted(&self, name: &str, options: &WaitOptions) -> CdpResult<()> {
        let options = with_default_failures(options);
        self.wait_for_environment(name, &WaitTarget::Absent, &options)
            .await
            .map(|_| ())
    }
}

fn with_default_failures(options: &WaitOptions) -> WaitOptions {
    let mut options = options.clone();
    if options.failure_states.is_empty() {
        options.failure_states = StateSet::from(ENV_FAILED_STATES);
    }
    options
}

/// Extract the subnet list from an environment description.
pub fn subnets_from_environment(env: &Value) -> Vec<Subnet> {
    let network = env.get("network");

    let mut subnets: Vec<Subnet> = network
        .and_then(|n| n.get("subnetMetadata"))
        .and_then(Value::as_object)
        .map(|metadata| {
            metadata
                .iter()
                .map(|(id, info)| Subnet {
                    subnet_id: id.clone(),
                    subnet_name: str_field(info, "subnetName"),
                    availability_zone: str_field(info, "availabilityZone"),
                    cidr: str_field(info, "cidr"),
                })
                .collect()
        })
        .unwrap_or_default();

    if subnets.is_empty() {
        subnets = network
            .and_then(|n| n.get("subnetIds"))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(|id| Subnet {
                        subnet_id: id.to_string(),
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default();
    }

    subnets
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ── Subnet filters ──────────────────────────────────────────────────────

/// IDs of subnets whose name contains `pattern`, ignoring case.
pub fn filter_subnets_by_name_pattern(subnets: &[Subnet], pattern: &str) -> Vec<String> {
    let pattern = pattern.to_lowercase();
    select_ids(subnets, |s| s.subnet_name.to_lowercase().contains(&pattern))
}

pub fn filter_subnets_by_az(subnets: &[Subnet], availability_zone: &str) -> Vec<String> {
    select_ids(subnets, |s| s.availability_zone == availability_zone)
}

/// IDs of subnets whose CIDR starts with `prefix` (e.g. `"10.0."`).
pub fn filter_subnets_by_cidr_prefix(subnets: &[Subnet], prefix: &str) -> Vec<String> {
    select_ids(subnets, |s| s.cidr.starts_with(prefix))
}

/// Turn a bare pattern into a subnet-name filter. Anything starting with
/// `[` is already a JMESPath filter and passes through.
pub fn subnet_query(filter: &str) -> String {
    if filter.starts_with('[') {
        filter.to_string()
    } else {
        format!("[?contains(subnetName, '{}')]", filter.replace('\'', "\\'"))
    }
}

/// IDs of the subnets selected by a JMESPath filter such as
/// `[?availabilityZone=='us-east-1a']`, or by a bare name pattern.
///
/// The query must filter the subnet array without projecting it. A query
/// that fails to compile or evaluate selects nothing.
pub fn filter_subnets_by_query(subnets: &[Subnet], filter: &str) -> Vec<String> {
    let query = subnet_query(filter);
    let expr = match jmespath::compile(&query) {
        Ok(expr) => expr,
        Err(e) => {
            log::debug!("Invalid subnet filter '{}': {}", query, e);
            return Vec::new();
        }
    };
    let data = match serde_json::to_value(subnets) {
        Ok(data) => data,
        Err(_) => return Vec::new(),
    };
    let selected = match expr.search(data) {
        Ok(selected) => selected,
        Err(e) => {
            log::debug!("Subnet filter '{}' failed: {}", query, e);
            return Vec::new();
        }
    };

    selected
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.get("subnetId")?.as_string().cloned())
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn select_ids<F>(subnets: &[Subnet], keep: F) -> Vec<String>
where
    F: Fn(&Subnet) -> bool,
{
    subnets
        .iter()
        .filter(|s| !s.subnet_id.is_empty() && keep(s))
        .map(|s| s.subnet_id.clone())
        .collect()
}
