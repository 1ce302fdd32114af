//! CDP Datahub client (`/api/v1/datahub`).

use serde_json::{json, Value};

use crate::client::{present, CdpClient, Squelch};
use crate::error::CdpResult;
use crate::states::StateSet;
use crate::waiter::{field, wait_for_state, WaitOptions, WaitTarget};

const BASE: &str = "/api/v1/datahub";

pub const DATAHUB_STARTED_STATES: &[&str] = &["AVAILABLE"];
pub const DATAHUB_STOPPED_STATES: &[&str] = &["STOPPED"];
pub const DATAHUB_FAILED_STATES: &[&str] = &[
    "CREATE_FAILED",
    "DELETE_FAILED",
    "START_FAILED",
    "STOP_FAILED",
    "UPDATE_FAILED",
    "PROVISIONING_FAILED",
];

#[derive(Clone)]
pub struct DatahubClient {
    client: CdpClient,
}

impl DatahubClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    /// `None` if the cluster does not exist.
    pub async fn describe_cluster(&self, name: &str) -> CdpResult<Option<Value>> {
        let resp = self
            .client
            .post(
                &format!("{}/describeCluster", BASE),
                Some(&json!({ "clusterName": name })),
                &Squelch::not_found(),
            )
            .await?;
        Ok(present(resp).and_then(|r| present(r.get("cluster").cloned())))
    }

    pub async fn list_clusters(&self, environment: Option<&str>) -> CdpResult<Vec<Value>> {
        let mut body = json!({});
        if let Some(env) = environment {
            body["environmentName"] = json!(env);
        }
        let resp = self
            .client
            .post(&format!("{}/listClusters", BASE), Some(&body), &Squelch::none())
            .await?;
        Ok(resp
            .and_then(|r| r.get("clusters").and_then(Value::as_array).cloned())
            .unwrap_or_default())
    }

    pub async fn delete_cluster(&self, name: &str, force: bool) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/deleteCluster", BASE),
                Some(&json!({ "clusterName": name, "force": force })),
                &Squelch::not_found(),
            )
            .await
    }

    pub async fn start_cluster(&self, name: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/startCluster", BASE),
                Some(&json!({ "clusterName": name })),
                &Squelch::none(),
            )
            .await
    }

    pub async fn stop_cluster(&self, name: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/stopCluster", BASE),
                Some(&json!({ "clusterName": name })),
                &Squelch::none(),
            )
            .await
    }

    /// Repair the given host groups, or the whole cluster when empty.
    pub async fn repair_cluster(
        &self,
        name: &str,
        host_groups: &[String],
        remove_only: bool,
    ) -> CdpResult<Option<Value>> {
        let mut body = json!({ "clusterName": name, "removeOnly": remove_only });
        if !host_groups.is_empty() {
            body["hostGroups"] = json!(host_groups);
        }
        self.client
            .post(&format!("{}/repairCluster", BASE), Some(&body), &Squelch::none())
            .await
    }

    /// Poll the cluster's `status`.
    pub async fn wait_for_cluster(
        &self,
        name: &str,
        target: &WaitTarget,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        let mut options = options.clone();
        if options.failure_states.is_empty() {
            options.failure_states = StateSet::from(DATAHUB_FAILED_STATES);
        }
        wait_for_state(
            &format!("datahub '{}'", name),
            move || self.describe_cluster(name),
            field(&["status"]),
            target,
            &options,
        )
        .await
    }

    pub async fn wait_until_available(
        &self,
        name: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        self.wait_for_cluster(name, &WaitTarget::states(DATAHUB_STARTED_STATES), options)
            .await
    }

    pub async fn wait_until_stopped(
        &self,
        name: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        self.wait_for_cluster(name, &WaitTarget::states(DATAHUB_STOPPED_STATES), options)
            .await
    }

    pub async fn wait_until_deleted(&self, name: &str, options: &WaitOptions) -> CdpResult<()> {
        self.wait_for_cluster(name, &WaitTarget::Absent, options)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::mock_client;
    use std::time::Duration;

    #[tokio::test]
    async fn describe_unwraps_cluster() {
        let (client, rest) = mock_client(vec![Ok(Some(json!({"cluster": {"clusterName": "dh", "status": "AVAILABLE"}})))]);
        let hubs = DatahubClient::new(client);
        let cluster = hubs.describe_cluster("dh").await.unwrap().unwrap();
        assert_eq!(cluster["status"], "AVAILABLE");
        assert_eq!(rest.calls()[0].path, "/api/v1/datahub/describeCluster");
    }

    #[tokio::test]
    async fn repair_includes_host_groups() {
        let (client, rest) = mock_client(vec![]);
        let hubs = DatahubClient::new(client);
        hubs.repair_cluster("dh", &["worker".to_string()], false)
            .await
            .unwrap();
        hubs.repair_cluster("dh", &[], true).await.unwrap();

        let calls = rest.calls();
        assert_eq!(
            calls[0].payload,
            Some(json!({"clusterName": "dh", "removeOnly": false, "hostGroups": ["worker"]}))
        );
        assert_eq!(calls[1].payload, Some(json!({"clusterName": "dh", "removeOnly": true})));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_wait() {
        let (client, rest) = mock_client(vec![
            Ok(None),
            Ok(Some(json!({"cluster": {"status": "STOP_IN_PROGRESS"}}))),
            Ok(Some(json!({"cluster": {"status": "STOPPED"}}))),
        ]);
        let hubs = DatahubClient::new(client);
        hubs.stop_cluster("dh").await.unwrap();
        let cluster = hubs
            .wait_until_stopped("dh", &WaitOptions::new(Duration::from_secs(15), Duration::from_secs(120)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cluster["status"], "STOPPED");
        assert_eq!(rest.calls().len(), 3);
    }
}
