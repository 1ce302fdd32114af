//! CDP DataFlow client (`/api/v1/df`).
//!
//! DataFlow reports service state under `status.state`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{present, CdpClient, Squelch};
use crate::error::CdpResult;
use crate::states::StateSet;
use crate::waiter::{field, wait_for_state, WaitOptions, WaitTarget};

const BASE: &str = "/api/v1/df";

pub const DF_STARTED_STATES: &[&str] = &["GOOD_HEALTH", "CONCERNING_HEALTH", "BAD_HEALTH"];
pub const DF_DISABLED_STATES: &[&str] = &["NOT_ENABLED"];
pub const DF_FAILED_STATES: &[&str] = &["ENABLE_FAILED", "DISABLE_FAILED", "RESET_FAILED"];

/// Settings for enabling DataFlow in an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnableServiceRequest {
    pub environment_crn: String,
    pub min_k8s_node_count: u32,
    pub max_k8s_node_count: u32,
    pub use_public_load_balancer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_api_authorized_ip_ranges: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_authorized_ip_ranges: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_subnets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_subnets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Map<String, Value>>,
}

impl EnableServiceRequest {
    pub fn new(environment_crn: &str) -> Self {
        Self {
            environment_crn: environment_crn.to_string(),
            min_k8s_node_count: 3,
            max_k8s_node_count: 3,
            use_public_load_balancer: false,
            kube_api_authorized_ip_ranges: None,
            load_balancer_authorized_ip_ranges: None,
            cluster_subnets: None,
            load_balancer_subnets: None,
            tags: None,
        }
    }
}

#[derive(Clone)]
pub struct DataFlowClient {
    client: CdpClient,
}

impl DataFlowClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    /// Every DataFlow service, following `nextToken`.
    pub async fn list_services(
        &self,
        search_term: Option<&str>,
        page_size: Option<u32>,
    ) -> CdpResult<Vec<Value>> {
        let mut body = json!({});
        if let Some(term) = search_term {
            body["searchTerm"] = json!(term);
        }
        let paginator = match page_size {
            Some(size) => crate::pagination::Paginator::new(size),
            None => self.client.paginator(),
        };
        let resp = self
            .client
            .post_paginated(
                &format!("{}/listServices", BASE),
                &body,
                &paginator,
                &Squelch::none().on(404, json!({ "services": [] })),
            )
            .await?;
        Ok(resp
            .and_then(|r| r.get("services").and_then(Value::as_array).cloned())
            .unwrap_or_default())
    }

    /// The `service` object, or `None` if the CRN is unknown.
    pub async fn describe_service(&self, crn: &str) -> CdpResult<Option<Value>> {
        let resp = self
            .client
            .post(
                &format!("{}/describeService", BASE),
                Some(&json!({ "serviceCrn": crn })),
                &Squelch::not_found(),
            )
            .await?;
        Ok(present(resp).and_then(|r| present(r.get("service").cloned())))
    }

    /// Describe the service whose environment is named `name`.
    pub async fn get_service_by_name(&self, name: &str) -> CdpResult<Option<Value>> {
        let services = self.list_services(Some(name), None).await?;
        match find_crn(&services, "name", name) {
            Some(crn) => self.describe_service(&crn).await,
            None => Ok(None),
        }
    }

    pub async fn get_service_by_crn(&self, crn: &str) -> CdpResult<Option<Value>> {
        self.describe_service(crn).await
    }

    pub async fn get_service_by_env_crn(&self, env_crn: &str) -> CdpResult<Option<Value>> {
        let services = self.list_services(None, None).await?;
        match find_crn(&services, "environmentCrn", env_crn) {
            Some(crn) => self.describe_service(&crn).await,
            None => Ok(None),
        }
    }

    pub async fn enable_service(&self, request: &EnableServiceRequest) -> CdpResult<Option<Value>> {
        let body = serde_json::to_value(request)?;
        let resp = self
            .client
            .post(&format!("{}/enableService", BASE), Some(&body), &Squelch::none())
            .await?;
        Ok(present(resp).and_then(|r| r.get("service").cloned()))
    }

    /// Disable DataFlow. `persist` keeps the service record,
    /// `terminate` tears down running deployments.
    pub async fn disable_service(
        &self,
        crn: &str,
        persist: bool,
        terminate: bool,
    ) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/disableService", BASE),
                Some(&json!({
                    "serviceCrn": crn,
                    "persist": persist,
                    "terminateDeployments": terminate,
                })),
                &Squelch::none(),
            )
            .await
    }

    pub async fn reset_service(&self, crn: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/resetService", BASE),
                Some(&json!({ "serviceCrn": crn })),
                &Squelch::none(),
            )
            .await
    }

    /// Poll `status.state` of the service.
    pub async fn wait_for_service(
        &self,
        crn: &str,
        target: &WaitTarget,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        let mut options = options.clone();
        if options.failure_states.is_empty() {
            options.failure_states = StateSet::from(DF_FAILED_STATES);
        }
        wait_for_state(
            &format!("DataFlow service '{}'", crn),
            move || self.describe_service(crn),
            field(&["status", "state"]),
            target,
            &options,
        )
        .await
    }

    pub async fn wait_until_enabled(
        &self,
        crn: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        self.wait_for_service(crn, &WaitTarget::states(DF_STARTED_STATES), options)
            .await
    }

    /// Wait for a disabled service to settle in `NOT_ENABLED` or disappear.
    pub async fn wait_until_disabled(&self, crn: &str, options: &WaitOptions) -> CdpResult<()> {
        let target = WaitTarget::StatesOrAbsent(StateSet::from(DF_DISABLED_STATES));
        self.wait_for_service(crn, &target, options).await.map(|_| ())
    }
}

fn find_crn(services: &[Value], key: &str, wanted: &str) -> Option<String> {
    services
        .iter()
        .find(|s| s.get(key).and_then(Value::as_str) == Some(wanted))
        .and_then(|s| s.get("crn").and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::mock_client;
    use crate::error::CdpError;
    use std::time::Duration;

    #[tokio::test]
    async fn list_services_paginates_with_starting_token() {
        let (client, rest) = mock_client(vec![
            Ok(Some(json!({"services": [{"crn": "c1"}], "nextToken": "t"}))),
            Ok(Some(json!({"services": [{"crn": "c2"}]}))),
        ]);
        let df = DataFlowClient::new(client);
        let services = df.list_services(Some("dev"), None).await.unwrap();
        assert_eq!(services.len(), 2);

        let calls = rest.calls();
        assert_eq!(calls[0].path, "/api/v1/df/listServices");
        assert_eq!(calls[0].payload, Some(json!({"searchTerm": "dev", "pageSize": 100})));
        assert_eq!(calls[1].payload.as_ref().unwrap()["startingToken"], "t");
    }

    #[tokio::test]
    async fn list_services_squelches_not_found() {
        let (client, _) = mock_client(vec![Err(CdpError::from_response(404, "", "u"))]);
        let df = DataFlowClient::new(client);
        assert!(df.list_services(None, Some(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_service_by_name_describes_match() {
        let (client, rest) = mock_client(vec![
            Ok(Some(json!({"services": [
                {"name": "other", "crn": "c0"},
                {"name": "dev", "crn": "c1"}
            ]}))),
            Ok(Some(json!({"service": {"crn": "c1", "status": {"state": "GOOD_HEALTH"}}}))),
        ]);
        let df = DataFlowClient::new(client);
        let service = df.get_service_by_name("dev").await.unwrap().unwrap();
        assert_eq!(service["crn"], "c1");
        assert_eq!(rest.calls()[1].payload, Some(json!({"serviceCrn": "c1"})));
    }

    #[tokio::test]
    async fn get_service_by_env_crn_none_when_absent() {
        let (client, rest) = mock_client(vec![Ok(Some(json!({"services": []})))]);
        let df = DataFlowClient::new(client);
        assert!(df.get_service_by_env_crn("env-crn").await.unwrap().is_none());
        assert_eq!(rest.calls().len(), 1);
    }

    #[tokio::test]
    async fn enable_serializes_request() {
        let (client, rest) = mock_client(vec![Ok(Some(json!({"service": {"crn": "c1"}})))]);
        let df = DataFlowClient::new(client);
        let request = EnableServiceRequest {
            use_public_load_balancer: true,
            ..EnableServiceRequest::new("env-crn")
        };
        let service = df.enable_service(&request).await.unwrap().unwrap();
        assert_eq!(service["crn"], "c1");
        assert_eq!(
            rest.calls()[0].payload,
            Some(json!({
                "environmentCrn": "env-crn",
                "minK8sNodeCount": 3,
                "maxK8sNodeCount": 3,
                "usePublicLoadBalancer": true
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_enabled_reads_nested_state() {
        let (client, _) = mock_client(vec![
            Ok(Some(json!({"service": {"status": {"state": "ENABLING"}}}))),
            Ok(Some(json!({"service": {"status": {"state": "GOOD_HEALTH"}}}))),
        ]);
        let df = DataFlowClient::new(client);
        let service = df
            .wait_until_enabled("c1", &WaitOptions::new(Duration::from_secs(15), Duration::from_secs(60)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service["status"]["state"], "GOOD_HEALTH");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_disabled_accepts_not_enabled() {
        let (client, _) = mock_client(vec![
            Ok(Some(json!({"service": {"status": {"state": "DISABLING"}}}))),
            Ok(Some(json!({"service": {"status": {"state": "NOT_ENABLED"}}}))),
        ]);
        let df = DataFlowClient::new(client);
        df.wait_until_disabled("c1", &WaitOptions::new(Duration::from_secs(15), Duration::from_secs(60)))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_disabled_fails_on_disable_failed() {
        let (client, _) = mock_client(vec![Ok(Some(
            json!({"service": {"status": {"state": "DISABLE_FAILED", "message": "stuck"}}}),
        ))]);
        let df = DataFlowClient::new(client);
        let err = df
            .wait_until_disabled("c1", &WaitOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stuck"));
    }
}
