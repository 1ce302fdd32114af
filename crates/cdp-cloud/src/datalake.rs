//! CDP Datalake client (`/api/v1/datalake`).

use serde_json::{json, Value};

use crate::client::{present, CdpClient, Squelch};
use crate::error::CdpResult;
use crate::states::StateSet;
use crate::waiter::{field, wait_for_state, WaitOptions, WaitTarget};

const BASE: &str = "/api/v1/datalake";

pub const DATALAKE_STARTED_STATES: &[&str] = &["RUNNING"];
pub const DATALAKE_STOPPED_STATES: &[&str] = &["STOPPED"];
pub const DATALAKE_FAILED_STATES: &[&str] = &[
    "PROVISIONING_FAILED",
    "CREATE_FAILED",
    "DELETE_FAILED",
    "START_FAILED",
    "STOP_FAILED",
    "REPAIR_FAILED",
];

#[derive(Clone)]
pub struct DatalakeClient {
    client: CdpClient,
}

impl DatalakeClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    /// `None` if the datalake does not exist.
    pub async fn describe_datalake(&self, name: &str) -> CdpResult<Option<Value>> {
        let resp = self
            .client
            .post(
                &format!("{}/describeDatalake", BASE),
                Some(&json!({ "datalakeName": name })),
                &Squelch::not_found(),
            )
            .await?;
        Ok(present(resp).and_then(|r| present(r.get("datalake").cloned())))
    }

    /// Datalakes, optionally only those in `environment`.
    pub async fn list_datalakes(&self, environment: Option<&str>) -> CdpResult<Vec<Value>> {
        let mut body = json!({});
        if let Some(env) = environment {
            body["environmentName"] = json!(env);
        }
        let resp = self
            .client
            .post(&format!("{}/listDatalakes", BASE), Some(&body), &Squelch::none())
            .await?;
        Ok(resp
            .and_then(|r| r.get("datalakes").and_then(Value::as_array).cloned())
            .unwrap_or_default())
    }

    pub async fn delete_datalake(&self, name: &str, force: bool) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/deleteDatalake", BASE),
                Some(&json!({ "datalakeName": name, "force": force })),
                &Squelch::not_found(),
            )
            .await
    }

    pub async fn start_datalake(&self, name: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/startDatalake", BASE),
                Some(&json!({ "datalakeName": name })),
                &Squelch::none(),
            )
            .await
    }

    pub async fn stop_datalake(&self, name: &str) -> CdpResult<Option<Value>> {
        self.client
            .post(
                &format!("{}/stopDatalake", BASE),
                Some(&json!({ "datalakeName": name })),
                &Squelch::none(),
            )
            .await
    }

    /// Poll the datalake's `status`.
    pub async fn wait_for_datalake(
        &self,
        name: &str,
        target: &WaitTarget,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        let mut options = options.clone();
        if options.failure_states.is_empty() {
            options.failure_states = StateSet::from(DATALAKE_FAILED_STATES);
        }
        wait_for_state(
            &format!("datalake '{}'", name),
            move || self.describe_datalake(name),
            field(&["status"]),
            target,
            &options,
        )
        .await
    }

    pub async fn wait_until_running(
        &self,
        name: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        self.wait_for_datalake(name, &WaitTarget::states(DATALAKE_STARTED_STATES), options)
            .await
    }

    pub async fn wait_until_stopped(
        &self,
        name: &str,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        self.wait_for_datalake(name, &WaitTarget::states(DATALAKE_STOPPED_STATES), options)
            .await
    }

    pub async fn wait_until_deleted(&self, name: &str, options: &WaitOptions) -> CdpResult<()> {
        self.wait_for_datalake(name, &WaitTarget::Absent, options)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::mock_client;
    use crate::error::CdpError;
    use std::time::Duration;

    #[tokio::test]
    async fn list_filters_by_environment() {
        let (client, rest) = mock_client(vec![Ok(Some(
            json!({"datalakes": [{"datalakeName": "dl"}]}),
        ))]);
        let lakes = DatalakeClient::new(client);
        let found = lakes.list_datalakes(Some("dev")).await.unwrap();
        assert_eq!(found.len(), 1);
        let call = &rest.calls()[0];
        assert_eq!(call.path, "/api/v1/datalake/listDatalakes");
        assert_eq!(call.payload, Some(json!({"environmentName": "dev"})));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_then_wait_for_removal() {
        let (client, rest) = mock_client(vec![
            Ok(Some(json!({}))),
            Ok(Some(json!({"datalake": {"status": "DELETE_IN_PROGRESS"}}))),
            Err(CdpError::from_response(404, "", "u")),
        ]);
        let lakes = DatalakeClient::new(client);
        lakes.delete_datalake("dl", true).await.unwrap();
        lakes
            .wait_until_deleted("dl", &WaitOptions::new(Duration::from_secs(10), Duration::from_secs(100)))
            .await
            .unwrap();

        let calls = rest.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].payload, Some(json!({"datalakeName": "dl", "force": true})));
        assert_eq!(calls[2].path, "/api/v1/datalake/describeDatalake");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_running_reports_failure() {
        let (client, _) = mock_client(vec![Ok(Some(
            json!({"datalake": {"status": "PROVISIONING_FAILED", "statusReason": "no capacity"}}),
        ))]);
        let lakes = DatalakeClient::new(client);
        let err = lakes
            .wait_until_running("dl", &WaitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::StateFailure { .. }));
        assert!(err.to_string().contains("no capacity"));
    }
}
