//! CDP Machine Learning workspaces client (`/api/v1/ml`).

use serde_json::{json, Map, Value};

use crate::client::{present, CdpClient, Squelch};
use crate::error::CdpResult;
use crate::states::StateSet;
use crate::waiter::{field, wait_for_state, WaitOptions, WaitTarget};

const BASE: &str = "/api/v1/ml";

pub const ML_STARTED_STATES: &[&str] = &["installation:finished"];
pub const ML_FAILED_STATES: &[&str] = &[
    "installation:failed",
    "provision:failed",
    "deprovision:failed",
    "upgrade:failed",
];

/// How to address a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceRef {
    Crn(String),
    Name { environment: String, name: String },
}

impl WorkspaceRef {
    pub fn crn(crn: &str) -> Self {
        Self::Crn(crn.to_string())
    }

    pub fn name(environment: &str, name: &str) -> Self {
        Self::Name {
            environment: environment.to_string(),
            name: name.to_string(),
        }
    }

    fn to_body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        match self {
            Self::Crn(crn) => {
                body.insert("workspaceCrn".to_string(), json!(crn));
            }
            Self::Name { environment, name } => {
                body.insert("environmentName".to_string(), json!(environment));
                body.insert("workspaceName".to_string(), json!(name));
            }
        }
        body
    }
}

impl std::fmt::Display for WorkspaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crn(crn) => write!(f, "{}", crn),
            Self::Name { environment, name } => write!(f, "{}/{}", environment, name),
        }
    }
}

#[derive(Clone)]
pub struct MlClient {
    client: CdpClient,
}

impl MlClient {
    pub fn new(client: CdpClient) -> Self {
        Self { client }
    }

    /// Workspace summaries, optionally only those in `environment`.
    pub async fn list_workspaces(&self, environment: Option<&str>) -> CdpResult<Vec<Value>> {
        let resp = self
            .client
            .post(
                &format!("{}/listWorkspaces", BASE),
                Some(&json!({})),
                &Squelch::none().on(404, json!([])),
            )
            .await?;
        let workspaces = resp
            .and_then(|r| r.get("workspaces").and_then(Value::as_array).cloned())
            .unwrap_or_default();
        Ok(match environment {
            Some(env) => workspaces
                .into_iter()
                .filter(|w| w.get("environmentName").and_then(Value::as_str) == Some(env))
                .collect(),
            None => workspaces,
        })
    }

    /// The `workspace` object, or `None` when unknown.
    ///
    /// The service answers 500 for some unknown workspaces, so 500 is
    /// treated like 404 here.
    pub async fn describe_workspace(&self, workspace: &WorkspaceRef) -> CdpResult<Option<Value>> {
        let body = Value::Object(workspace.to_body());
        let resp = self
            .client
            .post(
                &format!("{}/describeWorkspace", BASE),
                Some(&body),
                &Squelch::not_found().on(500, Value::Null),
            )
            .await?;
        Ok(present(resp).and_then(|r| present(r.get("workspace").cloned())))
    }

    /// Full descriptions of every workspace, optionally in one environment.
    pub async fn describe_all_workspaces(&self, environment: Option<&str>) -> CdpResult<Vec<Value>> {
        let mut described = Vec::new();
        for summary in self.list_workspaces(environment).await? {
            let Some(crn) = summary.get("crn").and_then(Value::as_str) else {
                continue;
            };
            if let Some(ws) = self.describe_workspace(&WorkspaceRef::crn(crn)).await? {
                described.push(ws);
            }
        }
        Ok(described)
    }

    /// Provision a workspace. `request` is sent as-is and must name the
    /// environment and workspace.
    pub async fn create_workspace(&self, request: &Value) -> CdpResult<Option<Value>> {
        self.client
            .post(&format!("{}/createWorkspace", BASE), Some(request), &Squelch::none())
            .await
    }

    pub async fn delete_workspace(
        &self,
        workspace: &WorkspaceRef,
        force: bool,
        remove_storage: bool,
    ) -> CdpResult<Option<Value>> {
        let mut body = workspace.to_body();
        body.insert("force".to_string(), json!(force));
        body.insert("removeStorage".to_string(), json!(remove_storage));
        self.client
            .post(
                &format!("{}/deleteWorkspace", BASE),
                Some(&Value::Object(body)),
                &Squelch::not_found(),
            )
            .await
    }

    /// Poll the workspace's `instanceStatus`.
    pub async fn wait_for_workspace(
        &self,
        workspace: &WorkspaceRef,
        target: &WaitTarget,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        let mut options = options.clone();
        if options.failure_states.is_empty() {
            options.failure_states = StateSet::from(ML_FAILED_STATES);
        }
        wait_for_state(
            &format!("ML workspace '{}'", workspace),
            move || self.describe_workspace(workspace),
            field(&["instanceStatus"]),
            target,
            &options,
        )
        .await
    }

    pub async fn wait_until_ready(
        &self,
        workspace: &WorkspaceRef,
        options: &WaitOptions,
    ) -> CdpResult<Option<Value>> {
        self.wait_for_workspace(workspace, &WaitTarget::states(ML_STARTED_STATES), options)
            .await
    }

    pub async fn wait_until_deleted(
        &self,
        workspace: &WorkspaceRef,
        options: &WaitOptions,
    ) -> CdpResult<()> {
        self.wait_for_workspace(workspace, &WaitTarget::Absent, options)
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
        let (client, rest) = mock_client(vec![Ok(Some(json!({"workspaces": [
            {"environmentName": "dev", "crn": "w1"},
            {"environmentName": "prod", "crn": "w2"}
        ]})))]);
        let ml = MlClient::new(client);
        let found = ml.list_workspaces(Some("prod")).await.unwrap();
        assert_eq!(found, vec![json!({"environmentName": "prod", "crn": "w2"})]);
        assert_eq!(rest.calls()[0].path, "/api/v1/ml/listWorkspaces");
    }

    #[tokio::test]
    async fn list_squelches_not_found() {
        let (client, _) = mock_client(vec![Err(CdpError::from_response(404, "", "u"))]);
        let ml = MlClient::new(client);
        assert!(ml.list_workspaces(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn describe_by_name_or_crn() {
        let (client, rest) = mock_client(vec![
            Ok(Some(json!({"workspace": {"instanceName": "ws"}}))),
            Err(CdpError::from_response(500, "", "u")),
        ]);
        let ml = MlClient::new(client);
        let ws = ml
            .describe_workspace(&WorkspaceRef::name("dev", "ws"))
            .await
            .unwrap();
        assert_eq!(ws.unwrap()["instanceName"], "ws");
        assert!(ml
            .describe_workspace(&WorkspaceRef::crn("crn:w"))
            .await
            .unwrap()
            .is_none());

        let calls = rest.calls();
        assert_eq!(
            calls[0].payload,
            Some(json!({"environmentName": "dev", "workspaceName": "ws"}))
        );
        assert_eq!(calls[1].payload, Some(json!({"workspaceCrn": "crn:w"})));
    }

    #[tokio::test]
    async fn describe_all_skips_missing() {
        let (client, rest) = mock_client(vec![
            Ok(Some(json!({"workspaces": [{"crn": "w1"}, {"crn": "w2"}]}))),
            Ok(Some(json!({"workspace": {"crn": "w1"}}))),
            Err(CdpError::from_response(404, "", "u")),
        ]);
        let ml = MlClient::new(client);
        let all = ml.describe_all_workspaces(None).await.unwrap();
        assert_eq!(all, vec![json!({"crn": "w1"})]);
        assert_eq!(rest.calls().len(), 3);
    }

    #[tokio::test]
    async fn delete_body() {
        let (client, rest) = mock_client(vec![]);
        let ml = MlClient::new(client);
        ml.delete_workspace(&WorkspaceRef::crn("w1"), true, false)
            .await
            .unwrap();
        assert_eq!(
            rest.calls()[0].payload,
            Some(json!({"workspaceCrn": "w1", "force": true, "removeStorage": false}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_ready_on_instance_status() {
        let (client, _) = mock_client(vec![
            Ok(Some(json!({"workspace": {"instanceStatus": "provision:started"}}))),
            Ok(Some(json!({"workspace": {"instanceStatus": "installation:started"}}))),
            Ok(Some(json!({"workspace": {"instanceStatus": "installation:finished"}}))),
        ]);
        let ml = MlClient::new(client);
        let start = tokio::time::Instant::now();
        let ws = ml
            .wait_until_ready(
                &WorkspaceRef::crn("w1"),
                &WaitOptions::new(Duration::from_secs(15), Duration::from_secs(600)),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ws["instanceStatus"], "installation:finished");
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_ready_fails_on_install_failure() {
        let (client, _) = mock_client(vec![Ok(Some(json!({"workspace": {
            "instanceStatus": "installation:failed",
            "failureMessage": "helm timeout"
        }})))]);
        let ml = MlClient::new(client);
        let err = ml
            .wait_until_ready(&WorkspaceRef::crn("w1"), &WaitOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("helm timeout"));
    }
}
