//! Session bundle and session registry.
//!
//! `CdpService` owns one signed transport and hands a clone of it to every
//! resource client. `CdpSessions` keeps any number of them keyed by session
//! id, for callers that juggle several profiles or regions at once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::{CdpClient, CdpHttpClient};
use crate::config::{CdpRegion, ConnectionOptions, ResolvedConfig};
use crate::consumption::ConsumptionClient;
use crate::datahub::DatahubClient;
use crate::datalake::DatalakeClient;
use crate::df::DataFlowClient;
use crate::environments::EnvironmentsClient;
use crate::error::{CdpError, CdpResult};
use crate::iam::IamClient;
use crate::ml::MlClient;

/// Every resource client, sharing one transport.
#[derive(Clone)]
pub struct CdpService {
    client: CdpClient,
    pub environments: EnvironmentsClient,
    pub datalake: DatalakeClient,
    pub datahub: DatahubClient,
    pub df: DataFlowClient,
    pub ml: MlClient,
    pub iam: IamClient,
    pub consumption: ConsumptionClient,
}

impl CdpService {
    /// Resolve `options` against the environment and credentials file,
    /// then build the bundle.
    pub fn connect(options: &ConnectionOptions) -> CdpResult<Self> {
        Self::from_resolved(&options.resolve()?)
    }

    pub fn from_resolved(resolved: &ResolvedConfig) -> CdpResult<Self> {
        let http = CdpHttpClient::new(&resolved.credentials, resolved.client.clone())?;
        log::info!(
            "CDP client for {}",
            describe_target(&resolved.region, &resolved.client.endpoint)
        );
        Ok(Self::from_client(CdpClient::from_http(http)))
    }

    pub fn from_client(client: CdpClient) -> Self {
        Self {
            environments: EnvironmentsClient::new(client.clone()),
            datalake: DatalakeClient::new(client.clone()),
            datahub: DatahubClient::new(client.clone()),
            df: DataFlowClient::new(client.clone()),
            ml: MlClient::new(client.clone()),
            iam: IamClient::new(client.clone()),
            consumption: ConsumptionClient::new(client.clone()),
            client,
        }
    }

    /// The shared transport, for endpoints without a dedicated client.
    pub fn client(&self) -> &CdpClient {
        &self.client
    }
}

/// What is known about an open session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpSession {
    pub id: String,
    pub access_key_id: String,
    pub region: String,
    pub endpoint: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_connected: bool,
    /// Filled from `getUser` when the credentials check succeeds.
    pub user_crn: Option<String>,
    pub account_id: Option<String>,
}

impl CdpSession {
    fn new(resolved: &ResolvedConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            access_key_id: resolved.credentials.access_key_id.clone(),
            region: resolved.region.name.clone(),
            endpoint: resolved.client.endpoint.clone(),
            connected_at: now,
            last_activity: now,
            is_connected: true,
            user_crn: None,
            account_id: None,
        }
    }
}

pub type CdpSessionsState = Arc<Mutex<CdpSessions>>;

#[derive(Default)]
pub struct CdpSessions {
    sessions: HashMap<String, CdpSession>,
    services: HashMap<String, CdpService>,
}

impl CdpSessions {
    pub fn new() -> CdpSessionsState {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Open a session and check the credentials with `getUser`.
    ///
    /// A failed check is logged and the session is kept.
    pub async fn connect(&mut self, options: &ConnectionOptions) -> CdpResult<String> {
        let resolved = options.resolve()?;
        let service = CdpService::from_resolved(&resolved)?;
        let id = self.open(&resolved, service);
        self.identify(&id).await;
        Ok(id)
    }

    /// Register an already-built service under a fresh session id.
    pub fn open(&mut self, resolved: &ResolvedConfig, service: CdpService) -> String {
        let session = CdpSession::new(resolved);
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        self.services.insert(id.clone(), service);
        id
    }

    async fn identify(&mut self, id: &str) {
        let Some(service) = self.services.get(id) else {
            return;
        };
        match service.iam.get_user(None).await {
            Ok(user) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.user_crn = user.get("crn").and_then(|v| v.as_str()).map(String::from);
                    session.account_id = user
                        .get("accountId")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
            }
            Err(e) => {
                log::warn!("getUser failed for CDP session {}: {} (session kept)", id, e);
            }
        }
    }

    pub fn disconnect(&mut self, id: &str) -> CdpResult<()> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| CdpError::SessionNotFound(id.to_string()))?;
        session.is_connected = false;
        session.last_activity = Utc::now();
        self.services.remove(id);
        Ok(())
    }

    pub fn list_sessions(&self) -> Vec<CdpSession> {
        self.sessions.values().cloned().collect()
    }

    pub fn get_session(&self, id: &str) -> Option<CdpSession> {
        self.sessions.get(id).cloned()
    }

    /// The live service for `id`; touches the session's activity time.
    pub fn service(&mut self, id: &str) -> CdpResult<CdpService> {
        let service = self
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| CdpError::SessionNotFound(id.to_string()))?;
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_activity = Utc::now();
        }
        Ok(service)
    }
}

/// Region of a resolved configuration, for display.
pub fn describe_target(region: &CdpRegion, endpoint: &str) -> String {
    if endpoint == region.endpoint() {
        region.name.clone()
    } else {
        format!("{} via {}", region.name, endpoint)
    }
}
