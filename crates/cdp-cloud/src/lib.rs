//! # cdp-cloud – Cloudera CDP control-plane client
//!
//! Signs every request with the account's Ed25519 access key, retries
//! transient failures, follows paginated listings and polls long-running
//! resources until they settle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  CdpService / CdpSessions  (service.rs)          │
//! │  └── per-session bundle of:                      │
//! │       EnvironmentsClient · DatalakeClient        │
//! │       DatahubClient · DataFlowClient · MlClient  │
//! │       IamClient · ConsumptionClient              │
//! ├──────────────────────────────────────────────────┤
//! │  wait_for_state  (waiter.rs)  ·  StateSet        │
//! │  Paginator       (pagination.rs)                 │
//! ├──────────────────────────────────────────────────┤
//! │  CdpClient  (client.rs)  squelch + page size     │
//! │  └── RestClient ← CdpHttpClient                  │
//! │       retry / backoff / status mapping           │
//! │       └── HttpSend ← ReqwestSender               │
//! ├──────────────────────────────────────────────────┤
//! │  Ed25519Signer  (signing.rs)                     │
//! │  └── x-altus-date / x-altus-auth                 │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod config;
pub mod signing;
pub mod client;
pub mod pagination;
pub mod states;
pub mod waiter;

// Resource clients
pub mod environments;
pub mod datalake;
pub mod datahub;
pub mod df;
pub mod ml;
pub mod iam;
pub mod consumption;

pub mod service;

pub use client::{CdpClient, CdpHttpClient, HttpSend, RawResponse, RestClient, Squelch};
pub use config::{CdpCredentials, CdpRegion, ClientConfig, ConnectionOptions, ResolvedConfig};
pub use error::{CdpError, CdpResult};
pub use pagination::Paginator;
pub use service::{CdpService, CdpSession, CdpSessions, CdpSessionsState};
pub use signing::{Ed25519Signer, SignedRequest};
pub use states::StateSet;
pub use waiter::{wait_for_state, WaitOptions, WaitTarget};
