//! CDP configuration, credential management, and region handling.
//!
//! Credentials come from explicit values, the `CDP_ACCESS_KEY_ID` /
//! `CDP_PRIVATE_KEY` environment variables, or a named profile in the
//! INI-style credentials file (`~/.cdp/credentials` by default).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CdpError, CdpResult};

pub const ENV_ACCESS_KEY_ID: &str = "CDP_ACCESS_KEY_ID";
pub const ENV_PRIVATE_KEY: &str = "CDP_PRIVATE_KEY";
pub const ENV_CREDENTIALS_PATH: &str = "CDP_CREDENTIALS_PATH";
pub const ENV_PROFILE: &str = "CDP_PROFILE";
pub const ENV_REGION: &str = "CDP_REGION";

pub const DEFAULT_CREDENTIALS_PATH: &str = "~/.cdp/credentials";
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_USER_AGENT: &str = "cloudera.cloud";
pub const DEFAULT_PAGE_SIZE: u32 = 100;

// ── Regions ─────────────────────────────────────────────────────────────

/// Control-plane regions.
pub const CDP_REGIONS: &[&str] = &["us-west-1", "eu-1", "ap-1"];

/// CDP control-plane region.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdpRegion {
    /// Region code (e.g., "us-west-1").
    pub name: String,
}

impl CdpRegion {
    /// Build a region, resolving the `default` alias to `us-west-1`.
    pub fn new(name: &str) -> Self {
        let name = match name.trim() {
            "" | "default" => "us-west-1",
            other => other,
        };
        Self {
            name: name.to_string(),
        }
    }

    /// Like [`CdpRegion::new`] but rejects unknown regions.
    pub fn parse(name: &str) -> CdpResult<Self> {
        let region = Self::new(name);
        if region.is_valid() {
            Ok(region)
        } else {
            Err(CdpError::config(format!(
                "Unknown CDP region '{}'; expected one of {}",
                name,
                CDP_REGIONS.join(", ")
            )))
        }
    }

    /// `https://api.{region}.cdp.cloudera.com`
    pub fn endpoint(&self) -> String {
        format!("https://api.{}.cdp.cloudera.com", self.name)
    }

    pub fn is_valid(&self) -> bool {
        CDP_REGIONS.contains(&self.name.as_str())
    }
}

impl Default for CdpRegion {
    fn default() -> Self {
        Self::new("us-west-1")
    }
}

// ── Credentials ─────────────────────────────────────────────────────────

/// An access key id and its base64-encoded Ed25519 private key.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdpCredentials {
    pub access_key_id: String,
    pub private_key: String,
}

impl CdpCredentials {
    pub fn new(access_key_id: &str, private_key: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            private_key: private_key.to_string(),
        }
    }
}

impl fmt::Debug for CdpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

// ── Credentials file ────────────────────────────────────────────────────

/// A named profile read from the credentials file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpProfile {
    pub name: String,
    pub credentials: CdpCredentials,
    /// `cdp_region`, defaulting to `us-west-1`.
    pub region: String,
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse INI text into `section -> (key -> value)`.
///
/// Keys are lower-cased. `#` and `;` start comment lines. Both `=` and `:`
/// separate keys from values. Keys outside any section are ignored.
pub fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some(section) = current.as_ref() else {
            continue;
        };
        let split_at = match (line.find('='), line.find(':')) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(idx) = split_at {
            let key = line[..idx].trim().to_lowercase();
            let value = line[idx + 1..].trim().to_string();
            if let Some(entries) = sections.get_mut(section) {
                entries.insert(key, value);
            }
        }
    }

    sections
}

/// Load one profile from a credentials file.
pub fn load_profile(path: &Path, profile: &str) -> CdpResult<CdpProfile> {
    if !path.is_file() {
        return Err(CdpError::credential(format!(
            "Credentials file '{}' does not exist",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        CdpError::credential(format!(
            "Unable to read credentials file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let sections = parse_ini(&content);
    let section = sections
        .get(profile)
        .ok_or_else(|| CdpError::credential(format!("CDP profile '{}' not found", profile)))?;

    let required = |key: &str| -> CdpResult<String> {
        section.get(key).cloned().ok_or_else(|| {
            CdpError::credential(format!("CDP profile '{}' is missing '{}'", profile, key))
        })
    };

    Ok(CdpProfile {
        name: profile.to_string(),
        credentials: CdpCredentials {
            access_key_id: required("cdp_access_key_id")?,
            private_key: required("cdp_private_key")?,
        },
        region: section
            .get("cdp_region")
            .cloned()
            .unwrap_or_else(|| CdpRegion::default().name),
    })
}

// ── Client configuration ────────────────────────────────────────────────

/// Behavioral settings for the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Base URL of the control plane.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub verify_tls: bool,
    /// Sent as `X-ProxyContextPath` when set.
    pub proxy_context_path: Option<String>,
    pub user_agent: String,
    pub default_page_size: u32,
    /// Total attempts per request, including the first.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: CdpRegion::default().endpoint(),
            timeout_secs: 60,
            verify_tls: true,
            proxy_context_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_retries: 3,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> CdpResult<()> {
        let parsed = url::Url::parse(&self.endpoint)
            .map_err(|e| CdpError::config(format!("invalid endpoint '{}': {}", self.endpoint, e)))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(CdpError::config(format!(
                "endpoint '{}' must use http or https",
                self.endpoint
            )));
        }
        if self.max_retries == 0 {
            return Err(CdpError::config("max_retries must be at least 1"));
        }
        if self.default_page_size == 0 {
            return Err(CdpError::config("default_page_size must be at least 1"));
        }
        Ok(())
    }
}

// ── Connection options ──────────────────────────────────────────────────

/// Explicit connection parameters. Anything left `None` falls back to the
/// environment, then to the credentials file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub credentials_path: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
    /// Overrides the region endpoint.
    pub endpoint: Option<String>,
    pub verify_tls: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub proxy_context_path: Option<String>,
    pub user_agent: Option<String>,
    pub default_page_size: Option<u32>,
    pub max_retries: Option<u32>,
}

/// Fully resolved credentials plus client settings.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: CdpCredentials,
    pub region: CdpRegion,
    pub client: ClientConfig,
}

impl ConnectionOptions {
    /// Resolve against the process environment.
    pub fn resolve(&self) -> CdpResult<ResolvedConfig> {
        self.resolve_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve using `env` as the environment lookup.
    pub fn resolve_with<F>(&self, env: F) -> CdpResult<ResolvedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access = self.access_key_id.clone().or_else(|| env(ENV_ACCESS_KEY_ID));
        let private = self.private_key.clone().or_else(|| env(ENV_PRIVATE_KEY));

        let mut profile_region = None;
        let credentials = match (access, private) {
            (Some(a), Some(p)) => CdpCredentials::new(&a, &p),
            (None, None) => {
                let path = self
                    .credentials_path
                    .clone()
                    .or_else(|| env(ENV_CREDENTIALS_PATH))
                    .unwrap_or_else(|| DEFAULT_CREDENTIALS_PATH.to_string());
                let profile_name = self
                    .profile
                    .clone()
                    .or_else(|| env(ENV_PROFILE))
                    .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
                let profile = load_profile(&expand_tilde(&path), &profile_name)?;
                log::debug!("Loaded CDP profile '{}' from {}", profile_name, path);
                profile_region = Some(profile.region);
                profile.credentials
            }
            _ => {
                return Err(CdpError::credential(
                    "Both an access key id and a private key are required",
                ))
            }
        };

        let region_name = self
            .region
            .clone()
            .or_else(|| env(ENV_REGION))
            .or(profile_region)
            .unwrap_or_else(|| CdpRegion::default().name);
        let region = CdpRegion::parse(&region_name)?;

        let defaults = ClientConfig::default();
        let client = ClientConfig {
            endpoint: self.endpoint.clone().unwrap_or_else(|| region.endpoint()),
            timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
            verify_tls: self.verify_tls.unwrap_or(defaults.verify_tls),
            proxy_context_path: self.proxy_context_path.clone(),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            default_page_size: self.default_page_size.unwrap_or(defaults.default_page_size),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
        };
        client.validate()?;

        Ok(ResolvedConfig {
            credentials,
            region,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = "MC4CAQAwBQYDK2VwBCIEIAAAAAAAAAAAAAAAAAAAAAA=";

    fn write_credentials(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn region_aliases_and_endpoint() {
        assert_eq!(CdpRegion::new("default").name, "us-west-1");
        assert_eq!(
            CdpRegion::new("eu-1").endpoint(),
            "https://api.eu-1.cdp.cloudera.com"
        );
        assert!(CdpRegion::parse("mars-1").is_err());
    }

    #[test]
    fn credentials_debug_redacts_private_key() {
        let creds = CdpCredentials::new("AK", "supersecret");
        let out = format!("{:?}", creds);
        assert!(out.contains("AK"));
        assert!(!out.contains("supersecret"));
    }

    #[test]
    fn parse_ini_sections_and_comments() {
        let ini = "# comment\n[default]\ncdp_access_key_id = abc\n; other\n[Dev]\nCDP_Region: eu-1\n";
        let parsed = parse_ini(ini);
        assert_eq!(parsed["default"]["cdp_access_key_id"], "abc");
        assert_eq!(parsed["Dev"]["cdp_region"], "eu-1");
    }

    #[test]
    fn load_profile_reads_keys_and_default_region() {
        let file = write_credentials(&format!(
            "[default]\ncdp_access_key_id = test-key\ncdp_private_key = {}\n",
            KEY
        ));
        let profile = load_profile(file.path(), "default").unwrap();
        assert_eq!(profile.credentials.access_key_id, "test-key");
        assert_eq!(profile.credentials.private_key, KEY);
        assert_eq!(profile.region, "us-west-1");
    }

    #[test]
    fn load_profile_reports_missing_file() {
        let err = load_profile(Path::new("/nonexistent/credentials"), "default").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn load_profile_reports_missing_profile() {
        let file = write_credentials("[default]\ncdp_access_key_id = a\ncdp_private_key = b\n");
        let err = load_profile(file.path(), "prod").unwrap_err();
        assert_eq!(err.to_string(), "CDP profile 'prod' not found");
    }

    #[test]
    fn load_profile_reports_missing_key() {
        let file = write_credentials("[default]\ncdp_access_key_id = a\n");
        let err = load_profile(file.path(), "default").unwrap_err();
        assert!(err.to_string().contains("missing 'cdp_private_key'"));
    }

    #[test]
    fn resolve_prefers_explicit_keys() {
        let opts = ConnectionOptions {
            access_key_id: Some("explicit".into()),
            private_key: Some(KEY.into()),
            ..Default::default()
        };
        let resolved = opts
            .resolve_with(|k| match k {
                ENV_ACCESS_KEY_ID => Some("env".into()),
                ENV_PRIVATE_KEY => Some("envkey".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(resolved.credentials.access_key_id, "explicit");
        assert_eq!(resolved.client.endpoint, "https://api.us-west-1.cdp.cloudera.com");
    }

    #[test]
    fn resolve_falls_back_to_profile_and_its_region() {
        let file = write_credentials(&format!(
            "[ops]\ncdp_access_key_id = ops-key\ncdp_private_key = {}\ncdp_region = ap-1\n",
            KEY
        ));
        let path = file.path().to_string_lossy().to_string();
        let resolved = ConnectionOptions::default()
            .resolve_with(|k| match k {
                ENV_CREDENTIALS_PATH => Some(path.clone()),
                ENV_PROFILE => Some("ops".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(resolved.credentials.access_key_id, "ops-key");
        assert_eq!(resolved.region.name, "ap-1");
        assert_eq!(resolved.client.endpoint, "https://api.ap-1.cdp.cloudera.com");
    }

    #[test]
    fn resolve_rejects_half_credentials() {
        let opts = ConnectionOptions {
            access_key_id: Some("only".into()),
            ..Default::default()
        };
        assert!(matches!(
            opts.resolve_with(no_env),
            Err(CdpError::Credential(_))
        ));
    }

    #[test]
    fn explicit_endpoint_overrides_region() {
        let opts = ConnectionOptions {
            access_key_id: Some("a".into()),
            private_key: Some(KEY.into()),
            region: Some("eu-1".into()),
            endpoint: Some("https://cdp.internal.example".into()),
            ..Default::default()
        };
        let resolved = opts.resolve_with(no_env).unwrap();
        assert_eq!(resolved.region.name, "eu-1");
        assert_eq!(resolved.client.endpoint, "https://cdp.internal.example");
    }

    #[test]
    fn client_config_defaults_and_validation() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.user_agent, "cloudera.cloud");
        assert!(config.validate().is_ok());

        let bad = ClientConfig {
            endpoint: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(CdpError::Config(_))));
    }
}
