//! CDP `ed25519v1` request signing.
//!
//! Every control-plane request carries two computed headers:
//!
//! * `x-altus-date`: the request time as an RFC 2822 date in GMT.
//! * `x-altus-auth`: `base64url(auth params JSON) + "." + base64url(signature)`.
//!
//! The signature is an Ed25519 signature over a five-line canonical string:
//!
//! ```text
//! METHOD
//! <content-type or empty>
//! <x-altus-date or empty>
//! <path[?query]>
//! ed25519v1
//! ```
//!
//! Ed25519 is deterministic, so the same canonical string and key always
//! produce the same header.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::CdpCredentials;
use crate::error::{CdpError, CdpResult};

/// The only auth method CDP accepts for API keys.
pub const AUTH_METHOD: &str = "ed25519v1";

pub const ALTUS_DATE_HEADER: &str = "x-altus-date";
pub const ALTUS_AUTH_HEADER: &str = "x-altus-auth";

/// Length of a base64-encoded 32-byte Ed25519 seed.
const ENCODED_KEY_LEN: usize = 44;

/// A request with its signing headers attached.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub method: String,
    /// Full URL including query string.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// Ed25519 signer bound to one access key.
#[derive(Clone)]
pub struct Ed25519Signer {
    access_key_id: String,
    signing_key: SigningKey,
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl Ed25519Signer {
    /// Validate and decode `private_key`.
    ///
    /// The length check runs before any decoding so a key of the wrong type
    /// never reaches the base64 or Ed25519 code.
    pub fn new(access_key_id: &str, private_key: &str) -> CdpResult<Self> {
        if private_key.len() != ENCODED_KEY_LEN {
            return Err(CdpError::credential("Only ed25519v1 keys are supported!"));
        }

        let seed = STANDARD
            .decode(private_key)
            .or_else(|_| URL_SAFE.decode(private_key))
            .map_err(|_| CdpError::credential("Not an Ed25519 private key!"))?;
        let seed: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| CdpError::credential("Not an Ed25519 private key!"))?;

        Ok(Self {
            access_key_id: access_key_id.to_string(),
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_credentials(credentials: &CdpCredentials) -> CdpResult<Self> {
        Self::new(&credentials.access_key_id, &credentials.private_key)
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Compute the `x-altus-auth` value for a request.
    ///
    /// `headers` must already contain `x-altus-date` if the request is to
    /// carry one; lookup is case-insensitive.
    pub fn signature_header(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> CdpResult<String> {
        let canonical = canonical_string(method, url, headers);
        let signature = self.signing_key.sign(canonical.as_bytes());
        let encoded_signature = URL_SAFE.encode(signature.to_bytes());

        let auth_params = format!(
            "{{\"access_key_id\": {}, \"auth_method\": \"{}\"}}",
            serde_json::to_string(&self.access_key_id)?,
            AUTH_METHOD
        );
        let encoded_params = URL_SAFE.encode(auth_params.as_bytes());

        Ok(format!(
            "{}.{}",
            encoded_params.trim(),
            encoded_signature.trim()
        ))
    }

    /// Stamp `x-altus-date` for `timestamp` and sign.
    pub fn sign_request(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> CdpResult<SignedRequest> {
        let mut signed_headers = headers.clone();
        signed_headers.insert(ALTUS_DATE_HEADER.to_string(), altus_date(timestamp));

        let auth = self.signature_header(method, url, &signed_headers)?;
        signed_headers.insert(ALTUS_AUTH_HEADER.to_string(), auth);

        Ok(SignedRequest {
            method: method.to_uppercase(),
            url: url.to_string(),
            headers: signed_headers,
            body,
        })
    }
}

/// One-shot form of [`Ed25519Signer::signature_header`].
pub fn make_signature_header(
    method: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
    access_key: &str,
    private_key: &str,
) -> CdpResult<String> {
    Ed25519Signer::new(access_key, private_key)?.signature_header(method, url, headers)
}

/// Build the canonical string that is signed.
pub fn canonical_string(method: &str, url: &str, headers: &BTreeMap<String, String>) -> String {
    let content_type = header_value(headers, "content-type");
    let date = header_value(headers, ALTUS_DATE_HEADER);
    let path = path_and_query(url);

    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        content_type,
        date,
        path,
        AUTH_METHOD
    )
}

/// `x-altus-date` format: `Mon, 01 Jan 2024 00:00:00 GMT`.
pub fn altus_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn header_value(headers: &BTreeMap<String, String>, name: &str) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim().to_string())
        .unwrap_or_default()
}

/// The path of `url` (or `/`), with `?query` appended when present.
fn path_and_query(url: &str) -> String {
    let (path, query) = match url::Url::parse(url) {
        Ok(parsed) => (parsed.path().to_string(), parsed.query().map(str::to_string)),
        Err(_) => match url.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (url.to_string(), None),
        },
    };

    let mut out = if path.is_empty() { "/".to_string() } else { path };
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(&q);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ed25519_dalek::{Signature, Verifier};

    fn test_key() -> String {
        STANDARD.encode([7u8; 32])
    }

    fn test_headers() -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), " application/json ".to_string());
        headers.insert(
            "x-altus-date".to_string(),
            "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
        );
        headers
    }

    #[test]
    fn canonical_string_plain_path() {
        let s = canonical_string("post", "https://h/api/v1/test", &test_headers());
        assert_eq!(
            s,
            "POST\napplication/json\nMon, 01 Jan 2024 00:00:00 GMT\n/api/v1/test\ned25519v1"
        );
    }

    #[test]
    fn canonical_string_keeps_query() {
        let s = canonical_string("GET", "https://h/api/v1/test?a=1&b=2", &test_headers());
        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[3], "/api/v1/test?a=1&b=2");
    }

    #[test]
    fn canonical_string_defaults() {
        let s = canonical_string("GET", "https://h", &BTreeMap::new());
        assert_eq!(s, "GET\n\n\n/\ned25519v1");
    }

    #[test]
    fn altus_date_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(altus_date(ts), "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn signature_is_deterministic() {
        let key = test_key();
        let a = make_signature_header("POST", "https://h/x", &test_headers(), "AK", &key).unwrap();
        let b = make_signature_header("POST", "https://h/x", &test_headers(), "AK", &key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signature_header_shape_and_validity() {
        let key = test_key();
        let signer = Ed25519Signer::new("test-access-key", &key).unwrap();
        let header = signer
            .signature_header("POST", "https://h/api/v1/test", &test_headers())
            .unwrap();

        let (params, sig) = header.split_once('.').unwrap();
        let params = URL_SAFE.decode(params).unwrap();
        assert_eq!(
            String::from_utf8(params).unwrap(),
            r#"{"access_key_id": "test-access-key", "auth_method": "ed25519v1"}"#
        );

        let sig: [u8; 64] = URL_SAFE.decode(sig).unwrap().try_into().unwrap();
        let canonical = canonical_string("POST", "https://h/api/v1/test", &test_headers());
        let verifying = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        assert!(verifying
            .verify(canonical.as_bytes(), &Signature::from_bytes(&sig))
            .is_ok());
    }

    #[test]
    fn signature_keeps_base64_padding() {
        let header =
            make_signature_header("POST", "https://h/x", &test_headers(), "AK", &test_key())
                .unwrap();
        let (_, sig) = header.split_once('.').unwrap();
        // 64 bytes encode to 86 chars plus two padding characters.
        assert_eq!(sig.len(), 88);
        assert!(sig.ends_with("=="));
        assert!(!sig[..86].contains('='));
    }

    #[test]
    fn different_paths_sign_differently() {
        let key = test_key();
        let a = make_signature_header("GET", "https://h/a", &test_headers(), "AK", &key).unwrap();
        let b = make_signature_header("GET", "https://h/b", &test_headers(), "AK", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_wrong_length_keys() {
        let keys = vec![String::new(), "short".to_string(), "a".repeat(43), "a".repeat(45)];
        for key in keys {
            let err = Ed25519Signer::new("AK", &key).unwrap_err();
            assert_eq!(err.to_string(), "Only ed25519v1 keys are supported!");
        }
    }

    #[test]
    fn rejects_undecodable_key() {
        // 44 characters, but not valid base64 for a 32-byte seed.
        let key = "!".repeat(44);
        let err = Ed25519Signer::new("AK", &key).unwrap_err();
        assert_eq!(err.to_string(), "Not an Ed25519 private key!");

        let key = "A".repeat(44);
        let err = Ed25519Signer::new("AK", &key).unwrap_err();
        assert_eq!(err.to_string(), "Not an Ed25519 private key!");
    }

    #[test]
    fn sign_request_adds_headers() {
        let signer = Ed25519Signer::new("AK", &test_key()).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let req = signer
            .sign_request("get", "https://h/api/v1/x", &headers, None, ts)
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.headers[ALTUS_DATE_HEADER], "Mon, 01 Jan 2024 00:00:00 GMT");
        assert!(req.headers[ALTUS_AUTH_HEADER].contains('.'));
        assert!(req.body.is_none());
    }

    #[test]
    fn debug_hides_key_material() {
        let signer = Ed25519Signer::new("AK", &test_key()).unwrap();
        let out = format!("{:?}", signer);
        assert!(out.contains("AK"));
        assert!(!out.contains("signing_key"));
    }
}
