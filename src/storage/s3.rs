//! Minimal S3 GET-object client signed with AWS Signature Version 4.

use super::{BlobStore, StorageError};
use crate::config::{ConfigError, StorageConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty body every GET carries.
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const SERVICE: &str = "s3";

#[derive(Clone)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct S3Store {
    http: Client,
    bucket: String,
    region: String,
    endpoint: Option<Url>,
    credentials: Option<Credentials>,
}

/// Where a key lives: full URL, `Host` header value, canonical URI path.
struct Target {
    url: Url,
    host: String,
    path: String,
}

impl S3Store {
    pub fn from_config(config: &StorageConfig, http: Client) -> Result<Self, ConfigError> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ConfigError::Invalid("S3 bucket name is required".into()))?;
        let endpoint = config
            .endpoint
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| ConfigError::Invalid(format!("S3 endpoint: {e}")))?;
        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
                session_token: config.session_token.clone(),
            }),
            (None, None) => {
                tracing::warn!("no AWS credentials configured, S3 requests will be unsigned");
                None
            }
            _ => {
                return Err(ConfigError::MissingKey(
                    "both AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set".into(),
                ))
            }
        };

        Ok(Self {
            http,
            bucket,
            region: config.region.clone(),
            endpoint,
            credentials,
        })
    }

    fn target(&self, key: &str) -> Result<Target, StorageError> {
        let encoded = encode_key(key).ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let (base, path) = match &self.endpoint {
            Some(endpoint) => {
                let base = endpoint.as_str().trim_end_matches('/').to_string();
                (base, format!("/{}/{}", self.bucket, encoded))
            }
            None => (
                format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{encoded}"),
            ),
        };
        let url = Url::parse(&format!("{base}{path}"))
            .map_err(|_| StorageError::NotFound(key.to_string()))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(StorageError::NotFound(key.to_string())),
        };
        Ok(Target { url, host, path })
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.target(key)?;
        let amz_date = format_amz_date(Utc::now());

        let mut headers = vec![
            ("host".to_string(), target.host.clone()),
            (
                "x-amz-content-sha256".to_string(),
                EMPTY_PAYLOAD_SHA256.to_string(),
            ),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = self.credentials.as_ref().and_then(|c| c.session_token.clone()) {
            headers.push(("x-amz-security-token".to_string(), token));
        }

        let mut req = self.http.get(target.url.clone());
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(creds) = &self.credentials {
            let auth = authorization(
                creds,
                &self.region,
                &SignedRequest {
                    method: "GET",
                    path: &target.path,
                    headers: &headers,
                    amz_date: &amz_date,
                    payload_hash: EMPTY_PAYLOAD_SHA256,
                },
            );
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }

        tracing::debug!(bucket = %self.bucket, key, "fetching object");
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.bytes().await?.to_vec());
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.contains("<Code>NoSuchKey</Code>") {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Err(StorageError::Backend {
            status: status.as_u16(),
            message: body,
        })
    }
}

struct SignedRequest<'a> {
    method: &'a str,
    path: &'a str,
    /// Lowercase names, sorted by name.
    headers: &'a [(String, String)],
    amz_date: &'a str,
    payload_hash: &'a str,
}

fn authorization(creds: &Credentials, region: &str, request: &SignedRequest<'_>) -> String {
    let date = &request.amz_date[..8];
    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");

    let signed_headers = request
        .headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = request
        .headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method, request.path, canonical_headers, signed_headers, request.payload_hash
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        request.amz_date,
        scope,
        hex(&Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(
        format!("AWS4{}", creds.secret_access_key).as_bytes(),
        date,
    );
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, SERVICE);
    let k_signing = hmac(&k_service, "aws4_request");
    let signature = hex(&hmac(&k_signing, &string_to_sign));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
        creds.access_key_id
    )
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    // new_from_slice only rejects lengths for fixed-key MACs.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn format_amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// URI-encode each path segment, keeping the `/` separators. Keys with
/// empty, `.` or `..` segments are refused: URL normalization would drop
/// them after signing and the request would name another object.
fn encode_key(key: &str) -> Option<String> {
    let segments: Vec<&str> = key.trim_start_matches('/').split('/').collect();
    if segments
        .iter()
        .any(|segment| matches!(*segment, "" | "." | ".."))
    {
        return None;
    }
    Some(
        segments
            .iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/"),
    )
}
