//! Amazon S3 backend.
//!
//! Puts, downloads and deletes objects through the S3 REST API with AWS
//! Signature V4 authentication, and creates the bucket on demand
//! ([`S3Backend::ensure_bucket`]). Custom endpoints (MinIO, LocalStack) are
//! addressed path-style (`<endpoint>/<bucket>/<key>`, keeping any path prefix
//! of the endpoint); AWS itself is addressed virtual-host style
//! (`<bucket>.s3.<region>.amazonaws.com/<key>`).
//!
//! Signing uses only pure-Rust dependencies (`hmac`, `sha2`).
//!
//! # Credentials
//!
//! `s3.access_key` / `s3.secret_key` from the config file, falling back to
//! the environment:
//! - `AWS_ACCESS_KEY_ID`
//! - `AWS_SECRET_ACCESS_KEY`
//! - `AWS_SESSION_TOKEN` — optional

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use tracing::info;

use super::ObjectBackend;
use crate::config::S3Config;
use crate::error::StorageError;

type HmacSha256 = Hmac<Sha256>;

/// Characters of an S3 error body kept in [`StorageError::Status`].
const ERROR_BODY_CHARS: usize = 500;

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn resolve(config: &S3Config) -> Result<Self, StorageError> {
        let access_key_id = match &config.access_key {
            Some(key) => key.clone(),
            None => std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
                StorageError::Config("AWS_ACCESS_KEY_ID environment variable not set".into())
            })?,
        };
        let secret_access_key = match &config.secret_key {
            Some(key) => key.clone(),
            None => std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
                StorageError::Config("AWS_SECRET_ACCESS_KEY environment variable not set".into())
            })?,
        };
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Where a request goes and how it is signed.
#[derive(Debug, PartialEq)]
struct ObjectAddress {
    url: String,
    host: String,
    canonical_uri: String,
}

/// A custom endpoint split into what is signed as `host` and the path every
/// request URI starts with.
#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    origin: String,
    host: String,
    path_prefix: String,
}

impl Endpoint {
    fn parse(endpoint_url: &str) -> Result<Self, StorageError> {
        let url = reqwest::Url::parse(endpoint_url).map_err(|e| {
            StorageError::Config(format!("invalid s3.endpoint_url '{}': {}", endpoint_url, e))
        })?;
        let host_name = url.host_str().ok_or_else(|| {
            StorageError::Config(format!("s3.endpoint_url '{}' has no host", endpoint_url))
        })?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host_name, port),
            None => host_name.to_string(),
        };
        Ok(Self {
            origin: format!("{}://{}", url.scheme(), host),
            host,
            path_prefix: url.path().trim_end_matches('/').to_string(),
        })
    }
}

pub struct S3Backend {
    bucket: String,
    region: String,
    endpoint: Option<Endpoint>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Backend {
    pub fn from_config(config: &S3Config) -> Result<Self, StorageError> {
        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint_url.as_deref().map(Endpoint::parse).transpose()?,
            creds: AwsCredentials::resolve(config)?,
            client: reqwest::Client::new(),
        })
    }

    /// Create the bucket unless it already exists. Returns `true` if it was
    /// created.
    pub async fn ensure_bucket(&self) -> Result<bool, StorageError> {
        let label = self.location();
        let address = self.bucket_address();

        let resp = self.send(Method::HEAD, &label, &address, Vec::new(), None).await?;
        if resp.status().is_success() {
            info!("Bucket {} already exists", self.bucket);
            return Ok(false);
        }
        if resp.status() != StatusCode::NOT_FOUND {
            return Err(status_error(Method::HEAD, &label, resp).await);
        }

        let body = self.create_bucket_body().into_bytes();
        let resp = self.send(Method::PUT, &label, &address, body, None).await?;
        if !resp.status().is_success() {
            return Err(status_error(Method::PUT, &label, resp).await);
        }
        info!("Bucket {} created", self.bucket);
        Ok(true)
    }

    /// AWS wants the region spelled out for buckets outside us-east-1;
    /// custom endpoints get an empty body.
    fn create_bucket_body(&self) -> String {
        if self.endpoint.is_some() || self.region == "us-east-1" {
            return String::new();
        }
        format!(
            "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
            self.region
        )
    }

    fn address(&self, key: &str) -> ObjectAddress {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        self.address_for(&encoded_key)
    }

    fn bucket_address(&self) -> ObjectAddress {
        self.address_for("")
    }

    /// Path-style under a custom endpoint, virtual-host style on AWS.
    /// `encoded_key` is empty for bucket-level requests.
    fn address_for(&self, encoded_key: &str) -> ObjectAddress {
        match &self.endpoint {
            Some(endpoint) => {
                let mut canonical_uri =
                    format!("{}/{}", endpoint.path_prefix, uri_encode(&self.bucket));
                if !encoded_key.is_empty() {
                    canonical_uri.push('/');
                    canonical_uri.push_str(encoded_key);
                }
                ObjectAddress {
                    url: format!("{}{}", endpoint.origin, canonical_uri),
                    host: endpoint.host.clone(),
                    canonical_uri,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{}", encoded_key);
                ObjectAddress {
                    url: format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
        }
    }

    /// Send a SigV4-signed request. `label` names the target in errors.
    async fn send(
        &self,
        method: Method,
        label: &str,
        address: &ObjectAddress,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, StorageError> {
        let payload_hash = hex_sha256(&body);
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let authorization = self.authorization(method.as_str(), address, &payload_hash, now);

        let mut req_builder = self
            .client
            .request(method, &address.url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }
        if let Some(content_type) = content_type {
            req_builder = req_builder.header("Content-Type", content_type);
        }
        if !body.is_empty() {
            req_builder = req_builder.body(body);
        }

        req_builder
            .send()
            .await
            .map_err(|source| StorageError::Request {
                key: label.to_string(),
                source,
            })
    }

    async fn send_object(
        &self,
        method: Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, StorageError> {
        let address = self.address(key);
        self.send(method, key, &address, body, content_type).await
    }

    fn authorization(
        &self,
        method: &str,
        address: &ObjectAddress,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), address.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, address.canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        )
    }
}

/// Only a GET answered with 404 means the object is missing; a 404 on any
/// other request (e.g. `NoSuchBucket` on PUT) is reported with its body.
async fn status_error(method: Method, key: &str, resp: reqwest::Response) -> StorageError {
    let status = resp.status();
    if method == Method::GET && status == StatusCode::NOT_FOUND {
        return StorageError::NotFound(key.to_string());
    }
    let body = resp.text().await.unwrap_or_default();
    StorageError::Status {
        key: key.to_string(),
        status,
        body: body.chars().take(ERROR_BODY_CHARS).collect(),
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let resp = self
            .send_object(Method::PUT, key, body, Some(content_type))
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(Method::PUT, key, resp).await);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self.send_object(Method::GET, key, Vec::new(), None).await?;
        if !resp.status().is_success() {
            return Err(status_error(Method::GET, key, resp).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|source| StorageError::Request {
                key: key.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let resp = self.send_object(Method::DELETE, key, Vec::new(), None).await?;
        if !resp.status().is_success() {
            return Err(status_error(Method::DELETE, key, resp).await);
        }
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a path segment per RFC 3986 (unreserved: `A-Z a-z 0-9 - _ . ~`).
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
