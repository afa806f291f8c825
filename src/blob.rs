//! Blob store clients for the shared index artifacts.
//!
//! The vector store needs exactly two operations from remote storage:
//! an existence check and a whole-object download. [`BlobStore`] captures
//! that, with two implementations:
//!
//! - **[`S3BlobStore`]**: the S3 REST API (`HEAD`/`GET` object) signed
//!   with AWS Signature V4. A custom `endpoint_url` switches to path-style
//!   addressing for S3-compatible services (MinIO, LocalStack).
//! - **[`DirBlobStore`]**: a local directory, for development and tests.
//!
//! # Configuration
//!
//! ```toml
//! [blob]
//! kind = "s3"
//! bucket = "agency-knowledge"
//! prefix = "index/v3/"
//! region = "eu-west-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! Credentials are read from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! and optionally `AWS_SESSION_TOKEN`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::BlobConfig;
use crate::error::BlobError;

/// Named binary objects in remote storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable location, for logs (e.g. `s3://bucket/prefix/`).
    fn describe(&self) -> String;

    /// Whether an object named `name` exists.
    async fn exists(&self, name: &str) -> Result<bool, BlobError>;

    /// Download the whole object. Missing objects are [`BlobError::NotFound`].
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, BlobError>;
}

/// Build the blob store selected by `[blob].kind`.
///
/// Returns `Ok(None)` for `"disabled"`; the vector store then records a
/// sticky availability error on first initialization.
pub fn create_blob_store(config: &BlobConfig) -> Result<Option<Arc<dyn BlobStore>>, BlobError> {
    match config.kind.as_str() {
        "s3" => Ok(Some(Arc::new(S3BlobStore::from_config(config)?))),
        "dir" => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| BlobError::Http("blob.root is required for kind 'dir'".into()))?;
            Ok(Some(Arc::new(DirBlobStore::new(root))))
        }
        _ => Ok(None),
    }
}

// ============ Directory store ============

/// Serves blobs from files in a local directory.
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    fn describe(&self) -> String {
        format!("dir://{}", self.root.display())
    }

    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        Ok(tokio::fs::metadata(self.root.join(name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.root.join(name);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(name.to_string())
            } else {
                BlobError::Io {
                    source: e,
                    context: format!("Failed to read {}", path.display()),
                }
            }
        })
    }
}

// ============ S3 store ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, BlobError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            BlobError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            BlobError::Credentials("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// S3 (or S3-compatible) bucket client.
pub struct S3BlobStore {
    bucket: String,
    prefix: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    /// Create a client from `[blob]` config and environment credentials.
    pub fn from_config(config: &BlobConfig) -> Result<Self, BlobError> {
        Ok(Self {
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
        })
    }

    fn object_key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), name)
        }
    }

    /// `(scheme, host, canonical_uri)` for an object key.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match self.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (
                    scheme.to_string(),
                    host,
                    format!("/{}/{}", uri_encode(&self.bucket), encoded_key),
                )
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", encoded_key),
            ),
        }
    }

    /// Build a SigV4-signed request for `method` on object `name`.
    fn signed_request(&self, method: reqwest::Method, name: &str) -> reqwest::RequestBuilder {
        let key = self.object_key(name);
        let (scheme, host, canonical_uri) = self.locate(&key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
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
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
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

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        req
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        let resp = self
            .signed_request(reqwest::Method::HEAD, name)
            .send()
            .await
            .map_err(|e| BlobError::Http(format!("HEAD {}: {}", name, e)))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(BlobError::Http(format!(
                "S3 HeadObject failed (HTTP {}) for '{}'",
                status, name
            ))),
        }
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        let resp = self
            .signed_request(reqwest::Method::GET, name)
            .send()
            .await
            .map_err(|e| BlobError::Http(format!("GET {}: {}", name, e)))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(BlobError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BlobError::Http(format!(
                "S3 GetObject failed (HTTP {}) for '{}': {}",
                status,
                name,
                body.chars().take(500).collect::<String>()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BlobError::Http(format!("reading body of {}: {}", name, e)))?;
        Ok(bytes.to_vec())
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

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` bare.
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn uri_encode_reserved() {
        assert_eq!(uri_encode("a b/c+d"), "a%20b%2Fc%2Bd");
        assert_eq!(uri_encode("knowledge.index"), "knowledge.index");
    }

    #[test]
    fn signing_key_matches_aws_example() {
        // From the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[tokio::test]
    async fn dir_store_exists_and_fetch() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("knowledge.index"), b"abc").unwrap();
        let store = DirBlobStore::new(tmp.path().to_path_buf());

        assert!(store.exists("knowledge.index").await.unwrap());
        assert!(!store.exists("missing.bin").await.unwrap());
        assert_eq!(store.fetch("knowledge.index").await.unwrap(), b"abc");
        assert!(matches!(
            store.fetch("missing.bin").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[test]
    fn disabled_kind_yields_none() {
        let store = create_blob_store(&BlobConfig::default()).unwrap();
        assert!(store.is_none());
    }
}
