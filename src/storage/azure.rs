//! Azure Blob Storage backend (REST, no SDK).
//!
//! Requests authenticate with short-lived service SAS tokens signed by this
//! process, the same mechanism used for client URLs, so only one signing
//! routine exists. String-to-sign follows service version `2020-12-06`:
//!
//! ```text
//! sp \n st \n se \n /blob/{account}/{container}/{blob} \n si \n sip \n spr \n
//! sv \n sr \n snapshot \n ses \n rscc \n rscd \n rsce \n rscl \n rsct
//! ```

use super::{validate_blob_name, BlobMeta, BlobStore, SasPermissions, StorageError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const SERVICE_VERSION: &str = "2020-12-06";

/// Lifetime of tokens used for the store's own requests.
const REQUEST_TOKEN_MINUTES: i64 = 15;

/// Blob container reached through its REST endpoint.
pub struct AzureBlobStore {
    client: reqwest::Client,
    account: String,
    key: Vec<u8>,
    container: String,
    endpoint: String,
}

impl AzureBlobStore {
    /// `access_key` is the base64 account key from the portal.
    pub fn new(account: &str, access_key: &str, container: &str) -> Result<Self, StorageError> {
        if account.is_empty() || container.is_empty() {
            return Err(StorageError::Credentials(
                "account name and container are required".into(),
            ));
        }
        let key = STANDARD
            .decode(access_key.trim())
            .map_err(|e| StorageError::Credentials(format!("account key is not base64: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::Credentials(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            account: account.to_string(),
            key,
            container: container.to_string(),
            endpoint: format!("https://{account}.blob.core.windows.net"),
        })
    }

    /// Point at another endpoint, e.g. Azurite at `http://127.0.0.1:10000/devstoreaccount1`.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn protocol(&self) -> &'static str {
        if self.endpoint.starts_with("https://") {
            "https"
        } else {
            "https,http"
        }
    }

    fn request_url(&self, name: &str, permissions: SasPermissions) -> Result<String, StorageError> {
        let expires = Utc::now() + Duration::minutes(REQUEST_TOKEN_MINUTES);
        let token = self.sign(name, permissions, expires, None)?;
        Ok(format!("{}?{}", self.blob_url(name), token))
    }

    fn string_to_sign(
        &self,
        sp: &str,
        se: &str,
        name: &str,
        rscd: Option<&str>,
    ) -> String {
        let resource = format!("/blob/{}/{}/{}", self.account, self.container, name);
        [
            sp,
            "",
            se,
            &resource,
            "",
            "",
            self.protocol(),
            SERVICE_VERSION,
            "b",
            "",
            "",
            "",
            rscd.unwrap_or(""),
            "",
            "",
            "",
        ]
        .join("\n")
    }
}

fn request_err(name: &str, e: reqwest::Error) -> StorageError {
    StorageError::Request {
        name: name.to_string(),
        reason: if e.is_timeout() {
            "timed out".to_string()
        } else {
            e.to_string()
        },
    }
}

async fn http_err(name: &str, response: reqwest::Response) -> StorageError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return StorageError::NotFound {
            name: name.to_string(),
        };
    }
    let body = response.text().await.unwrap_or_default();
    StorageError::Http {
        name: name.to_string(),
        status: status.as_u16(),
        body: body.chars().take(300).collect(),
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn backend(&self) -> &'static str {
        "azure"
    }

    async fn put(&self, name: &str, bytes: Vec<u8>, meta: &BlobMeta) -> Result<(), StorageError> {
        let url = self.request_url(name, SasPermissions::WRITE)?;
        let len = bytes.len();
        let mut request = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", SERVICE_VERSION)
            .header("x-ms-blob-content-type", &meta.content_type)
            .header(reqwest::header::CONTENT_TYPE, &meta.content_type);
        if let Some(d) = &meta.content_disposition {
            request = request.header("x-ms-blob-content-disposition", d);
        }
        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_err(name, e))?;
        if !response.status().is_success() {
            return Err(http_err(name, response).await);
        }
        debug!("Uploaded {} ({} bytes) to container {}", name, len, self.container);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.request_url(name, SasPermissions::READ)?;
        let response = self
            .client
            .get(url)
            .header("x-ms-version", SERVICE_VERSION)
            .send()
            .await
            .map_err(|e| request_err(name, e))?;
        if !response.status().is_success() {
            return Err(http_err(name, response).await);
        }
        let bytes = response.bytes().await.map_err(|e| request_err(name, e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let url = self.request_url(name, SasPermissions::DELETE)?;
        let response = self
            .client
            .delete(url)
            .header("x-ms-version", SERVICE_VERSION)
            .send()
            .await
            .map_err(|e| request_err(name, e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(http_err(name, response).await)
    }

    fn blob_url(&self, name: &str) -> String {
        let base = format!("{}/{}", self.endpoint, self.container);
        match url::Url::parse(&base) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.extend(name.split('/'));
                }
                url.to_string()
            }
            Err(_) => format!("{base}/{name}"),
        }
    }

    fn sign(
        &self,
        name: &str,
        permissions: SasPermissions,
        expires_at: DateTime<Utc>,
        content_disposition: Option<&str>,
    ) -> Result<String, StorageError> {
        validate_blob_name(name)?;
        let sp = permissions.as_sp();
        let se = expires_at.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| StorageError::Credentials(format!("invalid account key: {e}")))?;
        mac.update(self.string_to_sign(&sp, &se, name, content_disposition).as_bytes());
        let sig = STANDARD.encode(mac.finalize().into_bytes());

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("sv", SERVICE_VERSION)
            .append_pair("spr", self.protocol())
            .append_pair("se", &se)
            .append_pair("sr", "b")
            .append_pair("sp", &sp);
        if let Some(d) = content_disposition {
            query.append_pair("rscd", d);
        }
        query.append_pair("sig", &sig);
        Ok(query.finish())
    }
}
