//! Filesystem blob backend.
//!
//! Blobs are plain files under `root`; content type and disposition go to a
//! JSON sidecar under `root/.meta/`. Tokens mimic a service SAS: the query
//! string carries `sp`, `se`, optional `rscd` and an HMAC-SHA256 `sig` over
//! those fields plus the blob name. The HTTP layer calls [`LocalBlobStore::verify`]
//! before serving a file.

use super::{validate_blob_name, BlobMeta, BlobStore, SasPermissions, StorageError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const META_DIR: &str = ".meta";

/// Blob store rooted at a local directory.
pub struct LocalBlobStore {
    root: PathBuf,
    signing_key: Vec<u8>,
    public_base_url: String,
}

/// What a verified token allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAccess {
    pub permissions: SasPermissions,
    pub content_disposition: Option<String>,
}

impl LocalBlobStore {
    pub fn new(
        root: impl AsRef<Path>,
        signing_key: Vec<u8>,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        if signing_key.is_empty() {
            return Err(StorageError::Credentials(
                "local blob signing key is empty".into(),
            ));
        }
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(META_DIR)).map_err(|e| StorageError::Io {
            name: root.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            root,
            signing_key,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_blob_name(name)?;
        if name == META_DIR || name.starts_with(".meta/") {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }

    fn meta_path_for(&self, name: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{name}.json"))
    }

    /// Read a blob together with its stored properties.
    pub async fn read_with_meta(&self, name: &str) -> Result<(Vec<u8>, BlobMeta), StorageError> {
        let bytes = self.get(name).await?;
        let meta = match tokio::fs::read(self.meta_path_for(name)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|_| BlobMeta::pdf()),
            Err(_) => guess_meta(name),
        };
        Ok((bytes, meta))
    }

    /// Check a token produced by [`BlobStore::sign`] for `name`.
    pub fn verify(
        &self,
        name: &str,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedAccess, StorageError> {
        let mut sp = None;
        let mut se = None;
        let mut rscd = None;
        let mut sig = None;
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            match k.as_ref() {
                "sp" => sp = Some(v.into_owned()),
                "se" => se = Some(v.into_owned()),
                "rscd" => rscd = Some(v.into_owned()),
                "sig" => sig = Some(v.into_owned()),
                _ => {}
            }
        }
        let (sp, se, sig) = match (sp, se, sig) {
            (Some(sp), Some(se), Some(sig)) => (sp, se, sig),
            _ => return Err(StorageError::InvalidSignature("missing sp, se or sig".into())),
        };

        let expiry = DateTime::parse_from_rfc3339(&se)
            .map_err(|e| StorageError::InvalidSignature(format!("bad expiry: {e}")))?
            .with_timezone(&Utc);
        if expiry <= now {
            return Err(StorageError::InvalidSignature("token expired".into()));
        }

        let provided = STANDARD
            .decode(sig.as_bytes())
            .map_err(|e| StorageError::InvalidSignature(format!("bad signature encoding: {e}")))?;
        let mut mac = self.mac()?;
        mac.update(string_to_sign(&sp, &se, name, rscd.as_deref()).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature("signature mismatch".into()))?;

        Ok(VerifiedAccess {
            permissions: SasPermissions::from_sp(&sp),
            content_disposition: rscd,
        })
    }

    fn mac(&self) -> Result<HmacSha256, StorageError> {
        HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::Credentials(format!("invalid signing key: {e}")))
    }
}

fn string_to_sign(sp: &str, se: &str, name: &str, rscd: Option<&str>) -> String {
    format!("{sp}\n{se}\n/{name}\n{}", rscd.unwrap_or(""))
}

fn guess_meta(name: &str) -> BlobMeta {
    if name.ends_with(".png") {
        BlobMeta::png()
    } else {
        BlobMeta::pdf()
    }
}

fn io_err(name: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                name: name.to_string(),
            }
        } else {
            StorageError::Io {
                name: name.to_string(),
                source: e,
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn put(&self, name: &str, bytes: Vec<u8>, meta: &BlobMeta) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        let meta_path = self.meta_path_for(name);
        for dir in [path.parent(), meta_path.parent()].into_iter().flatten() {
            tokio::fs::create_dir_all(dir).await.map_err(io_err(name))?;
        }

        // Write-then-rename so readers never see a partial file.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err(name))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(name))?;

        let raw = serde_json::to_vec(meta).map_err(|e| StorageError::Request {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&meta_path, raw).await.map_err(io_err(name))?;

        debug!("Stored {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(name)?;
        tokio::fs::read(&path).await.map_err(io_err(name))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        for p in [path, self.meta_path_for(name)] {
            match tokio::fs::remove_file(&p).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::Io {
                        name: name.to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok(())
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}/blobs/{}", self.public_base_url, name)
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

        let mut mac = self.mac()?;
        mac.update(string_to_sign(&sp, &se, name, content_disposition).as_bytes());
        let sig = STANDARD.encode(mac.finalize().into_bytes());

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("sp", &sp).append_pair("se", &se);
        if let Some(d) = content_disposition {
            query.append_pair("rscd", d);
        }
        query.append_pair("sig", &sig);
        Ok(query.finish())
    }
}
