//! Deck → PDF conversion through a headless office suite.
//!
//! LibreOffice is the only dependable converter for `.pptx`/`.ppt`/`.odp`,
//! and it is temperamental: a crashed instance leaves a locked user profile
//! behind, some builds reject the bare `pdf` filter for Impress documents,
//! and a malformed deck can hang forever. Each conversion therefore:
//!
//! 1. waits for a permit from a fixed-size pool (`max_concurrent_conversions`),
//! 2. tries a list of command variants in order until one produces a PDF,
//! 3. bounds every attempt with a timeout, killing the child when it fires.
//!
//! | # | Profile              | Filter                    |
//! |---|----------------------|---------------------------|
//! | 1 | isolated (temp dir)  | `pdf`                     |
//! | 2 | isolated (temp dir)  | `pdf:impress_pdf_Export`  |
//! | 3 | default              | `pdf`                     |

use crate::config::ServiceConfig;
use crate::error::SlidePullError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Turns a presentation file into a PDF.
#[async_trait]
pub trait DeckConverter: Send + Sync {
    /// Convert `input` and return the path of the PDF written into `out_dir`.
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, SlidePullError>;
}

/// [`DeckConverter`] backed by the `soffice` binary.
pub struct OfficeConverter {
    soffice: PathBuf,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

struct CommandVariant {
    label: &'static str,
    args: Vec<OsString>,
}

enum AttemptError {
    NotFound,
    Timeout,
    Failed(String),
}

impl OfficeConverter {
    pub fn new(soffice: impl Into<PathBuf>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            soffice: soffice.into(),
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.soffice_path.clone(),
            Duration::from_secs(config.conversion_timeout_secs),
            config.max_concurrent_conversions,
        )
    }

    fn variants(&self, input: &Path, out_dir: &Path, profile_dir: &Path) -> Vec<CommandVariant> {
        let profile_url = url::Url::from_directory_path(profile_dir)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", profile_dir.display()));
        let isolated = OsString::from(format!("-env:UserInstallation={profile_url}"));

        let build = |profile: Option<&OsString>, filter: &str| {
            let mut args: Vec<OsString> = Vec::with_capacity(10);
            if let Some(p) = profile {
                args.push(p.clone());
            }
            for a in ["--headless", "--norestore", "--nolockcheck", "--convert-to", filter, "--outdir"] {
                args.push(a.into());
            }
            args.push(out_dir.as_os_str().to_os_string());
            args.push(input.as_os_str().to_os_string());
            args
        };

        vec![
            CommandVariant {
                label: "isolated profile, pdf",
                args: build(Some(&isolated), "pdf"),
            },
            CommandVariant {
                label: "isolated profile, impress_pdf_Export",
                args: build(Some(&isolated), "pdf:impress_pdf_Export"),
            },
            CommandVariant {
                label: "default profile, pdf",
                args: build(None, "pdf"),
            },
        ]
    }

    async fn run(&self, variant: &CommandVariant) -> Result<(), AttemptError> {
        let child = Command::new(&self.soffice)
            .args(&variant.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AttemptError::NotFound
                } else {
                    AttemptError::Failed(format!("spawn failed: {e}"))
                }
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => return Err(AttemptError::Timeout),
            Ok(Err(e)) => return Err(AttemptError::Failed(format!("wait failed: {e}"))),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.trim().chars().rev().take(400).collect::<Vec<_>>().into_iter().rev().collect();
        Err(AttemptError::Failed(format!("exited with {}: {}", output.status, tail)))
    }
}

/// The output must exist, be non-empty and start with `%PDF`.
async fn verify_pdf(path: &Path) -> Result<(), String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("no PDF produced at {}: {e}", path.display()))?;
    let mut header = [0u8; 4];
    match file.read_exact(&mut header).await {
        Ok(_) if &header == b"%PDF" => Ok(()),
        _ => Err(format!("output {} is not a PDF", path.display())),
    }
}

#[async_trait]
impl DeckConverter for OfficeConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, SlidePullError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SlidePullError::Internal("conversion pool closed".into()))?;

        let stem = input
            .file_stem()
            .ok_or_else(|| SlidePullError::Internal(format!("input has no file name: {}", input.display())))?;
        // soffice keeps every dot of the stem: `q3.v2.pptx` -> `q3.v2.pdf`.
        let expected = out_dir.join(format!("{}.pdf", stem.to_string_lossy()));
        let profile = tempfile::tempdir()
            .map_err(|e| SlidePullError::Internal(format!("profile tempdir: {e}")))?;

        let variants = self.variants(input, out_dir, profile.path());
        let mut last_error = String::new();
        let mut timeouts = 0;
        let start = Instant::now();

        for (i, variant) in variants.iter().enumerate() {
            let _ = tokio::fs::remove_file(&expected).await;
            debug!("Conversion attempt {}/{} ({})", i + 1, variants.len(), variant.label);

            let outcome = match self.run(variant).await {
                Ok(()) => verify_pdf(&expected).await,
                Err(AttemptError::NotFound) => {
                    return Err(SlidePullError::OfficeNotFound {
                        path: self.soffice.clone(),
                    })
                }
                Err(AttemptError::Timeout) => {
                    timeouts += 1;
                    Err(format!("timed out after {}s", self.timeout.as_secs_f32()))
                }
                Err(AttemptError::Failed(msg)) => Err(msg),
            };

            match outcome {
                Ok(()) => {
                    info!(
                        "Converted {} to PDF in {}ms ({})",
                        input.display(),
                        start.elapsed().as_millis(),
                        variant.label
                    );
                    return Ok(expected);
                }
                Err(msg) => {
                    warn!("Conversion attempt {} ({}) failed: {}", i + 1, variant.label, msg);
                    last_error = msg;
                }
            }
        }

        if timeouts == variants.len() {
            return Err(SlidePullError::ConversionTimeout {
                secs: self.timeout.as_secs(),
            });
        }
        Err(SlidePullError::ConversionFailed {
            attempts: variants.len(),
            detail: last_error,
        })
    }
}
