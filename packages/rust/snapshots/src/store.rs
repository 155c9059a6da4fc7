//! Object storage access: an S3 bucket through the AWS SDK, or a local mirror
//! with the same key layout.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::RequestPayer;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use perpcheck_shared::{PerpcheckError, Result, SnapshotsConfig};

/// Region used when neither the config nor the AWS environment names one.
const DEFAULT_REGION: &str = "us-east-1";

// ---------------------------------------------------------------------------
// Store abstraction
// ---------------------------------------------------------------------------

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: u64,
}

/// An object available on the local filesystem for reading.
///
/// Downloaded copies are removed when this value is dropped.
#[derive(Debug)]
pub struct LocalObject {
    pub path: PathBuf,
    pub size_bytes: u64,
    temporary: bool,
}

impl Drop for LocalObject {
    fn drop(&mut self) {
        if self.temporary {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "could not remove downloaded file");
            }
        }
    }
}

/// Where snapshot files come from.
pub trait SnapshotStore {
    /// All objects whose key starts with `prefix`.
    fn list_keys(&self, prefix: &str) -> impl Future<Output = Result<Vec<ObjectEntry>>> + Send;

    /// Make the object at `key` readable from disk, downloading it into
    /// `scratch_dir` if needed.
    fn materialize(
        &self,
        key: &str,
        scratch_dir: &Path,
    ) -> impl Future<Output = Result<LocalObject>> + Send;
}

// ---------------------------------------------------------------------------
// S3 bucket
// ---------------------------------------------------------------------------

/// Signed S3 access to the snapshot bucket.
///
/// Requests carry `x-amz-request-payer: requester` when configured, so the
/// caller's AWS account pays for the transfer.
#[derive(Debug, Clone)]
pub struct S3Bucket {
    client: Client,
    bucket: String,
    request_payer: bool,
}

impl S3Bucket {
    /// Create a bucket client from the `[snapshots]` config with credentials
    /// and region from the standard AWS chain (env, profile, IMDS).
    pub async fn connect(config: &SnapshotsConfig) -> Self {
        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;
        Self::from_builder(aws_sdk_s3::config::Builder::from(&shared), config)
    }

    /// Create a bucket client with fixed credentials.
    pub fn with_credentials(config: &SnapshotsConfig, credentials: Credentials) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);
        Self::from_builder(builder, config)
    }

    fn from_builder(builder: aws_sdk_s3::config::Builder, config: &SnapshotsConfig) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build();
        let mut builder = builder
            .timeout_config(timeouts)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)));
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            request_payer: config.request_payer,
        }
    }

    fn request_payer(&self) -> Option<RequestPayer> {
        self.request_payer.then_some(RequestPayer::Requester)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<u64> {
        let location = self.location(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(|e| sdk_error(&location, e))?;

        let mut body = output.body;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PerpcheckError::io(dest, e))?;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| PerpcheckError::Network(format!("{location}: download interrupted: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| PerpcheckError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| PerpcheckError::io(dest, e))?;

        Ok(written)
    }
}

impl SnapshotStore for S3Bucket {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let location = self.location(prefix);
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_request_payer(self.request_payer())
            .into_paginator()
            .send();

        let mut entries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error(&location, e))?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                entries.push(ObjectEntry {
                    key: key.to_string(),
                    size_bytes: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                });
            }
        }

        debug!(prefix, objects = entries.len(), "bucket listing complete");
        Ok(entries)
    }

    async fn materialize(&self, key: &str, scratch_dir: &Path) -> Result<LocalObject> {
        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(|e| PerpcheckError::io(scratch_dir, e))?;
        let dest = scratch_dir.join(format!("perpcheck-{}.jsonl", Uuid::now_v7()));

        match self.download(key, &dest).await {
            Ok(size_bytes) => Ok(LocalObject {
                path: dest,
                size_bytes,
                temporary: true,
            }),
            Err(e) => {
                let _ = std::fs::remove_file(&dest);
                Err(e)
            }
        }
    }
}

/// HTTP failures keep their status; everything else is a network error.
fn sdk_error<E>(location: &str, err: SdkError<E>) -> PerpcheckError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(status) => PerpcheckError::Http {
            status,
            url: location.to_string(),
        },
        None => PerpcheckError::Network(format!("{location}: {}", DisplayErrorContext(&err))),
    }
}

// ---------------------------------------------------------------------------
// Local mirror
// ---------------------------------------------------------------------------

/// A directory laid out like the bucket (e.g. the result of a bucket sync).
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SnapshotStore for LocalMirror {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        // Prefixes are directory-shaped (`.../YYYY/MM/DD/`); list below the
        // deepest complete directory and filter on the full prefix.
        let dir_part = match prefix.rfind('/') {
            Some(i) => &prefix[..=i],
            None => "",
        };
        let mut entries = Vec::new();
        collect_files(&self.root, &self.root.join(dir_part), &mut entries)?;
        entries.retain(|e| e.key.starts_with(prefix));
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn materialize(&self, key: &str, _scratch_dir: &Path) -> Result<LocalObject> {
        let path = self.root.join(key);
        let meta = std::fs::metadata(&path).map_err(|e| PerpcheckError::io(&path, e))?;
        Ok(LocalObject {
            path,
            size_bytes: meta.len(),
            temporary: false,
        })
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<ObjectEntry>) -> Result<()> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(PerpcheckError::io(dir, e)),
    };

    for entry in read {
        let entry = entry.map_err(|e| PerpcheckError::io(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| PerpcheckError::io(&path, e))?;
        if meta.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(ObjectEntry {
                key,
                size_bytes: meta.len(),
            });
        }
    }
    Ok(())
}
