//! Partition fetcher for the public blockchain dataset on S3
//!
//! Fetching is idempotent: files already present locally are skipped, and
//! downloads land in a temporary sibling that is renamed into place only once
//! complete, so an interrupted download never leaves a truncated `.parquet`.

use crate::config::{S3Config, StorageConfig};
use crate::error::{IngestError, Result};
use crate::layout::{partition_dir, remote_prefix, DataKind};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use chainsync_common::PartitionDate;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

const PARQUET_SUFFIX: &str = ".snappy.parquet";

/// Files handled for one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: usize,
    pub skipped: usize,
    /// Listed but not downloaded because of dry run
    pub planned: usize,
    pub bytes: u64,
}

impl std::ops::AddAssign for FetchSummary {
    fn add_assign(&mut self, other: Self) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.planned += other.planned;
        self.bytes += other.bytes;
    }
}

/// Ensures a partition's files exist locally
#[async_trait]
pub trait PartitionFetcher: Send + Sync {
    async fn ensure_partition(&self, date: PartitionDate) -> Result<FetchSummary>;
}

/// Downloads from the anonymous public bucket
pub struct S3Fetcher {
    client: Client,
    bucket: String,
    prefix: String,
    out_dir: PathBuf,
    dry_run: bool,
}

impl S3Fetcher {
    pub async fn new(s3: &S3Config, storage: &StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .no_credentials()
            .region(Region::new(s3.region.clone()))
            .load()
            .await;

        info!(bucket = %s3.bucket, region = %s3.region, "S3 client initialized");

        Self {
            client: Client::new(&sdk_config),
            bucket: s3.bucket.clone(),
            prefix: s3.prefix.clone(),
            out_dir: storage.out_dir.clone(),
            dry_run: storage.dry_run,
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                IngestError::Download(format!(
                    "listing s3://{}/{}: {}",
                    self.bucket,
                    prefix,
                    DisplayErrorContext(e)
                ))
            })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(PARQUET_SUFFIX))
                    .map(str::to_string),
            );
        }
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, key: &str, target: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                IngestError::Download(format!(
                    "fetching s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(e)
                ))
            })?;

        let tmp = temp_path(target);
        let result = write_body(response.body, &tmp).await;
        match result {
            Ok(bytes) => {
                tokio::fs::rename(&tmp, target).await?;
                Ok(bytes)
            },
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            },
        }
    }

    #[instrument(skip(self))]
    async fn fetch_kind(&self, kind: DataKind, date: PartitionDate) -> Result<FetchSummary> {
        let prefix = remote_prefix(&self.prefix, kind, date);
        let target_dir = partition_dir(&self.out_dir, kind, date);
        let keys = self.list_keys(&prefix).await?;

        info!(
            files = keys.len(),
            "Found {} {} files for {}",
            keys.len(),
            kind,
            date
        );

        if !self.dry_run && !keys.is_empty() {
            tokio::fs::create_dir_all(&target_dir).await?;
        }

        let mut summary = FetchSummary::default();
        for key in keys {
            let target = local_path_for_key(&target_dir, &key);

            if tokio::fs::try_exists(&target).await? {
                debug!(file = %target.display(), "Skipping existing file");
                summary.skipped += 1;
                continue;
            }

            if self.dry_run {
                info!(key = %key, file = %target.display(), "Dry run: would download");
                summary.planned += 1;
                continue;
            }

            let bytes = self.download(&key, &target).await?;
            info!(file = %target.display(), bytes, "Downloaded");
            summary.downloaded += 1;
            summary.bytes += bytes;
        }

        Ok(summary)
    }
}

#[async_trait]
impl PartitionFetcher for S3Fetcher {
    async fn ensure_partition(&self, date: PartitionDate) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();
        for kind in DataKind::ALL {
            summary += self.fetch_kind(kind, date).await?;
        }

        info!(
            %date,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            planned = summary.planned,
            "Partition fetched"
        );
        Ok(summary)
    }
}

async fn write_body(
    mut body: aws_sdk_s3::primitives::ByteStream,
    path: &Path,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(bytes) = body
        .try_next()
        .await
        .map_err(|e| IngestError::Download(format!("reading object body: {e}")))?
    {
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Local file for an object key: the key's last segment inside `dir`
fn local_path_for_key(dir: &Path, key: &str) -> PathBuf {
    dir.join(key.rsplit('/').next().unwrap_or(key))
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
