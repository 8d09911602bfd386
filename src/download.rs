//! Fetching bottles and source archives into the download cache.
//!
//! `http(s)://` URLs are streamed with a progress bar; `file://` URLs and plain
//! paths are copied. Every artifact with a known checksum is verified with
//! SHA-256 before it is handed out, and a cached file that fails verification is
//! fetched again.

use crate::bottle::bottle_filename;
use crate::error::{Result, TaproomError};
use crate::formula::{BottleFile, Formula};
use anyhow::Context;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    cache: PathBuf,
    progress: Option<MultiProgress>,
}

impl Downloader {
    pub fn new(cache: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: cache.into(),
            progress: None,
        }
    }

    /// Show a progress bar per HTTP download.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache(&self) -> &Path {
        &self.cache
    }

    pub async fn fetch_bottle(&self, formula: &Formula, tag: &str, file: &BottleFile) -> Result<PathBuf> {
        let filename = bottle_filename(formula, tag);
        self.fetch(&file.url, Some(&file.sha256), &filename, &formula.name)
            .await
    }

    /// Download the formula's source archive, or `None` if it declares no URL.
    pub async fn fetch_source(&self, formula: &Formula) -> Result<Option<PathBuf>> {
        let Some(url) = formula.url.as_deref() else {
            return Ok(None);
        };
        let basename = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("source");
        let filename = format!("{}--{}", formula.name, basename);
        self.fetch(url, formula.sha256.as_deref(), &filename, &formula.name)
            .await
            .map(Some)
    }

    async fn fetch(
        &self,
        url: &str,
        sha256: Option<&str>,
        filename: &str,
        label: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", self.cache.display()))?;
        let output = self.cache.join(filename);
        let expected = sha256.filter(|s| !s.is_empty());

        if output.is_file() {
            match expected {
                Some(expected) if sha256_file(&output).await? != expected => {
                    debug!("Cached {} failed verification, fetching again", output.display());
                    fs::remove_file(&output).await?;
                }
                _ => return Ok(output),
            }
        }

        if let Some(path) = local_path(url) {
            fs::copy(&path, &output).await.map_err(|e| TaproomError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        } else {
            self.download(url, &output, label).await?;
        }

        if let Some(expected) = expected {
            let actual = sha256_file(&output).await?;
            if actual != expected {
                let _ = fs::remove_file(&output).await;
                return Err(TaproomError::ChecksumMismatch {
                    path: output,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(output)
    }

    async fn download(&self, url: &str, output: &Path, label: &str) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TaproomError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let pb = self.progress.as_ref().map(|mp| {
            let pb = mp.add(ProgressBar::new(response.content_length().unwrap_or(0)));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(format!("⬇ {}", label));
            pb
        });

        // Write to a partial file so an interrupted download never looks complete.
        let partial = output.with_extension("incomplete");
        let mut file = fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }
        file.flush().await?;
        fs::rename(&partial, output).await?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("✓ {}", label));
        }
        Ok(())
    }
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    (!url.contains("://")).then(|| PathBuf::from(url))
}

/// Hex SHA-256 of a file, read in chunks.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
