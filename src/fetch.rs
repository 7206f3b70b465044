//! Download the latest bulletin workbook from the central bank's statistics page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use url::Url;

use crate::config::FetchConfig;

const RETRY_DELAY: Duration = Duration::from_secs(1);

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download a new source file into the intake directory.
    /// `None` when nothing new was downloaded; failures are logged, never raised.
    async fn fetch_source_file(&self) -> Option<PathBuf>;
}

pub struct BulletinFetcher {
    client: Client,
    page_url: String,
    retries: u32,
    intake_dir: PathBuf,
    archive_dir: PathBuf,
}

impl BulletinFetcher {
    pub fn new(config: &FetchConfig, intake_dir: &Path, archive_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            page_url: config.url.clone(),
            retries: config.retries.max(1),
            intake_dir: intake_dir.to_path_buf(),
            archive_dir: archive_dir.to_path_buf(),
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let resp = self
                    .client
                    .get(url)
                    .header(header::ACCEPT, "*/*")
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<_, reqwest::Error>(resp.bytes().await?.to_vec())
            }
            .await;

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.retries => {
                    warn!("GET {} failed (attempt {}): {}", url, attempt, e);
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e).with_context(|| format!("GET {} failed", url)),
            }
        }
    }

    async fn try_fetch(&self) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .with_context(|| format!("Failed to create archive directory {:?}", self.archive_dir))?;

        let page = self.get_bytes(&self.page_url).await?;
        let html = String::from_utf8_lossy(&page);
        let file_url = find_xlsx_link(&html, &self.page_url)?
            .with_context(|| format!("No .xlsx file found on {}", self.page_url))?;
        let file_name = file_name_from_url(&file_url)
            .with_context(|| format!("Cannot derive a file name from {}", file_url))?;

        if self.archive_dir.join(&file_name).exists() {
            info!("File {} already exists in archive. Skipping download.", file_name);
            return Ok(None);
        }

        info!("The file is not in the archive, downloading {}", file_url);
        let bytes = self.get_bytes(file_url.as_str()).await?;
        tokio::fs::create_dir_all(&self.intake_dir).await?;
        let dest = self.intake_dir.join(&file_name);
        tokio::fs::write(&dest, &bytes)
            .await
            .with_context(|| format!("Failed to write {:?}", dest))?;
        info!("Downloaded {} ({} bytes)", dest.display(), bytes.len());
        Ok(Some(dest))
    }
}

#[async_trait]
impl SourceFetcher for BulletinFetcher {
    async fn fetch_source_file(&self) -> Option<PathBuf> {
        match self.try_fetch().await {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to fetch bulletin: {:#}", e);
                None
            }
        }
    }
}

/// First `<a href>` ending in `.xlsx`, resolved against the page's origin.
pub fn find_xlsx_link(html: &str, page_url: &str) -> Result<Option<Url>> {
    let selector = Selector::parse(r#"a[href$=".xlsx"]"#).expect("valid .xlsx link selector");
    let page = Url::parse(page_url).with_context(|| format!("Invalid page URL {}", page_url))?;
    let origin = page.join("/")?;

    Ok(Html::parse_document(html)
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| origin.join(href).ok()))
}

/// Percent-decoded last path segment.
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last().filter(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?;
    Some(decoded.into_owned())
}
