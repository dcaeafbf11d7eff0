use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::info;
use url::Url;
use uuid::Uuid;

use beamrun_util::expand_user;

use crate::{
    config::ServiceConfig,
    error::{LaunchError, Result},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactSource {
    Local(PathBuf),
    Remote(String),
}

impl ArtifactSource {
    pub fn parse(raw: &str) -> Self {
        if is_remote_url(raw) {
            return ArtifactSource::Remote(raw.to_string());
        }
        match raw.strip_prefix("file://") {
            Some(path) => ArtifactSource::Local(PathBuf::from(path)),
            None => ArtifactSource::Local(expand_user(raw)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ArtifactSource::Remote(_))
    }
}

pub fn is_remote_url(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("gs://") || lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Downloads `url` into `dest_dir`, keeping the object's file name, and
    /// returns the local path.
    async fn fetch_to_local(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// A pipeline artifact resolved to a local path. Downloaded artifacts live in
/// a temporary directory that is removed when this value is dropped.
#[derive(Debug)]
pub struct ScopedArtifact {
    path: PathBuf,
    downloaded: bool,
    _dir: Option<TempDir>,
}

impl ScopedArtifact {
    pub async fn resolve(source: &ArtifactSource, fetcher: &dyn ArtifactFetcher) -> Result<Self> {
        match source {
            ArtifactSource::Local(path) => Ok(Self {
                path: path.clone(),
                downloaded: false,
                _dir: None,
            }),
            ArtifactSource::Remote(url) => {
                let dir = tempfile::Builder::new()
                    .prefix("beamrun-artifact-")
                    .tempdir()?;
                let path = fetcher.fetch_to_local(url, dir.path()).await?;
                info!("fetched {url} to {}", path.display());
                Ok(Self {
                    path,
                    downloaded: true,
                    _dir: Some(dir),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn downloaded(&self) -> bool {
        self.downloaded
    }
}

/// Fetches `gs://` objects through the storage JSON API and `http(s)://`
/// URLs directly.
#[derive(Clone)]
pub struct HttpArtifactFetcher {
    client: Client,
    storage_endpoint: String,
    access_token: Option<String>,
}

impl HttpArtifactFetcher {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("beamrun/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| LaunchError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            storage_endpoint: config.storage_endpoint.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn download_url(&self, url: &str) -> Result<(Url, String)> {
        let fetch_err = |message: String| LaunchError::ArtifactFetch {
            url: url.to_string(),
            message,
        };
        if let Some(rest) = strip_prefix_ignore_case(url, "gs://") {
            let (bucket, object) = rest
                .split_once('/')
                .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
                .ok_or_else(|| fetch_err("expected gs://<bucket>/<object>".into()))?;
            let mut api = Url::parse(&self.storage_endpoint)
                .map_err(|e| fetch_err(format!("invalid storage endpoint: {e}")))?;
            api.path_segments_mut()
                .map_err(|_| fetch_err("storage endpoint cannot be a base".into()))?
                .pop_if_empty()
                .extend(["storage", "v1", "b", bucket, "o", object]);
            api.query_pairs_mut().append_pair("alt", "media");
            return Ok((api, file_name_of(object)));
        }
        let parsed = Url::parse(url).map_err(|e| fetch_err(e.to_string()))?;
        let name = file_name_of(parsed.path());
        Ok((parsed, name))
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch_to_local(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let (download_url, file_name) = self.download_url(url)?;
        let fetch_err = |message: String| LaunchError::ArtifactFetch {
            url: url.to_string(),
            message,
        };

        let mut request = self.client.get(download_url);
        if let Some(token) = self.access_token.as_deref() {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| fetch_err(format!("download failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(fetch_err(format!("download failed with status {}", resp.status())));
        }

        let dest = dest_dir.join(&file_name);
        let tmp = dest.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp);
                    return Err(fetch_err(format!("download read failed: {err}")));
                }
            };
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        fs::rename(&tmp, &dest)?;
        Ok(dest)
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

fn file_name_of(path: &str) -> String {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("artifact")
        .to_string()
}
