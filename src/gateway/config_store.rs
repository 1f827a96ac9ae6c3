//! Configuration store: a process-wide, time-expiring cache of model definitions.
//!
//! Backed by one of four sources selected by the prefix of `CONFIG_PATH`: a local directory, an
//! S3-compatible object store, a GitHub repository tree, or a GitHub `.zip` archive. Refill is
//! single-flight: concurrent stale reads coalesce into exactly one source fetch.

use crate::gateway::error::GatewayError;
use crate::gateway::model_definition::{ConfigSnapshot, ModelDefinition};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// A pluggable loader capable of producing the full set of model definitions in one shot.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError>;
}

/// Recursively enumerate `*.json` files under a local directory, parse each, and return the
/// result (unsorted — the caller/`ConfigSnapshot` applies the name sort).
pub struct LocalDirectorySource {
    pub root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_json_files(&path, out)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                out.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for LocalDirectorySource {
    async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            LocalDirectorySource::collect_json_files(&root, &mut files)
                .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;
            let mut defs = Vec::with_capacity(files.len());
            for path in files {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;
                match serde_json::from_str::<ModelDefinition>(&raw) {
                    Ok(def) => defs.push(def),
                    Err(e) => log::error!("error parsing {}: {}", path.display(), e),
                }
            }
            Ok(defs)
        })
        .await
        .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?
    }
}

/// List objects under `s3://bucket/prefix`, fetch each `.json` key, parse and return.
pub struct S3ConfigSource {
    pub bucket: String,
    pub prefix: String,
    pub client: aws_sdk_s3::Client,
}

impl S3ConfigSource {
    /// Parse an `s3://bucket/prefix` URI into its components.
    pub fn parse_uri(uri: &str) -> Result<(String, String), GatewayError> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| GatewayError::ConfigUnavailable(format!("invalid S3 URI: {}", uri)))?;
        let mut parts = rest.splitn(2, '/');
        let bucket = parts
            .next()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| GatewayError::ConfigUnavailable(format!("invalid S3 URI: {}", uri)))?
            .to_string();
        let prefix = parts.next().unwrap_or("").to_string();
        Ok((bucket, prefix))
    }
}

#[async_trait]
impl ConfigSource for S3ConfigSource {
    async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        let mut defs = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }
            let page = req
                .send()
                .await
                .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;

            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                if !key.ends_with(".json") {
                    continue;
                }
                let resp = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;
                let bytes = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?
                    .into_bytes();
                match serde_json::from_slice::<ModelDefinition>(&bytes) {
                    Ok(def) => defs.push(def),
                    Err(e) => log::error!("error parsing s3 key {}: {}", key, e),
                }
            }

            if page.is_truncated().unwrap_or(false) {
                continuation_token = page.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(defs)
    }
}

/// List a GitHub repository directory via the contents API and fetch each `.json` file
/// concurrently. URL shape: `https://github.com/<owner>/<repo>/tree/<branch>/<path>`.
pub struct GitHubTreeSource {
    pub repo: String,
    pub path: String,
    pub branch: String,
    pub token: Option<String>,
    pub http_client: reqwest::Client,
}

impl GitHubTreeSource {
    pub fn parse_url(url: &str) -> Result<(String, String, String), GatewayError> {
        let invalid = || GatewayError::ConfigUnavailable(format!("invalid GitHub URL: {}", url));
        let rest = url
            .strip_prefix("https://github.com/")
            .ok_or_else(invalid)?;
        let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 4 || parts[2] != "tree" {
            return Err(invalid());
        }
        let repo = format!("{}/{}", parts[0], parts[1]);
        let branch = parts[3].to_string();
        let path = parts[4..].join("/");
        Ok((repo, path, branch))
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("token {}", t))
    }
}

#[async_trait]
impl ConfigSource for GitHubTreeSource {
    async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        let api_url = format!(
            "https://api.github.com/repos/{}/contents/{}?ref={}",
            self.repo, self.path, self.branch
        );
        let mut req = self
            .http_client
            .get(&api_url)
            .header("User-Agent", "llm-gateway");
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", auth);
        }
        let items: serde_json::Value = req
            .send()
            .await
            .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;

        let entries = items.as_array().cloned().unwrap_or_default();
        let fetches = entries.into_iter().filter_map(|item| {
            let is_file = item.get("type").and_then(|t| t.as_str()) == Some("file");
            let name_is_json = item
                .get("name")
                .and_then(|n| n.as_str())
                .map(|n| n.ends_with(".json"))
                .unwrap_or(false);
            if !(is_file && name_is_json) {
                return None;
            }
            let download_url = item.get("download_url")?.as_str()?.to_string();
            let name = item.get("name")?.as_str()?.to_string();
            Some((name, download_url))
        });

        let mut tasks = Vec::new();
        for (name, download_url) in fetches {
            let client = self.http_client.clone();
            let auth = self.auth_header();
            tasks.push(tokio::spawn(async move {
                let mut req = client.get(&download_url).header("User-Agent", "llm-gateway");
                if let Some(auth) = auth {
                    req = req.header("Authorization", auth);
                }
                let text = req.send().await?.text().await?;
                Ok::<_, reqwest::Error>((name, text))
            }));
        }

        let mut defs = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok((name, text))) => match serde_json::from_str::<ModelDefinition>(&text) {
                    Ok(def) => defs.push(def),
                    Err(e) => log::error!("error parsing GitHub file {}: {}", name, e),
                },
                Ok(Err(e)) => log::error!("error fetching GitHub file: {}", e),
                Err(e) => log::error!("GitHub fetch task panicked: {}", e),
            }
        }
        Ok(defs)
    }
}

/// Download a `.zip` archive once, expand it into a temp directory, then reuse the local
/// directory walker on the extracted root.
pub struct GitHubZipSource {
    pub zip_url: String,
    pub token: Option<String>,
    pub http_client: reqwest::Client,
}

#[async_trait]
impl ConfigSource for GitHubZipSource {
    async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        let mut req = self
            .http_client
            .get(&self.zip_url)
            .header("User-Agent", "llm-gateway");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {}", token));
        }
        let bytes = req
            .send()
            .await
            .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;

        let extracted_root = tokio::task::spawn_blocking(move || -> Result<PathBuf, GatewayError> {
            let dir = tempfile::Builder::new()
                .prefix("llm-gateway-config-")
                .tempdir()
                .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;
            let dir_path = dir.keep();
            let cursor = std::io::Cursor::new(bytes.as_ref());
            let mut archive = zip::ZipArchive::new(cursor)
                .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;
            archive
                .extract(&dir_path)
                .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))?;
            Ok(dir_path)
        })
        .await
        .map_err(|e| GatewayError::ConfigUnavailable(e.to_string()))??;

        LocalDirectorySource::new(extracted_root).load().await
    }
}

/// Select a [`ConfigSource`] implementation by the prefix of `config_path`.
pub fn source_from_path(
    config_path: &str,
    github_token: Option<String>,
    s3_client: Option<aws_sdk_s3::Client>,
    http_client: reqwest::Client,
) -> Result<Arc<dyn ConfigSource>, GatewayError> {
    if let Some(rest) = config_path.strip_prefix("s3://") {
        let (bucket, prefix) = S3ConfigSource::parse_uri(&format!("s3://{}", rest))?;
        let client = s3_client.ok_or_else(|| {
            GatewayError::ConfigUnavailable("s3:// config source requires an S3 client".into())
        })?;
        return Ok(Arc::new(S3ConfigSource {
            bucket,
            prefix,
            client,
        }));
    }
    if config_path.ends_with(".zip") {
        return Ok(Arc::new(GitHubZipSource {
            zip_url: config_path.to_string(),
            token: github_token,
            http_client,
        }));
    }
    if config_path.starts_with("https://github.com/") {
        let (repo, path, branch) = GitHubTreeSource::parse_url(config_path)?;
        return Ok(Arc::new(GitHubTreeSource {
            repo,
            path,
            branch,
            token: github_token,
            http_client,
        }));
    }
    Ok(Arc::new(LocalDirectorySource::new(config_path)))
}

/// Single-flight, TTL-expiring cache in front of a [`ConfigSource`].
///
/// `get()` never raises: on refill failure it logs and returns the last good snapshot, or an
/// empty one if none has ever loaded.
pub struct ConfigStore {
    source: Arc<dyn ConfigSource>,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<ConfigSnapshot>>>,
    refill_lock: AsyncMutex<()>,
}

impl ConfigStore {
    pub fn new(source: Arc<dyn ConfigSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: RwLock::new(None),
            refill_lock: AsyncMutex::new(()),
        }
    }

    fn fresh_snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        let guard = self.snapshot.read().unwrap();
        match guard.as_ref() {
            Some(snap) if snap.loaded_at.elapsed() < self.ttl => Some(snap.clone()),
            _ => None,
        }
    }

    /// Return a fresh snapshot, refilling from the source at most once per TTL window even
    /// under concurrent callers.
    pub async fn get(&self) -> Arc<ConfigSnapshot> {
        if let Some(snap) = self.fresh_snapshot() {
            return snap;
        }
        let _guard = self.refill_lock.lock().await;
        if let Some(snap) = self.fresh_snapshot() {
            return snap;
        }
        match self.source.load().await {
            Ok(defs) => {
                let snap = Arc::new(ConfigSnapshot::new(defs));
                *self.snapshot.write().unwrap() = Some(snap.clone());
                snap
            }
            Err(e) => {
                log::error!("config store refill failed: {}", e);
                self.snapshot
                    .read()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Arc::new(ConfigSnapshot::empty()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model_definition::ModelType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn def(name: &str) -> ModelDefinition {
        ModelDefinition {
            id: name.to_string(),
            name: name.to_string(),
            description: String::new(),
            owner: String::new(),
            model_type: ModelType::Langchain,
            disabled: false,
            backend: None,
            system_prompts: vec![],
            model_parameters: serde_json::Map::new(),
            headers: vec![],
            tools: vec![],
            agents: vec![],
            example_prompts: vec![],
            url: None,
        }
    }

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConfigSource for CountingSource {
        async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![def("Only Model")])
        }
    }

    #[tokio::test]
    async fn local_directory_source_reads_and_sorts_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("z.json"),
            serde_json::to_string(&def("Zebra")).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            serde_json::to_string(&def("Alpha")).unwrap(),
        )
        .unwrap();
        let source = LocalDirectorySource::new(dir.path());
        let defs = source.load().await.unwrap();
        assert_eq!(defs.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_stale_reads_coalesce_into_one_refill() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(ConfigStore::new(
            Arc::new(CountingSource {
                calls: calls.clone(),
            }),
            Duration::from_secs(3600),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.get().await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refill_failure_returns_last_good_snapshot() {
        struct FlakySource {
            fail: std::sync::atomic::AtomicBool,
        }
        #[async_trait]
        impl ConfigSource for FlakySource {
            async fn load(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
                if self.fail.swap(true, Ordering::SeqCst) {
                    Err(GatewayError::ConfigUnavailable("boom".into()))
                } else {
                    Ok(vec![def("Good")])
                }
            }
        }
        let store = ConfigStore::new(
            Arc::new(FlakySource {
                fail: std::sync::atomic::AtomicBool::new(false),
            }),
            Duration::from_millis(1),
        );
        let first = store.get().await;
        assert_eq!(first.definitions.len(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.get().await;
        assert_eq!(second.definitions[0].name, "Good");
    }
}
