//! Registry client
//!
//! Fetches package metadata from `{endpoint}/{id}` and downloads asset and
//! dependency files into a per-package staging directory under the temp
//! folder. Staged files are left in place on failure; the temp folder is
//! swept when the manager stops.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{ensure_path_component, PmfError, PmfResult};
use crate::events::{Notifier, Phase};
use crate::package::{Asset, Package};

/// Remote package registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch a package with all of its published assets
    ///
    /// Returns `Ok(None)` when the registry has no such package. Transport
    /// failures and timeouts are errors so callers can tell them apart.
    async fn fetch_package(&self, id: &str) -> PmfResult<Option<Package>>;

    /// Download `url` to `dest`, returning the number of bytes written
    async fn download(&self, url: &str, dest: &Path) -> PmfResult<u64>;

    /// Backend identifier for logging
    fn name(&self) -> &'static str;
}

/// Interpret a registry response body for `id`
///
/// An empty body, `null` or an empty array all mean the package does not
/// exist.
pub fn parse_package_response(id: &str, body: &str) -> PmfResult<Option<Package>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "[]" {
        return Ok(None);
    }

    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| PmfError::RegistryParse {
            id: id.to_string(),
            source,
        })
}

/// Download an asset's primary file and every dependency file
///
/// Files land in `{temp_folder}/{id}/{FileName}`, whatever the dependency
/// type. Returns the staging directory.
pub async fn download_asset(
    client: &dyn RegistryClient,
    temp_folder: &Path,
    id: &str,
    asset: &Asset,
    notifier: &Notifier,
) -> PmfResult<PathBuf> {
    ensure_path_component("package id", id)?;
    ensure_path_component("asset file name", &asset.file_name)?;
    for dependency in &asset.dependencies {
        ensure_path_component("dependency file name", &dependency.file_name)?;
    }

    let staging_dir = temp_folder.join(id);
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|e| PmfError::io(&staging_dir, e))?;

    notifier.info(
        Phase::Download,
        id,
        format!("Downloading asset v{}", asset.version),
    );
    let bytes = client
        .download(&asset.url, &staging_dir.join(&asset.file_name))
        .await?;
    notifier.debug(
        Phase::Download,
        id,
        format!("Downloaded {} ({bytes} bytes)", asset.file_name),
    );

    for dependency in &asset.dependencies {
        notifier.info(
            Phase::Download,
            id,
            format!("Downloading dependency with id: {}", dependency.id),
        );
        client
            .download(&dependency.url, &staging_dir.join(&dependency.file_name))
            .await?;
    }

    notifier.info(Phase::Download, id, "Finished downloading all required files");
    Ok(staging_dir)
}

#[cfg(feature = "http")]
pub use http::HttpRegistryClient;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    use crate::config::PmfConfig;

    /// HTTP implementation of [`RegistryClient`]
    #[derive(Clone)]
    pub struct HttpRegistryClient {
        client: reqwest::Client,
        endpoint: String,
        timeout: Duration,
    }

    impl std::fmt::Debug for HttpRegistryClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HttpRegistryClient")
                .field("endpoint", &self.endpoint)
                .field("timeout", &self.timeout)
                .finish()
        }
    }

    impl HttpRegistryClient {
        /// Create a client for a registry endpoint with a request deadline
        pub fn new(endpoint: impl Into<String>, timeout: Duration) -> PmfResult<Self> {
            let client = reqwest::Client::builder()
                .user_agent(concat!("pmf/", env!("CARGO_PKG_VERSION")))
                .timeout(timeout)
                .build()
                .map_err(|e| PmfError::Config(format!("failed to create HTTP client: {e}")))?;

            Ok(Self {
                client,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                timeout,
            })
        }

        pub fn from_config(config: &PmfConfig) -> PmfResult<Self> {
            config.validate()?;
            Self::new(config.registry_endpoint.clone(), config.request_timeout())
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn map_error(&self, url: &str, e: reqwest::Error) -> PmfError {
            if e.is_timeout() {
                PmfError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                PmfError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        }

        async fn get(&self, url: &str) -> PmfResult<reqwest::Response> {
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| self.map_error(url, e))
        }
    }

    #[async_trait]
    impl RegistryClient for HttpRegistryClient {
        async fn fetch_package(&self, id: &str) -> PmfResult<Option<Package>> {
            ensure_path_component("package id", id)?;
            let url = format!("{}/{}", self.endpoint, id);

            let response = self.get(&url).await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }

            if !response.status().is_success() {
                return Err(PmfError::Transport {
                    reason: format!("HTTP {}", response.status()),
                    url,
                });
            }

            let body = response.text().await.map_err(|e| self.map_error(&url, e))?;
            parse_package_response(id, &body)
        }

        async fn download(&self, url: &str, dest: &Path) -> PmfResult<u64> {
            let mut response = self.get(url).await?;

            if !response.status().is_success() {
                return Err(PmfError::Transport {
                    url: url.to_string(),
                    reason: format!("HTTP {}", response.status()),
                });
            }

            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| PmfError::io(dest, e))?;

            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(url, e))? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| PmfError::io(dest, e))?;
                written += chunk.len() as u64;
            }

            file.flush().await.map_err(|e| PmfError::io(dest, e))?;
            Ok(written)
        }

        fn name(&self) -> &'static str {
            "http"
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_absent_responses() {
        assert!(parse_package_response("foo", "").unwrap().is_none());
        assert!(parse_package_response("foo", " null ").unwrap().is_none());
        assert!(parse_package_response("foo", "[]").unwrap().is_none());
    }

    #[test]
    fn test_malformed_response_is_parse_error() {
        let result = parse_package_response("foo", "{\"ID\": 42}");
        assert!(matches!(result, Err(PmfError::RegistryParse { .. })));
    }

    #[test]
    fn test_package_response() {
        let body = r#"{"ID": "foo", "Type": "Tool", "Name": "Foo", "Author": "A",
                       "Description": "D", "Assets": []}"#;
        let pkg = parse_package_response("foo", body).unwrap().unwrap();
        assert_eq!(pkg.id, "foo");
    }

    /// Serves fixed bytes per URL and records what was requested
    struct FileServer {
        files: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RegistryClient for FileServer {
        async fn fetch_package(&self, _id: &str) -> PmfResult<Option<Package>> {
            Ok(None)
        }

        async fn download(&self, url: &str, dest: &Path) -> PmfResult<u64> {
            self.requested.lock().unwrap().push(url.to_string());
            let bytes = self.files.get(url).ok_or_else(|| PmfError::Transport {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })?;
            std::fs::write(dest, bytes).map_err(|e| PmfError::io(dest, e))?;
            Ok(bytes.len() as u64)
        }

        fn name(&self) -> &'static str {
            "files"
        }
    }

    fn asset_with_dependency() -> Asset {
        serde_json::from_str(
            r#"{"Version": "1.0.0", "SdkVersion": "1.0", "FileName": "foo.tar.gz",
                "Url": "mock://foo", "Dependencies": [
                  {"ID": "lib", "Type": "Package", "Version": "1.0",
                   "FileName": "lib.tar.gz", "Url": "mock://lib"},
                  {"ID": "data", "Type": "Standalone",
                   "FileName": "data.tar.gz", "Url": "mock://data"}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_download_asset_stages_every_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let server = FileServer {
            files: HashMap::from([
                ("mock://foo".to_string(), b"foo".to_vec()),
                ("mock://lib".to_string(), b"lib".to_vec()),
                ("mock://data".to_string(), b"data".to_vec()),
            ]),
            requested: Mutex::new(Vec::new()),
        };

        let staging = download_asset(
            &server,
            temp_dir.path(),
            "foo",
            &asset_with_dependency(),
            &Notifier::default(),
        )
        .await
        .unwrap();

        assert_eq!(staging, temp_dir.path().join("foo"));
        for name in ["foo.tar.gz", "lib.tar.gz", "data.tar.gz"] {
            assert!(staging.join(name).exists(), "{name} was not staged");
        }
        assert_eq!(server.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_download_leaves_staged_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let server = FileServer {
            files: HashMap::from([("mock://foo".to_string(), b"foo".to_vec())]),
            requested: Mutex::new(Vec::new()),
        };

        let result = download_asset(
            &server,
            temp_dir.path(),
            "foo",
            &asset_with_dependency(),
            &Notifier::default(),
        )
        .await;

        assert!(matches!(result, Err(PmfError::Transport { .. })));
        assert!(temp_dir.path().join("foo").join("foo.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_download_rejects_traversing_file_name() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let server = FileServer {
            files: HashMap::new(),
            requested: Mutex::new(Vec::new()),
        };
        let mut asset = asset_with_dependency();
        asset.file_name = "../escape.tar.gz".to_string();

        let result = download_asset(
            &server,
            temp_dir.path(),
            "foo",
            &asset,
            &Notifier::default(),
        )
        .await;

        assert!(matches!(result, Err(PmfError::InvalidArgument { .. })));
        assert!(server.requested.lock().unwrap().is_empty());
    }
}
