use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_DISPOSITION;
use sk_core::Error;
use tracing::debug;

use crate::progress::Progress;
use crate::staged::{StagedFile, StagingSink};
use crate::traits::HttpClient;

/// Network settings, passed explicitly to every client.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub user_agent: String,
    /// Accept invalid TLS certificates
    pub insecure: bool,
    pub https_proxy: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("skep/{}", env!("CARGO_PKG_VERSION")),
            insecure: false,
            https_proxy: None,
            timeout: None,
        }
    }
}

pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(config: &NetConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(10)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy).map_err(|e| Error::NetworkFailure {
                message: format!("invalid proxy '{proxy}': {e}"),
            })?;
            builder = builder.proxy(proxy);
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| Error::NetworkFailure {
            message: format!("failed to build http client: {e}"),
        })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::NetworkFailure {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::NetworkFailure {
                message: format!("HTTP {} for {url}", response.status()),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpClient for Downloader {
    async fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        debug!(url, "GET");
        self.send(url)
            .await?
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::NetworkFailure {
                message: e.to_string(),
            })
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        overwrite: bool,
        progress: Option<Arc<Progress>>,
    ) -> Result<PathBuf, Error> {
        let response = self.send(url).await?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(url))
            .ok_or_else(|| Error::NetworkFailure {
                message: format!("cannot determine a file name for {url}"),
            })?;

        if let Some(progress) = &progress {
            progress.reset();
            progress.set_total(response.content_length().unwrap_or(0));
        }

        let target = dest_dir.join(&file_name);
        debug!(url, target = %target.display(), "downloading");
        let mut staged = StagedFile::create(&target, overwrite)?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::NetworkFailure {
                message: format!("download interrupted: {e}"),
            })?;
            staged
                .write_all(&chunk)
                .map_err(|e| Error::io(&format!("failed to write {}", target.display()), e))?;
            if let Some(progress) = &progress {
                progress.add(chunk.len() as u64);
            }
        }

        staged.commit()
    }
}

/// `filename*=` (RFC 5987) wins over `filename=`; both are percent-decoded.
/// Only the last path segment is kept.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';') {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.split_once("''").map_or(raw, |(_, rest)| rest);
                extended = Some(percent_decode(encoded));
            }
            "filename" => plain = Some(percent_decode(raw)),
            _ => {}
        }
    }

    extended.or(plain).and_then(|name| safe_file_name(&name))
}

pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    safe_file_name(&percent_decode(last))
}

fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        _ => Some(base.to_string()),
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Downloader {
        Downloader::new(&NetConfig::default()).unwrap()
    }

    #[test]
    fn disposition_variants() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"tool.zip\"").as_deref(),
            Some("tool.zip")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=a.zip; filename*=UTF-8''b%20c.zip")
                .as_deref(),
            Some("b c.zip")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=\"../../etc/passwd\"").as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_disposition("inline"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"..\""), None);
    }

    #[test]
    fn url_fallback_uses_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/dl/pkg%2B1.zip?token=x").as_deref(),
            Some("pkg+1.zip")
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[test]
    fn percent_decode_handles_edges() {
        assert_eq!(percent_decode("a%2"), "a%2");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%41%42"), "AB");
    }

    #[tokio::test]
    async fn downloads_with_content_disposition_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get/123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"payload".to_vec())
                    .insert_header("content-disposition", "attachment; filename=\"tool-1.0.zip\""),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let progress = Arc::new(Progress::new());
        let path = client()
            .download(
                &format!("{}/get/123", server.uri()),
                tmp.path(),
                false,
                Some(progress.clone()),
            )
            .await
            .unwrap();

        assert_eq!(path, tmp.path().join("tool-1.0.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert_eq!(progress.snapshot().current, 7);
    }

    #[tokio::test]
    async fn sends_configured_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("user-agent", "custom-agent/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let config = NetConfig {
            user_agent: "custom-agent/2".to_string(),
            ..Default::default()
        };
        let body = Downloader::new(&config)
            .unwrap()
            .get(&format!("{}/feed", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn http_error_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.zip"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let err = client()
            .download(&format!("{}/missing.zip", server.uri()), tmp.path(), false, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NetworkFailure { .. }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn existing_file_without_overwrite_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_string("new"))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.zip"), "old").unwrap();
        let url = format!("{}/a.zip", server.uri());

        assert!(client().download(&url, tmp.path(), false, None).await.is_err());
        assert_eq!(std::fs::read_to_string(tmp.path().join("a.zip")).unwrap(), "old");

        client().download(&url, tmp.path(), true, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(tmp.path().join("a.zip")).unwrap(), "new");
    }

    #[test]
    fn invalid_proxy_is_rejected() {
        let config = NetConfig {
            https_proxy: Some("::not a url::".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Downloader::new(&config),
            Err(Error::NetworkFailure { .. })
        ));
    }

    #[test]
    fn insecure_client_builds() {
        let config = NetConfig {
            insecure: true,
            https_proxy: Some("http://127.0.0.1:3128".to_string()),
            ..Default::default()
        };
        assert!(Downloader::new(&config).is_ok());
    }
}
