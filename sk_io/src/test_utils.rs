//! Test utilities for skep
//!
//! - `TestContext` - a temp root, a mock server standing in for bucket and
//!   package hosts, and an `Installer` wired to both
//! - Fixture helpers - zip payloads, checksums, revision feeds
//!
//! # Example
//!
//! ```ignore
//! use sk_io::test_utils::{TestContext, zip_bytes};
//!
//! #[tokio::test]
//! async fn installs() {
//!     let ctx = TestContext::new().await;
//!     ctx.publish("jq", "1.7", "jq.zip", zip_bytes(&[("jq", "bin")]), &["jq"]).await;
//!     ctx.installer().install("jq", false, None).await.unwrap();
//! }
//! ```

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use sk_core::{Arch, Bucket};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use crate::download::{Downloader, NetConfig};
use crate::install::Installer;
use crate::layout::Layout;
use crate::profile::{Profile, ProfileStore};

pub const TEST_BUCKET: &str = "main";

/// Zip archive with the given `(path, contents)` entries
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// A commit feed whose newest entry is `revision`
pub fn atom_feed(revision: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>tag:github.com,2008:/skep-pkg/bucket/commits/master</id>
  <title>Recent Commits to bucket:master</title>
  <entry>
    <id>tag:github.com,2008:Grit::Commit/{revision}</id>
    <title>update manifests</title>
  </entry>
  <entry>
    <id>tag:github.com,2008:Grit::Commit/0000000</id>
  </entry>
</feed>"#
    )
}

pub struct TestContext {
    tmp: TempDir,
    server: MockServer,
    layout: Layout,
    installer: Installer,
}

impl TestContext {
    /// Root with a profile holding a single bucket, `main` (weight 10),
    /// hosted on the mock server.
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();

        let profiles = ProfileStore::new(layout.default_profile());
        let profile = Profile {
            buckets: vec![Bucket {
                name: TEST_BUCKET.to_string(),
                description: String::new(),
                url: format!("{}/{TEST_BUCKET}", server.uri()),
                weight: 10,
            }],
            ..Default::default()
        };
        profiles.save(&profile).unwrap();

        let http = Arc::new(Downloader::new(&NetConfig::default()).unwrap());
        let installer = Installer::new(layout.clone(), http, profiles).with_arch(Arch::X64);
        Self {
            tmp,
            server,
            layout,
            installer,
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Write a manifest into the local `main` snapshot.
    pub fn write_manifest(&self, name: &str, manifest: &serde_json::Value) {
        let dir = self.layout.bucket_dir(TEST_BUCKET);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{name}.json")), manifest.to_string()).unwrap();
    }

    /// Serve `body` at `/files/<file>` and publish a checksummed manifest
    /// pointing at it.
    pub async fn publish(&self, name: &str, version: &str, file: &str, body: Vec<u8>, links: &[&str]) {
        self.write_manifest(
            name,
            &serde_json::json!({
                "version": version,
                "description": format!("{name} package"),
                "url": format!("{}/files/{file}", self.server.uri()),
                "url.hash": format!("SHA256:{}", sha256_hex(&body)),
                "links": links,
            }),
        );
        self.mount_file(file, body).await;
    }

    pub async fn mount_file(&self, file: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/files/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    /// Serve the `main` bucket's feed and its snapshot at `revision`. The
    /// snapshot is wrapped in a top-level directory like a forge archive.
    pub async fn mount_bucket(&self, revision: &str, manifests: &[(&str, serde_json::Value)]) {
        Mock::given(method("GET"))
            .and(path(format!("/{TEST_BUCKET}/commits/master.atom")))
            .respond_with(ResponseTemplate::new(200).set_body_string(atom_feed(revision)))
            .mount(&self.server)
            .await;

        let entries: Vec<(String, String)> = manifests
            .iter()
            .map(|(name, m)| (format!("bucket-{revision}/{name}.json"), m.to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = entries
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();

        Mock::given(method("GET"))
            .and(path(format!("/{TEST_BUCKET}/archive/{revision}.zip")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&refs)))
            .mount(&self.server)
            .await;
    }

    /// Fail every request to `url_path` with `status`.
    pub async fn mount_error(&self, url_path: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}
