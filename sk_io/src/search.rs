//! Search across the packages of all local bucket snapshots

use regex::Regex;
use sk_core::{Arch, Bucket, ManifestSource, Package};
use tracing::debug;

use crate::bucket::BucketDirSource;

/// Search result with relevance scoring
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub name: String,
    pub bucket: String,
    pub version: String,
    pub description: String,
    pub score: u32,
}

/// Every parsable manifest of every bucket. Manifests that fail to parse
/// or are not ported to `arch` are left out.
pub fn catalog(source: &BucketDirSource, buckets: &[Bucket], arch: Arch) -> Vec<Package> {
    let mut packages = Vec::new();
    for bucket in buckets {
        for name in source.package_names(bucket) {
            let Ok(Some(text)) = source.load(bucket, &name) else {
                continue;
            };
            match Package::from_manifest(&name, &text, arch, bucket) {
                Ok(pkg) => packages.push(pkg),
                Err(e) => debug!(bucket = %bucket.name, package = %name, error = %e, "not listed"),
            }
        }
    }
    packages
}

/// Search packages by query string
///
/// Supports:
/// - Plain text search (matches name and description)
/// - Regex search when query is wrapped in /slashes/
pub fn search_packages(packages: &[Package], query: &str) -> Vec<SearchResult> {
    let query = query.trim();
    let is_regex = query.starts_with('/') && query.ends_with('/') && query.len() > 2;

    let mut results: Vec<SearchResult> = if is_regex {
        match Regex::new(&query[1..query.len() - 1]) {
            Ok(re) => search_by_regex(packages, &re),
            Err(_) => search_by_text(packages, query),
        }
    } else {
        search_by_text(packages, query)
    };

    results.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.bucket.cmp(&b.bucket))
    });
    results
}

fn result(pkg: &Package, score: u32) -> SearchResult {
    SearchResult {
        name: pkg.name.clone(),
        bucket: pkg.bucket.clone(),
        version: pkg.version.to_string(),
        description: pkg.description.clone(),
        score,
    }
}

fn search_by_text(packages: &[Package], query: &str) -> Vec<SearchResult> {
    let query = query.to_lowercase();

    packages
        .iter()
        .filter_map(|pkg| {
            let name = pkg.name.to_lowercase();
            let score = if name == query {
                100
            } else if name.starts_with(&query) {
                50
            } else if name.contains(&query) {
                25
            } else if pkg.description.to_lowercase().contains(&query) {
                10
            } else {
                0
            };
            (score > 0).then(|| result(pkg, score))
        })
        .collect()
}

fn search_by_regex(packages: &[Package], re: &Regex) -> Vec<SearchResult> {
    packages
        .iter()
        .filter_map(|pkg| {
            if re.is_match(&pkg.name) {
                Some(result(pkg, 50))
            } else if re.is_match(&pkg.description) {
                Some(result(pkg, 10))
            } else {
                None
            }
        })
        .collect()
}
