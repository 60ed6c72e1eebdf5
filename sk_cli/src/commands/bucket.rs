//! Bucket snapshot sync and bucket list management.

use std::sync::Arc;

use console::style;
use sk_core::{Bucket, Error};
use sk_io::{BucketSync, HttpClient, SyncOutcome};

use crate::display::{heading, note, success, warning};
use crate::settings::Settings;

/// Run the update command: sync every configured bucket.
///
/// A bucket that fails to sync is reported and the rest still run; the
/// command fails only when no bucket could be synced.
pub async fn run_update(settings: &Settings, http: Arc<dyn HttpClient>) -> Result<(), Error> {
    let profile = settings.profiles().load()?;
    let layout = settings.layout();
    layout.ensure()?;
    let sync = BucketSync::new(layout, http);

    let mut last_error = None;
    let mut synced = 0;
    for bucket in &profile.buckets {
        match sync.sync(bucket, settings.force).await {
            Ok(SyncOutcome::Updated { revision }) => {
                success(format!(
                    "{} updated to {}",
                    style(&bucket.name).bold(),
                    short(&revision)
                ));
                synced += 1;
            }
            Ok(SyncOutcome::UpToDate { revision }) => {
                note(format!("{} is up to date ({})", bucket.name, short(&revision)));
                synced += 1;
            }
            Err(e) => {
                warning(format!("failed to update {}: {e}", bucket.name));
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if synced == 0 => Err(e),
        _ => Ok(()),
    }
}

fn short(revision: &str) -> &str {
    revision.get(..8).unwrap_or(revision)
}

pub fn run_add(
    settings: &Settings,
    name: String,
    url: String,
    weight: i32,
    description: Option<String>,
) -> Result<(), Error> {
    Bucket::validate_name(&name)?;
    let url = url.trim().trim_end_matches('/').to_string();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(Error::format(format!("bucket url must be http(s): '{url}'")));
    }

    let bucket = Bucket {
        name: name.clone(),
        description: description.unwrap_or_default(),
        url,
        weight,
    };
    settings.profiles().update(|p| p.add_bucket(bucket))??;
    success(format!("bucket {} added", style(name).bold()));
    Ok(())
}

pub fn run_remove(settings: &Settings, name: &str) -> Result<(), Error> {
    Bucket::validate_name(name)?;
    let removed = settings.profiles().update(|p| p.remove_bucket(name))?;
    if !removed {
        return Err(Error::format(format!("no bucket named '{name}'")));
    }

    let dir = settings.layout().bucket_dir(name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .map_err(|e| Error::io(&format!("failed to remove {}", dir.display()), e))?;
    }
    success(format!("bucket {} removed", style(name).bold()));
    Ok(())
}

pub fn run_list(settings: &Settings, json: bool) -> Result<(), Error> {
    let profile = settings.profiles().load()?;

    if json {
        let text = serde_json::to_string_pretty(&profile.buckets)
            .map_err(|e| Error::format(format!("failed to serialize JSON: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    heading(format!("{} buckets:", profile.buckets.len()));
    for bucket in &profile.buckets {
        println!(
            "  {} {} {}",
            style(&bucket.name).bold(),
            style(format!("(weight {})", bucket.weight)).dim(),
            bucket.url
        );
        if !bucket.description.is_empty() {
            println!("      {}", bucket.description);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Verbosity;
    use sk_io::NetConfig;
    use std::path::Path;
    use tempfile::TempDir;

    fn settings(root: &Path) -> Settings {
        Settings {
            root: root.to_path_buf(),
            profile: root.join("config/skep.json"),
            net: NetConfig::default(),
            force: false,
            force_delete: false,
            verbosity: Verbosity::Quiet,
        }
    }

    #[test]
    fn names_outside_buckets_dir_are_refused() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        std::fs::create_dir_all(root.join("bin/pkgs")).unwrap();
        let settings = settings(&root);

        for name in ["..", "../x", "temp", ""] {
            let added = run_add(
                &settings,
                name.to_string(),
                "https://example.com/b".to_string(),
                1,
                None,
            );
            assert!(matches!(added, Err(Error::Format { .. })), "{name}");
            assert!(matches!(run_remove(&settings, name), Err(Error::Format { .. })));
        }

        assert!(root.join("bin/pkgs").is_dir());
        assert!(!settings.profile.exists());
    }

    #[test]
    fn add_then_remove_drops_snapshot() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        run_add(
            &settings,
            "extras".to_string(),
            "https://example.com/extras/".to_string(),
            50,
            None,
        )
        .unwrap();
        let profile = settings.profiles().load().unwrap();
        assert_eq!(profile.bucket("extras").unwrap().url, "https://example.com/extras");

        let snapshot = settings.layout().bucket_dir("extras");
        std::fs::create_dir_all(&snapshot).unwrap();
        run_remove(&settings, "extras").unwrap();
        assert!(!snapshot.exists());
        assert!(settings.profiles().load().unwrap().bucket("extras").is_none());
    }
}
