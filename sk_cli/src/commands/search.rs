//! List and search commands.

use std::collections::BTreeMap;

use console::style;
use sk_core::{Arch, Error};
use sk_io::{BucketDirSource, Installer, catalog, search_packages};

use crate::settings::Settings;

/// Run the list command.
pub fn run_list(installer: &Installer, settings: &Settings, json: bool) -> Result<(), Error> {
    let installed = installer.list()?;
    let profile = settings.profiles().load()?;

    if json {
        let items: Vec<serde_json::Value> = installed
            .iter()
            .map(|(name, lock)| {
                serde_json::json!({
                    "name": name,
                    "version": lock.version,
                    "bucket": lock.bucket,
                    "frozen": profile.is_frozen(name),
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&items)
            .map_err(|e| Error::format(format!("failed to serialize JSON: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    if installed.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    for (name, lock) in &installed {
        let frozen = if profile.is_frozen(name) {
            format!(" {}", style("(frozen)").cyan())
        } else {
            String::new()
        };
        println!(
            "{} {} {}{}",
            style(name).bold(),
            style(&lock.version).green(),
            style(format!("[{}]", lock.bucket)).dim(),
            frozen
        );
    }
    Ok(())
}

/// Run the search command.
pub fn run_search(
    installer: &Installer,
    settings: &Settings,
    query: &str,
    json: bool,
) -> Result<(), Error> {
    let profile = settings.profiles().load()?;
    let source = BucketDirSource::new(settings.layout());
    let packages = catalog(&source, &profile.buckets, Arch::host());
    let results = search_packages(&packages, query);

    let installed: BTreeMap<String, String> = installer
        .list()?
        .into_iter()
        .map(|(name, lock)| (name, lock.version))
        .collect();

    if json {
        let items: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "bucket": r.bucket,
                    "version": r.version,
                    "description": r.description,
                    "installed": installed.get(&r.name),
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&items)
            .map_err(|e| Error::format(format!("failed to serialize JSON: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    if results.is_empty() {
        println!("No packages found matching '{}'", query);
        return Ok(());
    }

    for r in &results {
        let marker = match installed.get(&r.name) {
            Some(version) => format!(" {}", style(format!("(installed {version})")).green()),
            None => String::new(),
        };
        println!(
            "{}/{} {}{}",
            style(&r.bucket).dim(),
            style(&r.name).bold(),
            style(&r.version).cyan(),
            marker
        );
        if !r.description.is_empty() {
            println!("    {}", r.description);
        }
    }
    Ok(())
}
