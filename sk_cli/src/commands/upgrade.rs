//! Upgrade and outdated command implementations.

use std::time::Instant;

use console::style;
use sk_core::Error;
use sk_io::{Installer, UpgradeReport};

use crate::display::{TransferBar, heading, note, success, warning};
use crate::settings::Settings;

/// Run the outdated command.
pub fn run_outdated(installer: &Installer, json: bool) -> Result<(), Error> {
    let outdated = installer.outdated()?;

    if json {
        let items: Vec<serde_json::Value> = outdated
            .iter()
            .map(|o| {
                serde_json::json!({
                    "name": o.name,
                    "installed_version": o.installed.version,
                    "available_version": o.available.version.as_str(),
                    "bucket": o.available.bucket,
                    "frozen": o.frozen,
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&items)
            .map_err(|e| Error::format(format!("failed to serialize JSON: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    if outdated.is_empty() {
        println!("All packages are up to date.");
        return Ok(());
    }

    heading(format!(
        "{} outdated packages:",
        style(outdated.len()).yellow().bold()
    ));
    for o in &outdated {
        let frozen = if o.frozen {
            format!(" {}", style("(frozen)").dim())
        } else {
            String::new()
        };
        println!(
            "  {} {} → {} [{}]{}",
            style(&o.name).bold(),
            style(&o.installed.version).red(),
            style(o.available.version.as_str()).green(),
            o.available.bucket,
            frozen
        );
    }
    Ok(())
}

/// Run the upgrade command.
pub async fn run_upgrade(installer: &Installer, settings: &Settings) -> Result<(), Error> {
    let start = Instant::now();
    let bar = TransferBar::start("upgrade", settings.quiet());
    let reports = installer.upgrade(settings.force, Some(bar.progress())).await;
    bar.finish();
    let reports = reports?;

    if reports.is_empty() {
        println!("All packages are up to date.");
        return Ok(());
    }

    let mut upgraded = 0;
    let mut first_failure = None;
    for report in reports {
        match report {
            UpgradeReport::Upgraded { name, from, to } => {
                success(format!(
                    "{} {} → {}",
                    style(name).bold(),
                    style(from).red(),
                    style(to).green()
                ));
                upgraded += 1;
            }
            UpgradeReport::Frozen { name, version } => {
                note(format!("{name} {version} is frozen, skipped"));
            }
            UpgradeReport::Failed { name, error } => {
                warning(format!("failed to upgrade {name}: {error}"));
                first_failure.get_or_insert(error);
            }
        }
    }

    if upgraded > 0 {
        heading(format!(
            "Upgraded {} packages in {:.2}s",
            style(upgraded).green().bold(),
            start.elapsed().as_secs_f64()
        ));
    }
    match first_failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
