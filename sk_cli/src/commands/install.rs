//! Install, uninstall and cache commands.

use std::time::Instant;

use console::style;
use sk_core::Error;
use sk_io::{InstallOutcome, Installer};

use crate::display::{TransferBar, format_bytes, heading, note, success, warning};
use crate::settings::Settings;

/// Run the install command.
pub async fn run(installer: &Installer, settings: &Settings, packages: &[String]) -> Result<(), Error> {
    for name in packages {
        validate_package_name(name)?;
    }

    let start = Instant::now();
    let mut changed = 0;

    for name in packages {
        let bar = TransferBar::start(name, settings.quiet());
        let result = installer
            .install(name, settings.force, Some(bar.progress()))
            .await;
        bar.finish();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Error::Frozen { name }) => {
                warning(format!(
                    "{} is frozen, use {} to upgrade it anyway",
                    name,
                    style("--force").cyan()
                ));
                continue;
            }
            Err(e) => return Err(e),
        };

        match outcome {
            InstallOutcome::Installed {
                name,
                version,
                bucket,
            } => {
                success(format!(
                    "{} {} installed from {}",
                    style(name).bold(),
                    style(version).green(),
                    bucket
                ));
                changed += 1;
            }
            InstallOutcome::Upgraded {
                name,
                from,
                to,
                bucket,
            } => {
                success(format!(
                    "{} {} → {} ({})",
                    style(name).bold(),
                    style(from).red(),
                    style(to).green(),
                    bucket
                ));
                changed += 1;
            }
            InstallOutcome::UpToDate { name, version } => {
                note(format!("{} {} is already up to date", name, version));
            }
        }
    }

    if changed > 0 {
        heading(format!(
            "Installed {} packages in {:.2}s",
            style(changed).green().bold(),
            start.elapsed().as_secs_f64()
        ));
    }
    Ok(())
}

/// Run the uninstall command.
pub fn run_uninstall(installer: &Installer, settings: &Settings, packages: &[String]) -> Result<(), Error> {
    for name in packages {
        validate_package_name(name)?;
        match installer.uninstall(name, settings.force_delete)? {
            Some(lock) => success(format!(
                "{} {} uninstalled",
                style(name).bold(),
                lock.version
            )),
            None => success(format!("{} removed", style(name).bold())),
        }
    }
    Ok(())
}

/// Run the cleancache command.
pub fn run_cleancache(installer: &Installer) -> Result<(), Error> {
    let result = installer.clean_cache()?;
    if result.files_removed == 0 {
        println!("Download cache is already empty.");
    } else {
        success(format!(
            "Removed {} files, freed {}",
            result.files_removed,
            format_bytes(result.bytes_freed)
        ));
    }
    Ok(())
}

/// Package names become directory and lock file names.
pub fn validate_package_name(name: &str) -> Result<(), Error> {
    sk_core::validate_name("package", name)
}
