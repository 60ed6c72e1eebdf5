//! Freeze and unfreeze commands.

use console::style;
use sk_core::Error;

use crate::commands::install::validate_package_name;
use crate::display::{note, success};
use crate::settings::Settings;

pub fn run_freeze(settings: &Settings, packages: &[String]) -> Result<(), Error> {
    for name in packages {
        validate_package_name(name)?;
    }
    let added = settings.profiles().update(|p| p.freeze(packages))?;

    for name in packages {
        if added.contains(name) {
            success(format!("{} frozen", style(name).bold()));
        } else {
            note(format!("{name} was already frozen"));
        }
    }
    Ok(())
}

pub fn run_unfreeze(settings: &Settings, packages: &[String]) -> Result<(), Error> {
    let removed = settings.profiles().update(|p| p.unfreeze(packages))?;

    for name in packages {
        if removed.contains(name) {
            success(format!("{} unfrozen", style(name).bold()));
        } else {
            note(format!("{name} was not frozen"));
        }
    }
    Ok(())
}
