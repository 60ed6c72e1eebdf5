//! Command implementations for the skep CLI.
//!
//! Each submodule handles a specific command or group of related commands.

pub mod archive;
pub mod bucket;
pub mod checksum;
pub mod freeze;
pub mod install;
pub mod search;
pub mod upgrade;
