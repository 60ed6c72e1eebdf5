//! skep CLI - a minimal package manager built on weighted buckets.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use sk_core::Error;
use sk_io::{Downloader, HttpClient, Installer};
use tracing::debug;

mod commands;
mod display;
mod settings;

use commands::checksum::Algorithm;
use settings::{Settings, Verbosity, init_tracing, net_config};

#[derive(Parser)]
#[command(name = "sk")]
#[command(about = "skep - A minimal package manager")]
#[command(version, disable_version_flag = true)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: (),

    /// Root directory for skep data
    #[arg(long, global = true, env = "SKEP_ROOT", default_value = "/opt/skep")]
    root: PathBuf,

    /// Profile path (default: <root>/config/skep.json)
    #[arg(short = 'P', long, global = true)]
    profile: Option<PathBuf>,

    /// Send this User-Agent to servers
    #[arg(short = 'A', long, global = true)]
    user_agent: Option<String>,

    /// Allow insecure server connections when using TLS
    #[arg(short = 'k', long, global = true)]
    insecure: bool,

    /// Proxy for https requests
    #[arg(long, global = true, env = "HTTPS_PROXY")]
    https_proxy: Option<String>,

    /// Make the operation more talkative
    #[arg(short = 'V', long, global = true)]
    verbose: bool,

    /// Make the operation more quiet
    #[arg(short = 'Q', long, global = true)]
    quiet: bool,

    /// Trace execution details
    #[arg(short = 'T', long, global = true)]
    trace: bool,

    /// Force mode: upgrade frozen packages, reinstall, overwrite
    #[arg(short = 'F', long, global = true)]
    force: bool,

    /// Remove package directories on uninstall even without a lock
    #[arg(long, global = true)]
    force_delete: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages, upgrading those already installed
    #[command(alias = "i")]
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Uninstall packages
    #[command(alias = "r")]
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// List installed packages
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search bucket snapshots for packages
    Search {
        /// Search query (use /regex/ for regex search)
        query: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Update bucket snapshots
    Update,

    /// Upgrade all upgradeable packages
    Upgrade,

    /// Update bucket snapshots, then upgrade
    #[command(name = "u")]
    UpdateAndUpgrade,

    /// List packages with a newer version in the buckets
    Outdated {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Freeze packages at their installed version
    Freeze {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Allow frozen packages to be upgraded again
    Unfreeze {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Add, delete or list buckets
    Bucket {
        #[command(subcommand)]
        action: BucketAction,
    },

    /// Calculate the SHA256 checksum of files
    Sha256sum {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Calculate the BLAKE3 checksum of files
    B3sum {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove downloaded archives
    Cleancache,

    /// Extract a ZIP archive
    Unzip {
        archive: PathBuf,
        /// Destination (default: archive name without extension)
        dest: Option<PathBuf>,
    },

    /// Extract a tar, tar.gz, tar.bz2, tar.xz or tar.zst archive
    Untar {
        archive: PathBuf,
        /// Destination (default: archive name without extension)
        dest: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BucketAction {
    /// Add a bucket, replacing one with the same name
    Add {
        name: String,
        url: String,
        /// Higher weights win version ties
        #[arg(long, default_value_t = 100)]
        weight: i32,
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a bucket and its local snapshot
    #[command(alias = "delete")]
    Remove { name: String },

    /// List configured buckets
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        let root = self.root.clone();
        let profile = self
            .profile
            .clone()
            .unwrap_or_else(|| sk_io::Layout::new(&root).default_profile());
        Settings {
            profile,
            root,
            net: net_config(
                self.user_agent.clone(),
                self.insecure,
                self.https_proxy.clone(),
            ),
            force: self.force,
            force_delete: self.force_delete,
            verbosity: Verbosity::from_flags(self.quiet, self.verbose, self.trace),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = cli.settings();
    init_tracing(settings.verbosity);

    if let Err(e) = run(cli.command, &settings).await {
        if e.is_canceled() {
            eprintln!("{}", style("canceled").yellow());
        } else {
            eprintln!("{} {}", style("error:").red().bold(), e);
        }
        std::process::exit(1);
    }
}

async fn run(command: Commands, settings: &Settings) -> Result<(), Error> {
    debug!(root = %settings.root.display(), profile = %settings.profile.display(), "settings");

    // Commands that work on local files only
    match &command {
        Commands::Sha256sum { files } => return commands::checksum::run(files, Algorithm::Sha256),
        Commands::B3sum { files } => return commands::checksum::run(files, Algorithm::Blake3),
        Commands::Unzip { archive, dest } => {
            return commands::archive::run_unzip(settings, archive, dest.clone());
        }
        Commands::Untar { archive, dest } => {
            return commands::archive::run_untar(settings, archive, dest.clone());
        }
        Commands::Freeze { packages } => return commands::freeze::run_freeze(settings, packages),
        Commands::Unfreeze { packages } => {
            return commands::freeze::run_unfreeze(settings, packages);
        }
        Commands::Bucket { action } => {
            return match action {
                BucketAction::Add {
                    name,
                    url,
                    weight,
                    description,
                } => commands::bucket::run_add(
                    settings,
                    name.clone(),
                    url.clone(),
                    *weight,
                    description.clone(),
                ),
                BucketAction::Remove { name } => commands::bucket::run_remove(settings, name),
                BucketAction::List { json } => commands::bucket::run_list(settings, *json),
            };
        }
        _ => {}
    }

    let http: Arc<dyn HttpClient> = Arc::new(Downloader::new(&settings.net)?);
    let installer = Installer::new(settings.layout(), http.clone(), settings.profiles());

    match command {
        Commands::Install { packages } => {
            commands::install::run(&installer, settings, &packages).await
        }
        Commands::Uninstall { packages } => {
            commands::install::run_uninstall(&installer, settings, &packages)
        }
        Commands::List { json } => commands::search::run_list(&installer, settings, json),
        Commands::Search { query, json } => {
            commands::search::run_search(&installer, settings, &query, json)
        }
        Commands::Update => commands::bucket::run_update(settings, http).await,
        Commands::Upgrade => commands::upgrade::run_upgrade(&installer, settings).await,
        Commands::UpdateAndUpgrade => {
            commands::bucket::run_update(settings, http).await?;
            commands::upgrade::run_upgrade(&installer, settings).await
        }
        Commands::Outdated { json } => commands::upgrade::run_outdated(&installer, json),
        Commands::Cleancache => commands::install::run_cleancache(&installer),
        Commands::Sha256sum { .. }
        | Commands::B3sum { .. }
        | Commands::Unzip { .. }
        | Commands::Untar { .. }
        | Commands::Freeze { .. }
        | Commands::Unfreeze { .. }
        | Commands::Bucket { .. } => Ok(()),
    }
}
