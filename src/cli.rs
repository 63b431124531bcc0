use clap::{Args, Parser, Subcommand};
use darkroom_config::Config;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "darkroom", version, about = "Organise photos into dated folders, and put them back again")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to the platform
    /// configuration directory.
    #[arg(long, global = true, env = "DARKROOM_CONFIG_FILE", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show what organising SOURCE would do, without changing anything.
    Scan {
        source: PathBuf,
        #[command(flatten)]
        options: OrganizeOptions,
    },
    /// Organise every photo below SOURCE into the library.
    Organize {
        source: PathBuf,
        #[command(flatten)]
        options: OrganizeOptions,
    },
    /// Put every file moved by a run back where it came from.
    Undo {
        /// As shown by `darkroom runs` or printed after organising.
        run_id: i64,
    },
    /// List previous runs, newest first.
    Runs,
    /// Look for runs that were interrupted.
    Check,
}

impl Command {
    pub fn options(&self) -> Option<&OrganizeOptions> {
        match self {
            Self::Scan { options, .. } | Self::Organize { options, .. } => Some(options),
            _ => None,
        }
    }
}

/// Per-invocation overrides of the `library` configuration.
#[derive(Debug, Args)]
pub struct OrganizeOptions {
    /// Library root to organise into.
    #[arg(long, value_name = "DIR")]
    pub dest: Option<PathBuf>,
    /// Folder naming scheme, e.g. `YYYY/MM` or `{{ year }}/{{ camera|slug }}`.
    #[arg(long)]
    pub scheme: Option<String>,
    /// Copy files instead of moving them.
    #[arg(long)]
    pub copy: bool,
    /// Also organise hidden files and folders.
    #[arg(long)]
    pub include_hidden: bool,
}

impl OrganizeOptions {
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(dest) = &self.dest {
            config.library.destination = Some(dest.clone());
        }
        if let Some(scheme) = &self.scheme {
            config.library.scheme = scheme.clone();
        }
        config.library.keep_originals |= self.copy;
        config.library.include_hidden |= self.include_hidden;
    }
}
