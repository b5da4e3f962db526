//! CLI struct definitions for the drinkledger command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::core::logging::LogFormat;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "drinkledger",
    version = env!("CARGO_PKG_VERSION"),
    about = "Credit and drink-count ledger for a self-serve drink kiosk."
)]
pub(crate) struct Cli {
    /// Store root (defaults to the nearest parent directory with a `drinkers/` folder).
    #[clap(long, global = true, env = "DRINKLEDGER_ROOT")]
    pub root: Option<PathBuf>,
    /// Log level used when DRINKLEDGER_LOG is unset.
    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,
    /// Log output format.
    #[clap(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the store layout and a default config/kiosk.toml
    Init {
        /// Directory to initialize (defaults to current working directory).
        #[clap(short, long)]
        dir: Option<PathBuf>,
    },

    /// Print an ldapsearch-shaped dump for the names in a list file
    DemoDump {
        /// File with one name per line; `#` lines are ignored.
        list: PathBuf,
    },

    #[clap(flatten)]
    Ledger(LedgerCommand),
}

/// Commands that operate on an opened store.
#[derive(Subcommand, Debug)]
pub(crate) enum LedgerCommand {
    /// List every drinker with balance as `name: amount` lines
    Balances {
        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the catalog
    Items {
        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Drinker operations
    Drinker(DrinkerCli),

    /// Admin cash operations
    Admin(AdminCli),

    /// Delete inactive drinkers with non-negative balance
    DeleteInactive {
        /// Actually delete; without it the candidates are only listed.
        #[clap(long)]
        yes: bool,
    },

    /// Query the directory service and replace the roster
    SyncRoster,

    /// Re-sync the roster and reload catalog and admin cash
    Reload,

    /// Rewrite every drinker record in the current encoding
    Resave,
}

#[derive(clap::Args, Debug)]
pub(crate) struct DrinkerCli {
    #[clap(subcommand)]
    pub command: DrinkerCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum DrinkerCommand {
    /// Show balance and counts
    State {
        name: String,
        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Drinker pays money to the admin
    Pay {
        name: String,
        #[clap(allow_hyphen_values = true)]
        amount: Decimal,
    },
    /// Drinker buys an item (negative amount undoes)
    BuyItem {
        name: String,
        item: String,
        #[clap(default_value_t = 1, allow_hyphen_values = true)]
        amount: i64,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct AdminCli {
    #[clap(subcommand)]
    pub command: AdminCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AdminCommand {
    /// Show cash position and recent purchases
    State {
        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Admin gives money to a drinker who bought something for the kiosk
    Pay {
        name: String,
        purchase: String,
        amount: Decimal,
    },
    /// Overwrite the cash position after manual counting
    SetCash {
        #[clap(allow_hyphen_values = true)]
        amount: Decimal,
    },
}
