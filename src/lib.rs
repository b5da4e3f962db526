//! drinkledger: the ledger behind a self-serve drink kiosk.
//!
//! Every kiosk user ("drinker") has a credit balance and counts of the
//! items they bought. State lives in a directory of small text records that
//! is also a git work tree, so version control is the audit trail. The list
//! of valid users comes from a directory service (LDAP) dump.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All state access routes through [`core::broker::Broker`]:
//! - one reentrant lock serializing every read-modify-write,
//! - the active roster, replaced as a whole.
//!
//! ## Deferred commits
//!
//! Saving a record does not commit. [`core::scheduler::CommitScheduler`]
//! coalesces saves per category into one delayed `git commit`; payments and
//! bulk edits escalate it to run at once. Pending commits are drained on
//! shutdown.
//!
//! ## Record encoding
//!
//! [`core::repr`] writes records with sorted keys and one element per line
//! for larger collections so history diffs stay small. Records are data
//! only.
//!
//! # Store layout
//!
//! ```text
//! <root>/
//!   config/kiosk.toml         settings
//!   config/buy_items.txt      catalog
//!   drinkers/list.txt         roster, one name per line
//!   drinkers/exclude_list.txt names never put on the roster
//!   drinkers/state/<name>.txt one record per drinker
//!   admin/cash.txt            admin cash position
//! ```
//!
//! # Examples
//!
//! ```bash
//! drinkledger init --dir /srv/kiosk-db && git -C /srv/kiosk-db init
//! drinkledger sync-roster
//! drinkledger drinker buy-item alice cola
//! drinkledger drinker pay alice 5
//! drinkledger balances
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store, encoding, locking, commit scheduling, config, logging
//! - [`plugins`]: directory sync and ledger operations

pub(crate) mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{AdminCommand, Cli, Command, DrinkerCommand, LedgerCommand, OutputFormat};
use crate::core::error::LedgerError;
use crate::core::schemas::{BuyItem, Catalog};
use crate::core::store::{self, Store};
use crate::core::{config, logging, output};
use crate::plugins::directory;
use crate::plugins::ledger::Ledger;

use clap::Parser;
use colored::Colorize;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};

fn find_store_root(start_dir: &Path) -> Result<PathBuf, LedgerError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(crate::core::schemas::DRINKERS_DIR).is_dir() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(LedgerError::NotFound {
                what: "'drinkers' directory in current or parent directories (run `drinkledger init` or pass --root)".to_string(),
                suggestions: Vec::new(),
            });
        }
    }
}

fn default_catalog() -> Catalog {
    Catalog::new(vec![
        BuyItem::new("water", "Wasser", Decimal::ONE),
        BuyItem::new("cola", "Cola|Malz", Decimal::ONE),
        BuyItem::new("coffee", "Kaffee", Decimal::new(24, 2)),
    ])
}

fn init_store(dir: Option<PathBuf>) -> Result<(), LedgerError> {
    let dir = match dir {
        Some(d) => d,
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&dir)?;
    let store = Store::new(&fs::canonicalize(&dir)?);
    store.init_layout()?;

    let config_path = store.config_path();
    if !config_path.exists() {
        let text = toml::to_string_pretty(&config::LedgerConfig::default())
            .map_err(|e| LedgerError::ConfigError(e.to_string()))?;
        store::write_atomic(&config_path, text.as_bytes())?;
    }
    if !store.catalog_path().exists() {
        store.write_catalog(&default_catalog())?;
    }
    for path in [store.roster_path(), store.exclude_list_path()] {
        if !path.exists() {
            store::write_atomic(&path, b"")?;
        }
    }

    println!("{} Store ready at {}", "✓".bright_green(), store.root.display());
    if !store.root.join(".git").exists() {
        println!(
            "  Run {} (or set commit.enabled = false in {})",
            format!("git -C {} init", store.root.display()).bright_cyan(),
            crate::core::schemas::CONFIG_FILE
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), LedgerError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| LedgerError::ValidationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn print_balances(balances: &[(String, Decimal)]) {
    for (name, balance) in balances {
        let line = output::format_balances(&[(name.clone(), *balance)]);
        if *balance < Decimal::ZERO {
            println!("{}", line.bright_red());
        } else {
            println!("{}", line);
        }
    }
}

fn dispatch(ledger: &Ledger, command: LedgerCommand) -> Result<(), LedgerError> {
    let currency = ledger.config().currency.clone();
    match command {
        LedgerCommand::Balances { format } => {
            let balances = ledger.drinker_balances()?;
            match format {
                OutputFormat::Text => print_balances(&balances),
                OutputFormat::Json => print_json(
                    &balances
                        .into_iter()
                        .collect::<std::collections::BTreeMap<_, _>>(),
                )?,
            }
        }
        LedgerCommand::Items { format } => {
            let catalog = ledger.catalog();
            match format {
                OutputFormat::Text => {
                    for item in catalog.items() {
                        println!(
                            "{}: {} ({})",
                            item.intern_name,
                            output::format_money(item.price, &currency),
                            item.name
                        );
                    }
                }
                OutputFormat::Json => print_json(&catalog.items())?,
            }
        }
        LedgerCommand::Drinker(drinker_cli) => match drinker_cli.command {
            DrinkerCommand::State { name, format } => {
                let drinker = ledger.load_drinker(&name)?;
                match format {
                    OutputFormat::Text => println!("{}", output::format_drinker(&drinker, &currency)),
                    OutputFormat::Json => print_json(&drinker)?,
                }
            }
            DrinkerCommand::Pay { name, amount } => {
                let drinker = ledger.pay(&name, amount)?;
                println!("{}", output::format_drinker(&drinker, &currency));
            }
            DrinkerCommand::BuyItem { name, item, amount } => {
                let drinker = ledger.buy_item(&name, &item, amount)?;
                println!("{}", output::format_drinker(&drinker, &currency));
            }
        },
        LedgerCommand::Admin(admin_cli) => match admin_cli.command {
            AdminCommand::State { format } => {
                let state = ledger.admin_state()?;
                match format {
                    OutputFormat::Text => {
                        println!("{}", output::format_admin_state(&state, &currency, 20))
                    }
                    OutputFormat::Json => print_json(&state)?,
                }
            }
            AdminCommand::Pay {
                name,
                purchase,
                amount,
            } => {
                let state = ledger.admin_pay(&name, &purchase, amount)?;
                println!("{}", output::format_admin_state(&state, &currency, 5));
            }
            AdminCommand::SetCash { amount } => {
                println!("{}", ledger.admin_set_cash_position(amount)?);
            }
        },
        LedgerCommand::DeleteInactive { yes } => {
            let candidates = ledger.inactive_non_negative()?;
            if candidates.is_empty() {
                println!("Inactive users with non-negative balance: (none)");
                return Ok(());
            }
            println!("Inactive users with non-negative balance:");
            print_balances(&candidates);
            if !yes {
                println!("Not deleting. Re-run with {} to delete.", "--yes".bright_cyan());
                return Ok(());
            }
            let names: Vec<String> = candidates.into_iter().map(|(n, _)| n).collect();
            let deleted = ledger.delete_inactive(&names)?;
            println!("{} Deleted {} drinker(s).", "✓".bright_green(), deleted.len());
        }
        LedgerCommand::SyncRoster => {
            let names = ledger.sync_roster()?;
            println!("Found {} users.", names.len());
        }
        LedgerCommand::Reload => {
            ledger.reload()?;
            println!(
                "{} Reloaded roster ({}), catalog ({}), admin cash.",
                "✓".bright_green(),
                ledger.roster().len(),
                ledger.catalog().items().len()
            );
        }
        LedgerCommand::Resave => {
            let count = ledger.resave_all_drinkers()?;
            println!("Rewrote {} drinker record(s).", count);
        }
    }
    Ok(())
}

pub fn run() -> Result<(), LedgerError> {
    let cli = Cli::parse();
    if let Err(e) = logging::init_logging(&cli.log_level, cli.log_format) {
        eprintln!("Warning: logging not initialized: {}", e);
    }

    match cli.command {
        Command::Init { dir } => init_store(dir),
        Command::DemoDump { list } => {
            let names: Vec<String> = fs::read_to_string(&list)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect();
            print!("{}", directory::render_demo_dump(&names));
            Ok(())
        }
        Command::Ledger(command) => {
            let root = match cli.root {
                Some(root) => root,
                None => find_store_root(&std::env::current_dir()?)?,
            };
            let ledger = Ledger::open(&root)?;
            let result = dispatch(&ledger, command);
            ledger.shutdown();
            result
        }
    }
}
