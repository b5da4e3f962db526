//! Ledger operations: purchases, payments, admin cash, roster upkeep.
//!
//! Every operation runs under the broker's lock and reads fresh records
//! from the store, so concurrent callers (kiosk UI, remote admin, a
//! background job) are totally ordered. Subscribers are notified after the
//! lock is released.
//!
//! Operations spanning several records (a payment touches the drinker and
//! the admin cash file; `delete_inactive` and `resave_all_drinkers` walk
//! many drinkers) are not atomic: a failure part way leaves the records
//! already written in place.

use crate::core::broker::Broker;
use crate::core::config::{self, LedgerConfig};
use crate::core::error::LedgerError;
use crate::core::events::{EventBus, LedgerEvent, LedgerEventKind};
use crate::core::external_action::{
    CommandDirectorySource, DirectorySource, GitVcs, LocalOnlyVcs, Vcs,
};
use crate::core::output;
use crate::core::scheduler::{CommitScheduler, CommitTask, TaskKind};
use crate::core::schemas::{AdminCashPosition, Catalog, Drinker, Purchase};
use crate::core::store::Store;
use crate::plugins::directory;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

const MAX_SUGGESTIONS: usize = 3;

pub struct Ledger {
    store: Store,
    config: LedgerConfig,
    broker: Arc<Broker>,
    scheduler: CommitScheduler,
    catalog: RwLock<Arc<Catalog>>,
    admin_cash: RwLock<Arc<AdminCashPosition>>,
    events: EventBus,
    directory: Box<dyn DirectorySource>,
}

impl Ledger {
    /// Open a store with its own `config/kiosk.toml`, committing with git
    /// and querying the configured directory command.
    pub fn open(root: &Path) -> Result<Self, LedgerError> {
        let store = Store::new(root);
        let config = config::load_config(&store.config_path())?;
        let vcs: Arc<dyn Vcs> = if config.commit.enabled {
            if !root.join(".git").exists() {
                return Err(LedgerError::ConfigError(format!(
                    "{} is not a git work tree (set commit.enabled = false to run without history)",
                    root.display()
                )));
            }
            Arc::new(GitVcs::new(&config.commit.git, root))
        } else {
            Arc::new(LocalOnlyVcs)
        };
        let directory = Box::new(CommandDirectorySource {
            argv: config.directory.command.clone(),
            cwd: root.to_path_buf(),
        });
        Self::open_with(root, config, vcs, directory)
    }

    pub fn open_with(
        root: &Path,
        config: LedgerConfig,
        vcs: Arc<dyn Vcs>,
        directory: Box<dyn DirectorySource>,
    ) -> Result<Self, LedgerError> {
        if !root.is_dir() {
            return Err(LedgerError::ValidationError(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        let store = Store::new(root);
        store.init_layout()?;

        let broker = Arc::new(Broker::new(store.read_roster()?));
        let catalog = store.read_catalog()?;
        let admin_cash = store.read_admin_cash()?.unwrap_or_default();
        let scheduler = CommitScheduler::start(Arc::clone(&broker), vcs)?;

        tracing::info!(
            root = %root.display(),
            roster = broker.roster().len(),
            items = catalog.items().len(),
            "ledger opened"
        );

        Ok(Self {
            store,
            config,
            broker,
            scheduler,
            catalog: RwLock::new(Arc::new(catalog)),
            admin_cash: RwLock::new(Arc::new(admin_cash)),
            events: EventBus::default(),
            directory,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &CommitScheduler {
        &self.scheduler
    }

    /// Active, directory-confirmed drinkers.
    pub fn roster(&self) -> Arc<Vec<String>> {
        self.broker.roster()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    pub fn subscribe(&self) -> flume::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Run every pending commit now and stop the commit worker.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    // ----- record store -----

    /// Strict lookup: the record must exist.
    pub fn load_drinker(&self, name: &str) -> Result<Drinker, LedgerError> {
        self.broker.with_lock("drinker.load", || {
            match self.store.read_drinker(name)? {
                Some(d) => Ok(d),
                None => Err(LedgerError::NotFound {
                    what: format!("drinker {:?}", name),
                    suggestions: suggest(name, &self.known_identities()?),
                }),
            }
        })
    }

    /// Lookup that yields a zero-valued drinker when no record exists yet.
    pub fn load_drinker_or_default(&self, name: &str) -> Result<Drinker, LedgerError> {
        self.broker.with_lock("drinker.load_or_default", || {
            Ok(self
                .store
                .read_drinker(name)?
                .unwrap_or_else(|| Drinker::new(name)))
        })
    }

    /// Roster members (or anyone, if configured) get a record on first use.
    fn load_for_update(&self, name: &str) -> Result<Drinker, LedgerError> {
        if self.config.allow_unknown_drinkers || self.broker.is_active(name) {
            self.load_drinker_or_default(name)
        } else {
            self.load_drinker(name)
        }
    }

    pub fn save_drinker(&self, drinker: &Drinker) -> Result<(), LedgerError> {
        self.broker.with_lock("drinker.save", || {
            self.store.write_drinker(drinker)?;
            self.schedule_commit(TaskKind::CommitDrinkers, false);
            Ok(())
        })
    }

    fn load_admin_cash(&self) -> Result<AdminCashPosition, LedgerError> {
        self.broker.with_lock("admin.load", || {
            Ok(self.store.read_admin_cash()?.unwrap_or_default())
        })
    }

    pub fn save_admin_cash(&self, state: &AdminCashPosition) -> Result<(), LedgerError> {
        self.broker.with_lock("admin.save", || {
            self.store.write_admin_cash(state)?;
            *self.admin_cash.write() = Arc::new(state.clone());
            self.schedule_commit(TaskKind::CommitAdminCash, false);
            Ok(())
        })
    }

    fn schedule_commit(&self, kind: TaskKind, immediate: bool) {
        let paths = match kind {
            TaskKind::CommitDrinkers => vec![self.store.drinkers_dir()],
            TaskKind::CommitAdminCash => vec![self.store.admin_dir()],
        };
        let task = if immediate {
            CommitTask::immediate(kind, paths)
        } else {
            CommitTask::new(kind, paths, self.config.commit.default_wait())
        };
        self.scheduler.schedule(task);
    }

    /// Roster plus every persisted drinker.
    fn known_identities(&self) -> Result<Vec<String>, LedgerError> {
        let mut known: BTreeSet<String> = self.broker.roster().iter().cloned().collect();
        known.extend(self.store.list_drinker_names()?);
        Ok(known.into_iter().collect())
    }

    // ----- drinker operations -----

    /// Record `amount` purchases of `item_id`. A negative amount takes
    /// items back off the open tab, never more than are on it; lifetime
    /// counts keep the original purchases.
    pub fn buy_item(&self, name: &str, item_id: &str, amount: i64) -> Result<Drinker, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ValidationError(
                "item amount must not be zero".to_string(),
            ));
        }
        let drinker = self.broker.with_lock("drinker.buy_item", || {
            let price = self
                .catalog()
                .get(item_id)
                .map(|item| item.price)
                .ok_or_else(|| LedgerError::UnknownItem(item_id.to_string()))?;
            let mut drinker = self.load_for_update(name)?;
            drinker.record_purchase(item_id, amount, price)?;
            self.save_drinker(&drinker)?;
            // Bulk and corrective edits go into history right away.
            if amount != 1 {
                self.schedule_commit(TaskKind::CommitDrinkers, true);
            }
            Ok(drinker)
        })?;
        tracing::info!(
            drinker = name,
            item = item_id,
            amount,
            balance = %drinker.credit_balance,
            "item bought"
        );
        self.events
            .publish(LedgerEvent::new(LedgerEventKind::DrinkerUpdated, Some(name)));
        Ok(drinker)
    }

    /// Credit a payment to a drinker; the cash lands with the admin.
    pub fn pay(&self, name: &str, amount: Decimal) -> Result<Drinker, LedgerError> {
        let drinker = self.broker.with_lock("drinker.pay", || {
            let mut drinker = self.load_for_update(name)?;
            drinker.record_payment(amount)?;
            let mut admin = self.load_admin_cash()?;
            admin.adjust(amount)?;

            self.save_drinker(&drinker)?;
            self.schedule_commit(TaskKind::CommitDrinkers, true);
            self.save_admin_cash(&admin)?;
            self.schedule_commit(TaskKind::CommitAdminCash, true);
            Ok(drinker)
        })?;
        tracing::info!(
            drinker = name,
            amount = %amount,
            balance = %drinker.credit_balance,
            "payment recorded"
        );
        self.events
            .publish(LedgerEvent::new(LedgerEventKind::DrinkerUpdated, Some(name)));
        self.events
            .publish(LedgerEvent::new(LedgerEventKind::AdminCashUpdated, Some(name)));
        Ok(drinker)
    }

    // ----- admin cash -----

    /// The house fronts `amount` to `drinker` for an outside purchase.
    pub fn admin_pay(
        &self,
        drinker: &str,
        purchase_description: &str,
        amount: Decimal,
    ) -> Result<AdminCashPosition, LedgerError> {
        let description = purchase_description.trim();
        if description.is_empty() {
            return Err(LedgerError::ValidationError(
                "purchase description must not be empty".to_string(),
            ));
        }
        let state = self.broker.with_lock("admin.pay", || {
            self.load_drinker(drinker)?;
            let mut admin = self.load_admin_cash()?;
            admin.purchases.push(Purchase {
                user: drinker.to_string(),
                description: description.to_string(),
                amount,
            });
            admin.adjust(-amount)?;
            self.save_admin_cash(&admin)?;
            self.schedule_commit(TaskKind::CommitAdminCash, true);
            Ok(admin)
        })?;
        tracing::info!(drinker, amount = %amount, cash = %state.cash_position, "admin paid purchase");
        self.events.publish(LedgerEvent::new(
            LedgerEventKind::AdminCashUpdated,
            Some(drinker),
        ));
        Ok(state)
    }

    /// Overwrite the cash position after counting; describes the change.
    pub fn admin_set_cash_position(&self, amount: Decimal) -> Result<String, LedgerError> {
        let old = self.broker.with_lock("admin.set_cash_position", || {
            let mut admin = self.load_admin_cash()?;
            let old = admin.cash_position;
            admin.cash_position = amount;
            self.save_admin_cash(&admin)?;
            self.schedule_commit(TaskKind::CommitAdminCash, true);
            Ok(old)
        })?;
        let currency = &self.config.currency;
        let summary = format!(
            "Cash position: {} -> {}",
            output::format_money(old, currency),
            output::format_money(amount, currency)
        );
        tracing::info!(old = %old, new = %amount, "cash position set");
        self.events
            .publish(LedgerEvent::new(LedgerEventKind::AdminCashUpdated, None));
        Ok(summary)
    }

    /// Fresh read of the admin cash file.
    pub fn admin_state(&self) -> Result<AdminCashPosition, LedgerError> {
        self.load_admin_cash()
    }

    /// Admin cash as of the last load or save, without touching the disk.
    pub fn admin_state_cached(&self) -> Arc<AdminCashPosition> {
        self.admin_cash.read().clone()
    }

    // ----- listings -----

    /// Every persisted drinker with its balance, by name.
    pub fn drinker_balances(&self) -> Result<Vec<(String, Decimal)>, LedgerError> {
        self.broker.with_lock("drinker.balances", || {
            let mut out = Vec::new();
            for name in self.store.list_drinker_names()? {
                if let Some(d) = self.store.read_drinker(&name)? {
                    out.push((name, d.credit_balance));
                }
            }
            Ok(out)
        })
    }

    /// Drinkers no longer on the roster who owe nothing.
    pub fn inactive_non_negative(&self) -> Result<Vec<(String, Decimal)>, LedgerError> {
        let roster: HashSet<String> = self.roster().iter().cloned().collect();
        Ok(self
            .drinker_balances()?
            .into_iter()
            .filter(|(name, balance)| !roster.contains(name) && *balance >= Decimal::ZERO)
            .collect())
    }

    /// Remove the records of inactive drinkers with non-negative balance.
    ///
    /// Names are handled in order. The first active or indebted name stops
    /// the run with `PreconditionFailed`; its record and every later one is
    /// left alone, earlier deletions stand.
    pub fn delete_inactive(&self, names: &[String]) -> Result<Vec<String>, LedgerError> {
        let mut deleted = Vec::new();
        let result = self.broker.with_lock("drinker.delete_inactive", || {
            for name in names {
                if self.broker.is_active(name) {
                    return Err(LedgerError::PreconditionFailed(format!(
                        "drinker {:?} is still on the roster",
                        name
                    )));
                }
                let drinker = self.load_drinker(name)?;
                if drinker.credit_balance < Decimal::ZERO {
                    return Err(LedgerError::PreconditionFailed(format!(
                        "drinker {:?} has negative balance {}",
                        name, drinker.credit_balance
                    )));
                }
                if self.store.remove_drinker(name)? {
                    deleted.push(name.clone());
                }
            }
            Ok(())
        });
        if !deleted.is_empty() {
            self.schedule_commit(TaskKind::CommitDrinkers, true);
            tracing::info!(count = deleted.len(), ?deleted, "inactive drinkers deleted");
            for name in &deleted {
                self.events.publish(LedgerEvent::new(
                    LedgerEventKind::DrinkerDeleted,
                    Some(name),
                ));
            }
        }
        result.map(|()| deleted)
    }

    /// Rewrite every drinker record in the current encoding. Returns the
    /// number rewritten.
    pub fn resave_all_drinkers(&self) -> Result<usize, LedgerError> {
        self.broker.with_lock("drinker.resave_all", || {
            let mut count = 0;
            for name in self.store.list_drinker_names()? {
                if let Some(d) = self.store.read_drinker(&name)? {
                    self.save_drinker(&d)?;
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    // ----- wholesale reloads -----

    /// Query the directory and replace the roster. On any failure the
    /// stored and in-memory roster stay as they were.
    pub fn sync_roster(&self) -> Result<Vec<String>, LedgerError> {
        let text = self.directory.dump()?;

        let names = self.broker.with_lock("roster.sync", || {
            let exclude: HashSet<String> = self.store.read_exclude_list()?.into_iter().collect();
            let names =
                directory::roster_from_dump(&text, &self.config.directory.expiry_field, &exclude)?;
            self.store.write_roster(&names)?;
            self.broker.replace_roster(names.clone());
            self.schedule_commit(TaskKind::CommitDrinkers, false);
            Ok(names)
        })?;
        tracing::info!(count = names.len(), "roster synced from directory");
        self.events
            .publish(LedgerEvent::new(LedgerEventKind::RosterReplaced, None));
        Ok(names)
    }

    pub fn reload_catalog(&self) -> Result<Arc<Catalog>, LedgerError> {
        let catalog = self.broker.with_lock("catalog.reload", || {
            let catalog = Arc::new(self.store.read_catalog()?);
            *self.catalog.write() = Arc::clone(&catalog);
            Ok(catalog)
        })?;
        tracing::info!(items = catalog.items().len(), "catalog reloaded");
        self.events
            .publish(LedgerEvent::new(LedgerEventKind::CatalogReloaded, None));
        Ok(catalog)
    }

    pub fn reload_admin_cash(&self) -> Result<Arc<AdminCashPosition>, LedgerError> {
        self.broker.with_lock("admin.reload", || {
            let state = Arc::new(self.store.read_admin_cash()?.unwrap_or_default());
            *self.admin_cash.write() = Arc::clone(&state);
            Ok(state)
        })
    }

    /// Directory sync, catalog and admin cash, in that order.
    pub fn reload(&self) -> Result<(), LedgerError> {
        self.sync_roster()?;
        self.reload_catalog()?;
        self.reload_admin_cash()?;
        Ok(())
    }
}

/// Closest candidates to `name` by edit distance, best first.
pub fn suggest(name: &str, candidates: &[String]) -> Vec<String> {
    let needle = name.to_lowercase();
    let limit = (needle.chars().count() / 3).max(1);
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .filter_map(|c| {
            let lower = c.to_lowercase();
            let distance = edit_distance(&needle, &lower);
            if distance <= limit || (!needle.is_empty() && lower.starts_with(&needle)) {
                Some((distance, c))
            } else {
                None
            }
        })
        .collect();
    scored.sort();
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c.clone())
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}
