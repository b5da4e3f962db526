use drinkledger::core::config::LedgerConfig;
use drinkledger::core::error::LedgerError;
use drinkledger::core::events::LedgerEventKind;
use drinkledger::core::external_action::{StaticDirectorySource, Vcs};
use drinkledger::core::scheduler::TaskKind;
use drinkledger::core::schemas::{BuyItem, Catalog, Drinker};
use drinkledger::core::store::Store;
use drinkledger::plugins::ledger::Ledger;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

#[derive(Default)]
struct RecordingVcs {
    commits: Mutex<Vec<String>>,
}

impl Vcs for RecordingVcs {
    fn commit(&self, _paths: &[PathBuf], message: &str) -> Result<(), LedgerError> {
        self.commits.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct Fixture {
    tmp: TempDir,
    ledger: Ledger,
    vcs: Arc<RecordingVcs>,
}

fn fixture_with(roster: &[&str], config: LedgerConfig) -> Fixture {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    store.init_layout().unwrap();
    store
        .write_catalog(&Catalog::new(vec![
            BuyItem::new("cola", "Cola|Malz", Decimal::ONE),
            BuyItem::new("coffee", "Kaffee", dec!(0.24)),
        ]))
        .unwrap();
    let names: Vec<String> = roster.iter().map(|s| s.to_string()).collect();
    store.write_roster(&names).unwrap();

    let vcs = Arc::new(RecordingVcs::default());
    let ledger = Ledger::open_with(
        tmp.path(),
        config,
        vcs.clone(),
        Box::new(StaticDirectorySource::default()),
    )
    .expect("open ledger");
    Fixture { tmp, ledger, vcs }
}

fn fixture(roster: &[&str]) -> Fixture {
    fixture_with(roster, LedgerConfig::default())
}

fn drinker_file(fx: &Fixture, name: &str) -> PathBuf {
    fx.tmp.path().join(format!("drinkers/state/{}.txt", name))
}

#[test]
fn concurrent_purchases_and_payments_sum_exactly() {
    let fx = fixture(&["alice", "bob"]);
    std::thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                for i in 0..20 {
                    fx.ledger.buy_item("alice", "cola", 1).unwrap();
                    if i % 2 == 0 {
                        fx.ledger.pay("alice", dec!(1.5)).unwrap();
                    }
                }
            });
            s.spawn(|| {
                for _ in 0..20 {
                    fx.ledger.buy_item("bob", "coffee", 1).unwrap();
                }
            });
        }
    });

    let alice = fx.ledger.load_drinker("alice").unwrap();
    let bob = fx.ledger.load_drinker("bob").unwrap();
    assert_eq!(alice.credit_balance, dec!(-10));
    assert_eq!(alice.total_buy_item_counts.get("cola"), Some(&40));
    assert_eq!(bob.credit_balance, dec!(-9.60));
    assert_eq!(bob.buy_item_counts.get("coffee"), Some(&40));
    assert_eq!(fx.ledger.admin_state().unwrap().cash_position, dec!(30));
}

#[test]
fn settling_the_tab_clears_open_counts_only() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "cola", 3).unwrap();

    let partial = fx.ledger.pay("alice", dec!(2)).unwrap();
    assert_eq!(partial.credit_balance, dec!(-1));
    assert_eq!(partial.buy_item_counts.get("cola"), Some(&3));

    let settled = fx.ledger.pay("alice", dec!(1)).unwrap();
    assert_eq!(settled.credit_balance, Decimal::ZERO);
    assert!(settled.buy_item_counts.is_empty());
    assert_eq!(settled.total_buy_item_counts.get("cola"), Some(&3));
    assert_eq!(fx.ledger.load_drinker("alice").unwrap(), settled);
    assert_eq!(fx.ledger.admin_state().unwrap().cash_position, dec!(3));
}

#[test]
fn taking_items_back_keeps_lifetime_counts() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "cola", 2).unwrap();
    let back = fx.ledger.buy_item("alice", "cola", -1).unwrap();
    assert_eq!(back.credit_balance, dec!(-1));
    assert_eq!(back.buy_item_counts.get("cola"), Some(&1));
    assert_eq!(back.total_buy_item_counts.get("cola"), Some(&2));

    let cleared = fx.ledger.buy_item("alice", "cola", -1).unwrap();
    assert!(cleared.buy_item_counts.is_empty());
    assert_eq!(cleared.total_buy_item_counts.get("cola"), Some(&2));
    assert_eq!(fx.ledger.load_drinker("alice").unwrap(), cleared);
}

#[test]
fn taking_back_more_than_the_open_tab_is_refused() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "cola", 1).unwrap();
    fx.ledger.pay("alice", dec!(5)).unwrap();
    let before = fs::read(drinker_file(&fx, "alice")).unwrap();

    assert!(matches!(
        fx.ledger.buy_item("alice", "cola", -1).unwrap_err(),
        LedgerError::ValidationError(_)
    ));
    let alice = fx.ledger.load_drinker("alice").unwrap();
    assert!(alice.buy_item_counts.is_empty());
    assert_eq!(alice.total_buy_item_counts.get("cola"), Some(&1));
    assert_eq!(alice.credit_balance, dec!(4));
    assert_eq!(fs::read(drinker_file(&fx, "alice")).unwrap(), before);
}

#[test]
fn out_of_range_amounts_are_rejected_without_panicking() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "coffee", 1).unwrap();
    let before = fs::read(drinker_file(&fx, "alice")).unwrap();

    for amount in [i64::MIN + 1, i64::MIN, i64::MAX] {
        assert!(matches!(
            fx.ledger.buy_item("alice", "coffee", amount).unwrap_err(),
            LedgerError::ValidationError(_)
        ));
    }
    assert_eq!(fs::read(drinker_file(&fx, "alice")).unwrap(), before);
    assert_eq!(fx.ledger.load_drinker("alice").unwrap().credit_balance, dec!(-0.24));
}

#[test]
fn purchase_validation() {
    let fx = fixture(&["alice"]);
    assert!(matches!(
        fx.ledger.buy_item("alice", "beer", 1).unwrap_err(),
        LedgerError::UnknownItem(item) if item == "beer"
    ));
    assert!(matches!(
        fx.ledger.buy_item("alice", "cola", 0).unwrap_err(),
        LedgerError::ValidationError(_)
    ));
    assert!(!drinker_file(&fx, "alice").exists());
}

#[test]
fn strict_lookup_suggests_near_names() {
    let fx = fixture(&["alice", "bob"]);
    let err = fx.ledger.load_drinker("alise").unwrap_err();
    assert!(err.is_not_found());
    match err {
        LedgerError::NotFound { suggestions, .. } => {
            assert_eq!(suggestions, vec!["alice".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let d = fx.ledger.load_drinker_or_default("alise").unwrap();
    assert_eq!(d, Drinker::new("alise"));
    assert!(!drinker_file(&fx, "alise").exists());
}

#[test]
fn unknown_drinkers_need_a_roster_entry_unless_allowed() {
    let fx = fixture(&["alice"]);
    assert!(fx.ledger.buy_item("mallory", "cola", 1).unwrap_err().is_not_found());
    assert!(fx.ledger.pay("mallory", dec!(5)).unwrap_err().is_not_found());
    assert_eq!(fx.ledger.admin_state().unwrap().cash_position, Decimal::ZERO);

    let open = fixture_with(
        &["alice"],
        LedgerConfig {
            allow_unknown_drinkers: true,
            ..LedgerConfig::default()
        },
    );
    let guest = open.ledger.buy_item("guest", "cola", 1).unwrap();
    assert_eq!(guest.credit_balance, dec!(-1));
    assert!(drinker_file(&open, "guest").exists());
}

#[test]
fn single_purchases_wait_and_bulk_edits_commit_now() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "cola", 1).unwrap();
    let pending = fx.ledger.scheduler().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, TaskKind::CommitDrinkers);
    assert!(pending[0].1 > Duration::from_secs(60));
    assert!(fx.vcs.commits.lock().unwrap().is_empty());

    fx.ledger.buy_item("alice", "cola", 2).unwrap();
    assert!(fx.ledger.scheduler().wait_idle(Duration::from_secs(10)));
    assert_eq!(*fx.vcs.commits.lock().unwrap(), vec!["drinkers update".to_string()]);
}

#[test]
fn payment_commits_both_categories() {
    let fx = fixture(&["alice"]);
    fx.ledger.pay("alice", dec!(10)).unwrap();
    assert!(fx.ledger.scheduler().wait_idle(Duration::from_secs(10)));
    let mut commits = fx.vcs.commits.lock().unwrap().clone();
    commits.sort();
    assert_eq!(commits, vec!["admin cash update", "drinkers update"]);
}

#[test]
fn shutdown_drains_deferred_commits() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "coffee", 1).unwrap();
    assert!(fx.vcs.commits.lock().unwrap().is_empty());
    fx.ledger.shutdown();
    assert_eq!(*fx.vcs.commits.lock().unwrap(), vec!["drinkers update".to_string()]);
    assert!(fx.ledger.scheduler().pending().is_empty());
}

#[test]
fn admin_cash_operations() {
    let fx = fixture(&["alice"]);
    fx.ledger.buy_item("alice", "cola", 1).unwrap();

    let state = fx.ledger.admin_pay("alice", "2 crates", dec!(30.00)).unwrap();
    assert_eq!(state.cash_position, dec!(-30.00));
    assert_eq!(state.purchases.len(), 1);
    assert_eq!(state.purchases[0].user, "alice");
    assert_eq!(*fx.ledger.admin_state_cached(), state);

    assert!(matches!(
        fx.ledger.admin_pay("alice", "  ", dec!(1)).unwrap_err(),
        LedgerError::ValidationError(_)
    ));
    assert!(fx.ledger.admin_pay("nobody", "crate", dec!(1)).unwrap_err().is_not_found());

    let summary = fx.ledger.admin_set_cash_position(dec!(12.50)).unwrap();
    assert_eq!(summary, "Cash position: -30.00€ -> 12.50€");
    let state = fx.ledger.admin_state().unwrap();
    assert_eq!(state.cash_position, dec!(12.50));
    assert_eq!(state.purchases.len(), 1);
}

#[test]
fn delete_inactive_refuses_active_names() {
    let fx = fixture(&["alice"]);
    fx.ledger.pay("alice", dec!(5)).unwrap();
    let before = fs::read(drinker_file(&fx, "alice")).unwrap();

    let err = fx.ledger.delete_inactive(&["alice".to_string()]).unwrap_err();
    assert!(matches!(err, LedgerError::PreconditionFailed(_)));
    assert_eq!(fs::read(drinker_file(&fx, "alice")).unwrap(), before);
}

#[test]
fn delete_inactive_refuses_debtors_and_keeps_earlier_progress() {
    let fx = fixture(&["alice"]);
    let store = fx.ledger.store();
    let mut carol = Drinker::new("carol");
    carol.credit_balance = dec!(2);
    store.write_drinker(&carol).unwrap();
    let mut dave = Drinker::new("dave");
    dave.credit_balance = dec!(-4);
    store.write_drinker(&dave).unwrap();

    assert_eq!(
        fx.ledger.inactive_non_negative().unwrap(),
        vec![("carol".to_string(), dec!(2))]
    );

    let err = fx
        .ledger
        .delete_inactive(&["carol".to_string(), "dave".to_string()])
        .unwrap_err();
    assert!(matches!(err, LedgerError::PreconditionFailed(_)));
    assert!(!drinker_file(&fx, "carol").exists());
    assert!(drinker_file(&fx, "dave").exists());
}

#[test]
fn delete_inactive_removes_records_and_notifies() {
    let fx = fixture(&["alice"]);
    fx.ledger.store().write_drinker(&Drinker::new("carol")).unwrap();
    let events = fx.ledger.subscribe();

    let deleted = fx.ledger.delete_inactive(&["carol".to_string()]).unwrap();
    assert_eq!(deleted, vec!["carol".to_string()]);
    assert!(!drinker_file(&fx, "carol").exists());

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, LedgerEventKind::DrinkerDeleted);
    assert_eq!(event.identity.as_deref(), Some("carol"));

    assert!(fx.ledger.scheduler().wait_idle(Duration::from_secs(10)));
    assert_eq!(*fx.vcs.commits.lock().unwrap(), vec!["drinkers update".to_string()]);
}

#[test]
fn subscribers_hear_about_balance_changes() {
    let fx = fixture(&["alice"]);
    let events = fx.ledger.subscribe();

    fx.ledger.buy_item("alice", "cola", 1).unwrap();
    fx.ledger.pay("alice", dec!(1)).unwrap();

    let kinds: Vec<_> = events.try_iter().map(|e| (e.kind, e.identity)).collect();
    assert_eq!(
        kinds,
        vec![
            (LedgerEventKind::DrinkerUpdated, Some("alice".to_string())),
            (LedgerEventKind::DrinkerUpdated, Some("alice".to_string())),
            (LedgerEventKind::AdminCashUpdated, Some("alice".to_string())),
        ]
    );
}

#[test]
fn failed_operations_publish_nothing() {
    let fx = fixture(&["alice"]);
    let events = fx.ledger.subscribe();
    assert!(fx.ledger.buy_item("alice", "beer", 1).is_err());
    assert!(events.try_recv().is_err());
}

#[test]
fn balances_listing_is_sorted_by_name() {
    let fx = fixture(&["bob", "alice"]);
    fx.ledger.buy_item("bob", "cola", 1).unwrap();
    fx.ledger.pay("alice", dec!(2)).unwrap();
    assert_eq!(
        fx.ledger.drinker_balances().unwrap(),
        vec![("alice".to_string(), dec!(2)), ("bob".to_string(), dec!(-1))]
    );
}

#[test]
fn reload_catalog_picks_up_new_prices() {
    let fx = fixture(&["alice"]);
    fx.ledger
        .store()
        .write_catalog(&Catalog::new(vec![BuyItem::new("cola", "Cola", dec!(1.20))]))
        .unwrap();
    assert_eq!(fx.ledger.catalog().items().len(), 2);

    let catalog = fx.ledger.reload_catalog().unwrap();
    assert_eq!(catalog.items().len(), 1);
    let alice = fx.ledger.buy_item("alice", "cola", 1).unwrap();
    assert_eq!(alice.credit_balance, dec!(-1.20));
    assert!(matches!(
        fx.ledger.buy_item("alice", "coffee", 1).unwrap_err(),
        LedgerError::UnknownItem(_)
    ));
}

#[test]
fn resave_rewrites_records_in_canonical_form() {
    let fx = fixture(&["alice"]);
    let path = drinker_file(&fx, "alice");
    fs::write(
        &path,
        "{\"name\": \"alice\", \"credit_balance\": Decimal('3.5'), \"buy_item_counts\": {}, \"total_buy_item_counts\": {}}",
    )
    .unwrap();

    assert_eq!(fx.ledger.resave_all_drinkers().unwrap(), 1);
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("{'buy_item_counts': {}, 'credit_balance': '3.5'"));
    assert_eq!(fx.ledger.load_drinker("alice").unwrap().credit_balance, dec!(3.5));
}

#[test]
fn open_requires_git_when_commits_are_enabled() {
    let tmp = tempdir().unwrap();
    Store::new(tmp.path()).init_layout().unwrap();
    assert!(matches!(
        Ledger::open(tmp.path()).err(),
        Some(LedgerError::ConfigError(_))
    ));

    fs::write(
        tmp.path().join("config/kiosk.toml"),
        "[commit]\nenabled = false\n",
    )
    .unwrap();
    let ledger = Ledger::open(tmp.path()).unwrap();
    assert!(ledger.roster().is_empty());
    ledger.shutdown();
}
