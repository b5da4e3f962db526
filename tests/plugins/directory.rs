use drinkledger::core::config::LedgerConfig;
use drinkledger::core::error::LedgerError;
use drinkledger::core::events::LedgerEventKind;
use drinkledger::core::external_action::{DirectorySource, LocalOnlyVcs};
use drinkledger::core::store::Store;
use drinkledger::plugins::directory::{self, FieldValue};
use drinkledger::plugins::ledger::Ledger;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const TWO_ACCOUNTS: &str = "\
# extended LDIF
#
# LDAPv3
# base <dc=example> with scope subtree
#

# alice, users, example
dn: uid=alice,ou=users,dc=example
objectClass: posixAccount
objectClass: shadowAccount
cn: Alice
uid: alice
shadowExpire: 0

# bob, users, example
dn: uid=bob,ou=users,dc=example
objectClass: posixAccount
cn: Bob
uid: bob
shadowExpire: 1

# search result
search: 2
result: 0 Success

# numResponses: 3
# numEntries: 2
";

/// Serves whatever text the test puts in, so one ledger can see a good dump
/// and then a broken one.
#[derive(Clone)]
struct SwappableSource {
    text: Arc<Mutex<Result<String, String>>>,
}

impl Default for SwappableSource {
    fn default() -> Self {
        Self {
            text: Arc::new(Mutex::new(Ok(String::new()))),
        }
    }
}

impl SwappableSource {
    fn set(&self, text: &str) {
        *self.text.lock().unwrap() = Ok(text.to_string());
    }

    fn fail(&self, detail: &str) {
        *self.text.lock().unwrap() = Err(detail.to_string());
    }
}

impl DirectorySource for SwappableSource {
    fn dump(&self) -> Result<String, LedgerError> {
        self.text
            .lock()
            .unwrap()
            .clone()
            .map_err(|detail| LedgerError::ExternalCommandFailure {
                command: "ldapsearch -x".to_string(),
                detail,
            })
    }
}

fn open(root: &Path, source: &SwappableSource) -> Ledger {
    Ledger::open_with(
        root,
        LedgerConfig::default(),
        Arc::new(LocalOnlyVcs),
        Box::new(source.clone()),
    )
    .expect("open ledger")
}

#[test]
fn expired_accounts_are_dropped() {
    let roster = directory::roster_from_dump(TWO_ACCOUNTS, "shadowExpire", &HashSet::new()).unwrap();
    assert_eq!(roster, vec!["alice".to_string()]);
}

#[test]
fn excluded_accounts_are_dropped() {
    let dump = directory::render_demo_dump(&[
        "alice".to_string(),
        "backup".to_string(),
        "carol".to_string(),
    ]);
    let exclude: HashSet<String> = ["backup".to_string()].into_iter().collect();
    let roster = directory::roster_from_dump(&dump, "shadowExpire", &exclude).unwrap();
    assert_eq!(roster, vec!["alice".to_string(), "carol".to_string()]);
}

#[test]
fn multi_valued_keys_collect_every_value() {
    let entries = directory::parse_dump(TWO_ACCOUNTS).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries[0].get("objectClass"),
        Some(&FieldValue::Multi(vec![
            "posixAccount".to_string(),
            "shadowAccount".to_string()
        ]))
    );
    assert_eq!(entries[1].uid(), Some("bob"));
    assert_eq!(entries[1].line, 16);
}

#[test]
fn malformed_dumps_are_parse_errors() {
    let orphan = "dn: cn=a\nuid: a\n\n continued\ndn: cn=b\n";
    assert!(matches!(
        directory::parse_dump(orphan).unwrap_err(),
        LedgerError::ParseError { line: 4, .. }
    ));

    let duplicate = "dn: cn=a\nuid: a\nuid: b\n";
    assert!(matches!(
        directory::parse_dump(duplicate).unwrap_err(),
        LedgerError::ParseError { line: 3, .. }
    ));

    let bad_expiry = "dn: cn=a\nuid: a\nshadowExpire: never\n";
    assert!(matches!(
        directory::roster_from_dump(bad_expiry, "shadowExpire", &HashSet::new()).unwrap_err(),
        LedgerError::ParseError { .. }
    ));
}

#[test]
fn last_entry_without_trailing_blank_line_is_kept() {
    let roster = directory::roster_from_dump(
        "dn: cn=a\nuid: a\n\ndn: cn=b\nuid: b",
        "shadowExpire",
        &HashSet::new(),
    )
    .unwrap();
    assert_eq!(roster, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn sync_replaces_the_stored_roster() {
    let tmp = tempdir().unwrap();
    let source = SwappableSource::default();
    source.set(TWO_ACCOUNTS);
    let ledger = open(tmp.path(), &source);
    let events = ledger.subscribe();

    assert_eq!(ledger.sync_roster().unwrap(), vec!["alice".to_string()]);
    assert_eq!(ledger.roster().as_slice(), ["alice".to_string()]);
    assert_eq!(
        fs::read_to_string(tmp.path().join("drinkers/list.txt")).unwrap(),
        "alice\n"
    );
    assert_eq!(events.try_recv().unwrap().kind, LedgerEventKind::RosterReplaced);

    // A freshly opened ledger starts from the stored roster.
    ledger.shutdown();
    let reopened = open(tmp.path(), &source);
    assert_eq!(reopened.roster().as_slice(), ["alice".to_string()]);
}

#[test]
fn sync_honors_the_exclusion_list() {
    let tmp = tempdir().unwrap();
    Store::new(tmp.path()).init_layout().unwrap();
    fs::write(tmp.path().join("drinkers/exclude_list.txt"), "# bots\nalice\n").unwrap();
    let source = SwappableSource::default();
    source.set(TWO_ACCOUNTS);
    let ledger = open(tmp.path(), &source);

    assert!(ledger.sync_roster().unwrap().is_empty());
    assert!(ledger.roster().is_empty());
}

#[test]
fn failed_sync_keeps_the_previous_roster() {
    let tmp = tempdir().unwrap();
    let source = SwappableSource::default();
    source.set(TWO_ACCOUNTS);
    let ledger = open(tmp.path(), &source);
    ledger.sync_roster().unwrap();
    let roster_file = tmp.path().join("drinkers/list.txt");
    let before = fs::read_to_string(&roster_file).unwrap();

    source.set("dn: cn=carol\nuid: carol\n\n orphan\n");
    assert!(matches!(
        ledger.sync_roster().unwrap_err(),
        LedgerError::ParseError { .. }
    ));
    assert_eq!(ledger.roster().as_slice(), ["alice".to_string()]);
    assert_eq!(fs::read_to_string(&roster_file).unwrap(), before);

    source.set("dn: cn=carol\nuid: carol\nuid: dave\n");
    assert!(matches!(
        ledger.sync_roster().unwrap_err(),
        LedgerError::ParseError { line: 3, .. }
    ));
    assert_eq!(ledger.roster().as_slice(), ["alice".to_string()]);
    assert_eq!(fs::read_to_string(&roster_file).unwrap(), before);

    source.fail("Can't contact LDAP server");
    assert!(matches!(
        ledger.reload().unwrap_err(),
        LedgerError::ExternalCommandFailure { .. }
    ));
    assert_eq!(ledger.roster().as_slice(), ["alice".to_string()]);
    assert_eq!(fs::read_to_string(&roster_file).unwrap(), before);
}
