//! Directory-service dump parsing and roster selection.
//!
//! The dump is LDIF-like text as printed by `ldapsearch`: entries separated
//! by blank lines, `key: value` fields, continuation lines starting with a
//! single space, and `#` comments. A handful of keys may repeat and collect
//! every value; any other repeated key is an error.

use crate::core::error::LedgerError;
use std::collections::{BTreeMap, HashSet};

/// Keys that accumulate a sequence of values.
pub const MULTI_VALUED_KEYS: &[&str] = &["cn", "objectClass", "memberUid", "memberUid:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            FieldValue::Single(v) => Some(v),
            FieldValue::Multi(_) => None,
        }
    }

    fn extend_last(&mut self, more: &str) {
        match self {
            FieldValue::Single(v) => v.push_str(more),
            FieldValue::Multi(values) => {
                if let Some(last) = values.last_mut() {
                    last.push_str(more);
                }
            }
        }
    }
}

/// One parsed entry and the line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub line: usize,
    pub fields: BTreeMap<String, FieldValue>,
}

impl DirectoryEntry {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn uid(&self) -> Option<&str> {
        self.get("uid").and_then(FieldValue::as_single)
    }

    /// The trailing `search`/`result` summary ldapsearch prints.
    fn is_search_result(&self) -> bool {
        self.fields.len() == 2
            && self.fields.contains_key("search")
            && self.fields.contains_key("result")
    }
}

/// The entry being built and the key a continuation line would extend.
struct OpenEntry {
    entry: DirectoryEntry,
    last_key: Option<String>,
}

fn parse_error(line: usize, message: impl Into<String>) -> LedgerError {
    LedgerError::ParseError {
        line,
        message: message.into(),
    }
}

fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = match line.split_once(": ") {
        Some(kv) => kv,
        None => (line.strip_suffix(':')?, ""),
    };
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

fn finish_entry(entry: DirectoryEntry, out: &mut Vec<DirectoryEntry>) -> Result<(), LedgerError> {
    if !entry.fields.contains_key("dn") && !entry.is_search_result() {
        return Err(parse_error(
            entry.line,
            "entry has no dn and is not the search result summary",
        ));
    }
    out.push(entry);
    Ok(())
}

/// Parse dump text into entries, in input order.
pub fn parse_dump(text: &str) -> Result<Vec<DirectoryEntry>, LedgerError> {
    let mut entries = Vec::new();
    let mut open: Option<OpenEntry> = None;
    let mut in_comment = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if line.starts_with('#') {
            in_comment = true;
            continue;
        }
        // A folded comment stays a comment.
        if in_comment && line.starts_with(' ') {
            continue;
        }
        in_comment = false;

        if line.is_empty() {
            if let Some(done) = open.take() {
                finish_entry(done.entry, &mut entries)?;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(' ') {
            let target = open.as_mut().and_then(|o| {
                let key = o.last_key.as_deref()?;
                o.entry.fields.get_mut(key)
            });
            match target {
                Some(value) => value.extend_last(rest),
                None => {
                    return Err(parse_error(
                        line_no,
                        "continuation line without a preceding key",
                    ));
                }
            }
            continue;
        }

        let (key, value) = split_field(line)
            .ok_or_else(|| parse_error(line_no, format!("expected `key: value`, got {:?}", line)))?;

        let current = open.get_or_insert_with(|| OpenEntry {
            entry: DirectoryEntry {
                line: line_no,
                fields: BTreeMap::new(),
            },
            last_key: None,
        });
        let fields = &mut current.entry.fields;

        if MULTI_VALUED_KEYS.contains(&key) {
            if let Some(FieldValue::Multi(values)) = fields.get_mut(key) {
                values.push(value.to_string());
            } else {
                fields.insert(key.to_string(), FieldValue::Multi(vec![value.to_string()]));
            }
        } else if fields.contains_key(key) {
            return Err(parse_error(line_no, format!("duplicate key {:?}", key)));
        } else {
            fields.insert(key.to_string(), FieldValue::Single(value.to_string()));
        }
        current.last_key = Some(key.to_string());
    }

    if let Some(done) = open {
        finish_entry(done.entry, &mut entries)?;
    }
    Ok(entries)
}

/// Uids of entries that are neither expired nor excluded, in input order.
///
/// An entry counts as expired when `expiry_field` holds a nonzero integer.
pub fn select_identities(
    entries: &[DirectoryEntry],
    expiry_field: &str,
    exclude: &HashSet<String>,
) -> Result<Vec<String>, LedgerError> {
    let mut names = Vec::new();
    for entry in entries {
        let Some(uid) = entry.uid() else {
            continue;
        };
        let expired = match entry.get(expiry_field) {
            None => false,
            Some(FieldValue::Single(raw)) => {
                let value: i64 = raw.trim().parse().map_err(|_| {
                    parse_error(
                        entry.line,
                        format!("{} of {:?} is not an integer: {:?}", expiry_field, uid, raw),
                    )
                })?;
                value != 0
            }
            Some(FieldValue::Multi(_)) => {
                return Err(parse_error(
                    entry.line,
                    format!("{} of {:?} has several values", expiry_field, uid),
                ));
            }
        };
        if expired {
            tracing::debug!(uid, "skipping expired account");
            continue;
        }
        if exclude.contains(uid) {
            tracing::debug!(uid, "skipping excluded account");
            continue;
        }
        names.push(uid.to_string());
    }
    Ok(names)
}

/// Parse and filter in one step.
pub fn roster_from_dump(
    text: &str,
    expiry_field: &str,
    exclude: &HashSet<String>,
) -> Result<Vec<String>, LedgerError> {
    let entries = parse_dump(text)?;
    select_identities(&entries, expiry_field, exclude)
}

/// Dump text in the shape `ldapsearch -x` prints, one entry per name.
pub fn render_demo_dump(names: &[String]) -> String {
    let mut out = String::from("# extended LDIF\n#\n# LDAPv3\n#\n\n");
    for name in names {
        out.push_str(&format!(
            "# {}, users\ndn: cn={},ou=users\ncn: {}\nuid: {}\n\n",
            name, name, name, name
        ));
    }
    out.push_str(&format!(
        "# search result\nsearch: 2\nresult: 0 Success\n\n# numResponses: {}\n# numEntries: {}\n",
        names.len() + 1,
        names.len()
    ));
    out
}
