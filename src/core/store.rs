//! Flat-file store backing the ledger.
//!
//! A store is a directory (normally a git work tree) holding one text
//! record per drinker plus the roster, catalog and admin cash files. This
//! module only does file I/O; locking and commit scheduling live in
//! [`crate::core::broker`] and [`crate::core::scheduler`].

use crate::core::error::LedgerError;
use crate::core::repr;
use crate::core::schemas::{self, AdminCashPosition, BuyItem, Catalog, Drinker};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Handle on a ledger store directory.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

fn drinker_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| match Regex::new(r"^[^./\s\x00][^/\x00\n\r]*$") {
        Ok(re) => re,
        Err(e) => unreachable!("static drinker name pattern: {}", e),
    })
}

/// Drinker names double as file names.
pub fn validate_drinker_name(name: &str) -> Result<(), LedgerError> {
    if drinker_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(LedgerError::ValidationError(format!(
            "invalid drinker name {:?}",
            name
        )))
    }
}

impl Store {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Create the directory skeleton of a fresh store.
    pub fn init_layout(&self) -> Result<(), LedgerError> {
        for dir in [schemas::DRINKER_STATE_DIR, schemas::ADMIN_DIR, "config"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    pub fn drinker_path(&self, name: &str) -> Result<PathBuf, LedgerError> {
        validate_drinker_name(name)?;
        Ok(self
            .root
            .join(schemas::DRINKER_STATE_DIR)
            .join(format!("{}.{}", name, schemas::RECORD_EXT)))
    }

    pub fn drinkers_dir(&self) -> PathBuf {
        self.root.join(schemas::DRINKERS_DIR)
    }

    pub fn roster_path(&self) -> PathBuf {
        self.root.join(schemas::ROSTER_FILE)
    }

    pub fn exclude_list_path(&self) -> PathBuf {
        self.root.join(schemas::EXCLUDE_LIST_FILE)
    }

    pub fn admin_dir(&self) -> PathBuf {
        self.root.join(schemas::ADMIN_DIR)
    }

    pub fn admin_cash_path(&self) -> PathBuf {
        self.root.join(schemas::ADMIN_CASH_FILE)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(schemas::CATALOG_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(schemas::CONFIG_FILE)
    }

    pub fn read_drinker(&self, name: &str) -> Result<Option<Drinker>, LedgerError> {
        let path = self.drinker_path(name)?;
        let drinker: Option<Drinker> = read_record(&path)?;
        if let Some(d) = &drinker {
            if d.name != name {
                return Err(LedgerError::RecordFormat {
                    path,
                    message: format!("record names drinker {:?}", d.name),
                });
            }
        }
        Ok(drinker)
    }

    pub fn write_drinker(&self, drinker: &Drinker) -> Result<PathBuf, LedgerError> {
        let path = self.drinker_path(&drinker.name)?;
        write_record(&path, drinker)?;
        Ok(path)
    }

    /// Returns false when there was no record to remove.
    pub fn remove_drinker(&self, name: &str) -> Result<bool, LedgerError> {
        let path = self.drinker_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all persisted drinker records, sorted.
    pub fn list_drinker_names(&self) -> Result<Vec<String>, LedgerError> {
        let dir = self.root.join(schemas::DRINKER_STATE_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some(schemas::RECORD_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_drinker_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read_admin_cash(&self) -> Result<Option<AdminCashPosition>, LedgerError> {
        read_record(&self.admin_cash_path())
    }

    pub fn write_admin_cash(&self, state: &AdminCashPosition) -> Result<PathBuf, LedgerError> {
        let path = self.admin_cash_path();
        write_record(&path, state)?;
        Ok(path)
    }

    /// A missing catalog file is an empty catalog.
    pub fn read_catalog(&self) -> Result<Catalog, LedgerError> {
        let items: Option<Vec<BuyItem>> = read_record(&self.catalog_path())?;
        Ok(Catalog::new(items.unwrap_or_default()))
    }

    pub fn write_catalog(&self, catalog: &Catalog) -> Result<PathBuf, LedgerError> {
        let path = self.catalog_path();
        write_record(&path, &catalog.items())?;
        Ok(path)
    }

    pub fn read_roster(&self) -> Result<Vec<String>, LedgerError> {
        read_lines(&self.roster_path())
    }

    pub fn write_roster(&self, names: &[String]) -> Result<PathBuf, LedgerError> {
        let mut text = String::new();
        for name in names {
            if name.contains('\n') || name.contains('\r') {
                return Err(LedgerError::ValidationError(format!(
                    "roster entry {:?} contains a line break",
                    name
                )));
            }
            text.push_str(name);
            text.push('\n');
        }
        let path = self.roster_path();
        write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Exclusion list entries; `#` lines and blanks are skipped.
    pub fn read_exclude_list(&self) -> Result<Vec<String>, LedgerError> {
        Ok(read_lines(&self.exclude_list_path())?
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect())
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, LedgerError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LedgerError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    repr::from_str(&text)
        .map(Some)
        .map_err(|e| LedgerError::RecordFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

pub fn write_record<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<(), LedgerError> {
    let text = repr::to_string(&record).map_err(|e| LedgerError::RecordFormat {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    write_atomic(path, text.as_bytes())
}

/// Write to a sibling temp file, then swap it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    let parent = path
        .parent()
        .ok_or_else(|| LedgerError::ValidationError(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.tmp", file_name));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
