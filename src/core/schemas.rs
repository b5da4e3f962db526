//! Record types and the on-disk layout of a ledger store.

use crate::core::error::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DRINKERS_DIR: &str = "drinkers";
pub const DRINKER_STATE_DIR: &str = "drinkers/state";
pub const ROSTER_FILE: &str = "drinkers/list.txt";
pub const EXCLUDE_LIST_FILE: &str = "drinkers/exclude_list.txt";
pub const ADMIN_DIR: &str = "admin";
pub const ADMIN_CASH_FILE: &str = "admin/cash.txt";
pub const CATALOG_FILE: &str = "config/buy_items.txt";
pub const CONFIG_FILE: &str = "config/kiosk.toml";
pub const RECORD_EXT: &str = "txt";

/// One purchasable item of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyItem {
    /// Stable identifier used as key in drinker counts.
    pub intern_name: String,
    /// Label shown on the kiosk.
    pub name: String,
    pub price: Decimal,
}

impl BuyItem {
    pub fn new(intern_name: &str, name: &str, price: Decimal) -> Self {
        Self {
            intern_name: intern_name.to_string(),
            name: name.to_string(),
            price,
        }
    }
}

/// The catalog, loaded and replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    items: Vec<BuyItem>,
}

impl Catalog {
    pub fn new(items: Vec<BuyItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[BuyItem] {
        &self.items
    }

    pub fn get(&self, intern_name: &str) -> Option<&BuyItem> {
        self.items.iter().find(|i| i.intern_name == intern_name)
    }
}

/// A kiosk user with a running tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drinker {
    pub name: String,
    /// Negative means the drinker owes money.
    #[serde(default)]
    pub credit_balance: Decimal,
    /// Items bought since the balance was last brought to zero or above.
    #[serde(default)]
    pub buy_item_counts: BTreeMap<String, i64>,
    /// Items bought over the drinker's lifetime.
    #[serde(default)]
    pub total_buy_item_counts: BTreeMap<String, i64>,
}

impl Drinker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            credit_balance: Decimal::ZERO,
            buy_item_counts: BTreeMap::new(),
            total_buy_item_counts: BTreeMap::new(),
        }
    }

    /// Apply `amount` purchases of `item`. A negative amount takes items
    /// back off the open tab; lifetime counts never go down. Nothing is
    /// changed on error.
    pub(crate) fn record_purchase(
        &mut self,
        item: &str,
        amount: i64,
        unit_price: Decimal,
    ) -> Result<(), LedgerError> {
        let open = self.buy_item_counts.get(item).copied().unwrap_or(0);
        let new_open = open.checked_add(amount).ok_or_else(|| overflow(item))?;
        if new_open < 0 {
            return Err(LedgerError::ValidationError(format!(
                "cannot take back {} x {:?}, only {} on the open tab",
                -i128::from(amount),
                item,
                open
            )));
        }
        let new_total = if amount > 0 {
            let total = self.total_buy_item_counts.get(item).copied().unwrap_or(0);
            Some(total.checked_add(amount).ok_or_else(|| overflow(item))?)
        } else {
            None
        };
        let cost = unit_price
            .checked_mul(Decimal::from(amount))
            .ok_or_else(|| overflow(item))?;
        let new_balance = self
            .credit_balance
            .checked_sub(cost)
            .ok_or_else(|| overflow(item))?;

        if new_open == 0 {
            self.buy_item_counts.remove(item);
        } else {
            self.buy_item_counts.insert(item.to_string(), new_open);
        }
        if let Some(total) = new_total {
            self.total_buy_item_counts.insert(item.to_string(), total);
        }
        self.credit_balance = new_balance;
        Ok(())
    }

    pub(crate) fn record_payment(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        self.credit_balance = self.credit_balance.checked_add(amount).ok_or_else(|| {
            LedgerError::ValidationError(format!("payment of {} overflows the balance", amount))
        })?;
        if self.credit_balance >= Decimal::ZERO {
            self.buy_item_counts.clear();
        }
        Ok(())
    }
}

fn overflow(item: &str) -> LedgerError {
    LedgerError::ValidationError(format!("amount for {:?} is out of range", item))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub user: String,
    pub description: String,
    pub amount: Decimal,
}

/// Physical cash held by the admin, reconciled against drinker payments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCashPosition {
    #[serde(default)]
    pub cash_position: Decimal,
    #[serde(default)]
    pub purchases: Vec<Purchase>,
}

impl AdminCashPosition {
    pub(crate) fn adjust(&mut self, delta: Decimal) -> Result<(), LedgerError> {
        self.cash_position = self.cash_position.checked_add(delta).ok_or_else(|| {
            LedgerError::ValidationError(format!("{} overflows the cash position", delta))
        })?;
        Ok(())
    }
}
