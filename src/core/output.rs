//! Text rendering helpers for CLI surfaces.
//!
//! Balance listings use `name: amount` lines so admin tooling can parse
//! them back with a single split.

use crate::core::schemas::{AdminCashPosition, Drinker};
use rust_decimal::Decimal;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

pub fn format_money(amount: Decimal, currency: &str) -> String {
    format!("{}{}", amount.round_dp(2), currency)
}

/// One `name: balance` line per drinker.
pub fn format_balances(balances: &[(String, Decimal)]) -> String {
    balances
        .iter()
        .map(|(name, balance)| format!("{}: {}", name, balance))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse the output of [`format_balances`].
#[cfg(test)]
fn parse_balances(text: &str) -> Option<Vec<(String, Decimal)>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (name, amount) = line.rsplit_once(':')?;
            Some((name.to_string(), amount.trim().parse().ok()?))
        })
        .collect()
}

pub fn format_drinker(drinker: &Drinker, currency: &str) -> String {
    let counts = |m: &std::collections::BTreeMap<String, i64>| {
        if m.is_empty() {
            "-".to_string()
        } else {
            m.iter()
                .map(|(k, v)| format!("{} x{}", k, v))
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    format!(
        "{}: balance {}\n  open: {}\n  total: {}",
        drinker.name,
        format_money(drinker.credit_balance, currency),
        counts(&drinker.buy_item_counts),
        counts(&drinker.total_buy_item_counts)
    )
}

/// Cash position followed by the most recent `max_items` purchases.
pub fn format_admin_state(state: &AdminCashPosition, currency: &str, max_items: usize) -> String {
    let mut lines = vec![format!(
        "Cash position: {}",
        format_money(state.cash_position, currency)
    )];
    if state.purchases.is_empty() {
        lines.push("Purchases: (none)".to_string());
        return lines.join("\n");
    }
    lines.push(format!("Purchases ({}):", state.purchases.len()));
    let skip = state.purchases.len().saturating_sub(max_items);
    if skip > 0 {
        lines.push(format!("  ... {} older", skip));
    }
    for p in state.purchases.iter().skip(skip) {
        lines.push(format!(
            "  {}: {} ({})",
            p.user,
            format_money(p.amount, currency),
            compact_line(&p.description, 60)
        ));
    }
    lines.join("\n")
}
