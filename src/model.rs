//! Domain types shared by the pairing and commission engines.
//!
//! Ledger rows are immutable once written; the `*Draft` types carry what an
//! engine wants written before storage assigns ids.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source tag written on income rows created by a pairing match.
pub const PAIRING_SOURCE: &str = "pairing";
/// Source tag written on commission rows created by unilevel distribution.
pub const UNILEVEL_SOURCE: &str = "unilevel";

/// Member account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Purchase identifier assigned by the order subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(pub i64);

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot beneath a parent in the binary placement tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a stored side value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid side: {0}")]
pub struct InvalidSide(pub String);

impl FromStr for Side {
    type Err = InvalidSide;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Side::Left),
            "right" | "r" => Ok(Side::Right),
            other => Err(InvalidSide(other.to_string())),
        }
    }
}

/// Calendar month key for maintenance records, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// Returns `None` if `month` is outside 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Error parsing a stored month key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid month key: {0}")]
pub struct InvalidMonthKey(pub String);

impl FromStr for MonthKey {
    type Err = InvalidMonthKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMonthKey(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

/// A member's position in the binary placement tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenealogyNode {
    pub account_id: AccountId,
    pub parent_account_id: Option<AccountId>,
    /// Slot under the parent. `None` only for roots or legacy rows.
    pub side: Option<Side>,
    pub level: u32,
}

impl GenealogyNode {
    pub fn root(account_id: AccountId) -> Self {
        Self {
            account_id,
            parent_account_id: None,
            side: None,
            level: 0,
        }
    }

    pub fn child(account_id: AccountId, parent: &GenealogyNode, side: Side) -> Self {
        Self {
            account_id,
            parent_account_id: Some(parent.account_id),
            side: Some(side),
            level: parent.level + 1,
        }
    }
}

/// Confirmed purchase handed over by the order subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_id: PurchaseId,
    pub buyer_account_id: AccountId,
    pub total: Decimal,
    pub trans_no: String,
}

/// One unmatched half waiting for its opposite side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingQueueEntry {
    pub id: i64,
    pub ancestor_account_id: AccountId,
    pub level: u32,
    pub side: Side,
    pub node_account_id: AccountId,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingHistory {
    pub id: i64,
    pub ancestor_account_id: AccountId,
    pub left_account_id: AccountId,
    pub right_account_id: AccountId,
    pub level: u32,
    pub amount: Decimal,
    pub paired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomeHistory {
    pub id: i64,
    pub ancestor_account_id: AccountId,
    pub pairing_history_id: i64,
    pub amount: Decimal,
    pub source: String,
    pub description: String,
}

/// Monthly spend and activation state for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceRecord {
    pub account_id: AccountId,
    pub month: MonthKey,
    pub total_spent: Decimal,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
}

impl MaintenanceRecord {
    pub fn empty(account_id: AccountId, month: MonthKey) -> Self {
        Self {
            account_id,
            month,
            total_spent: Decimal::ZERO,
            is_active: false,
            activated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commission {
    pub id: i64,
    pub member_account_id: AccountId,
    pub source: String,
    pub amount: Decimal,
    pub level: u32,
    pub percent: Decimal,
    pub purchase_id: PurchaseId,
    pub downline_account_id: AccountId,
    pub trans_no: String,
    pub created_at: DateTime<Utc>,
}

/// Commission row before storage assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionDraft {
    pub member_account_id: AccountId,
    pub amount: Decimal,
    pub level: u32,
    pub percent: Decimal,
    pub purchase_id: PurchaseId,
    pub downline_account_id: AccountId,
    pub trans_no: String,
}

impl CommissionDraft {
    pub fn into_commission(self, id: i64, created_at: DateTime<Utc>) -> Commission {
        Commission {
            id,
            member_account_id: self.member_account_id,
            source: UNILEVEL_SOURCE.to_string(),
            amount: self.amount,
            level: self.level,
            percent: self.percent,
            purchase_id: self.purchase_id,
            downline_account_id: self.downline_account_id,
            trans_no: self.trans_no,
            created_at,
        }
    }
}

/// Resolve a completed pair into (left, right) given the side the arriving
/// node came in on.
pub fn resolve_pair(
    incoming_side: Side,
    incoming: AccountId,
    waiting: AccountId,
) -> (AccountId, AccountId) {
    match incoming_side {
        Side::Left => (incoming, waiting),
        Side::Right => (waiting, incoming),
    }
}

/// Description written on the income row for a pairing match.
pub fn pairing_description(level: u32, left: AccountId, right: AccountId) -> String {
    format!("Pairing bonus level {level} ({left} / {right})")
}
