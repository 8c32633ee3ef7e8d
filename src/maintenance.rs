//! Monthly maintenance ledger.
//!
//! Each (account, month) record accumulates spend and flips to active once
//! the spend reaches the configured minimum. Storage backends run
//! [`MaintenanceLedger::post_spend`] while holding the record's write lock,
//! so the rule lives in one place regardless of backend.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::model::MaintenanceRecord;
use crate::storage::{Result, StorageError};

/// Outcome of adding spend to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendPosting {
    pub record: MaintenanceRecord,
    /// True if this posting flipped the record to active.
    pub activated: bool,
}

/// Applies purchase spend to maintenance records.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceLedger {
    minimum: Decimal,
}

impl MaintenanceLedger {
    pub fn new(minimum: Decimal) -> Self {
        Self { minimum }
    }

    /// Add `spend` to `current` and evaluate activation.
    ///
    /// `total_spent` never decreases: negative spend is treated as zero.
    /// An active record stays active and keeps its original `activated_at`.
    /// A total past the decimal range is rejected and leaves `current` as is.
    pub fn post_spend(
        &self,
        current: MaintenanceRecord,
        spend: Decimal,
        at: DateTime<Utc>,
    ) -> Result<SpendPosting> {
        let mut record = current;
        record.total_spent = record
            .total_spent
            .checked_add(spend.max(Decimal::ZERO))
            .ok_or_else(|| {
                StorageError::AmountOutOfRange(format!(
                    "maintenance total for {} in {} plus {spend}",
                    record.account_id, record.month
                ))
            })?;

        let activated = !record.is_active && record.total_spent >= self.minimum;
        if activated {
            record.is_active = true;
            record.activated_at = Some(at);
            info!(
                account = %record.account_id,
                month = %record.month,
                total_spent = %record.total_spent,
                "Maintenance activated"
            );
        }

        Ok(SpendPosting { record, activated })
    }
}
