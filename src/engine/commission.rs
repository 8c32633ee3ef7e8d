//! Unilevel commissions and maintenance spend.
//!
//! A confirmed purchase pays a percentage of its total to each sponsor
//! ancestor of the buyer and adds the total to the buyer's monthly spend. The
//! store applies both in one transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::CompensationConfig;
use crate::model::{Commission, CommissionDraft, MaintenanceRecord, MonthKey, Purchase, PurchaseId};
use crate::storage::{GenealogyStore, LedgerStore, PurchasePosting, Result, StorageError};

use super::ancestry::{AncestorWalker, AscentHalt, SponsorTree};

/// Result of handling one purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReport {
    pub purchase_id: PurchaseId,
    /// Buyer's record for the purchase month, after this posting.
    pub maintenance: MaintenanceRecord,
    /// True if this purchase made the buyer active for the month.
    pub activated: bool,
    pub commissions: Vec<Commission>,
    /// `None` when the total was zero and the sponsor chain was not walked.
    pub halt: Option<AscentHalt>,
}

impl PurchaseReport {
    pub fn total_paid(&self) -> Decimal {
        self.commissions.iter().map(|c| c.amount).sum()
    }
}

pub struct CommissionDistributor {
    genealogy: Arc<dyn GenealogyStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl CommissionDistributor {
    pub fn new(genealogy: Arc<dyn GenealogyStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { genealogy, ledger }
    }

    /// Pay unilevel commissions for `purchase` and post its spend.
    ///
    /// Every commission row and the maintenance update commit together. A
    /// second call for the same purchase fails with
    /// [`StorageError::DuplicatePosting`](crate::storage::StorageError::DuplicatePosting)
    /// when the first one wrote commissions.
    pub async fn distribute_for_purchase(
        &self,
        config: &CompensationConfig,
        purchase: &Purchase,
        now: DateTime<Utc>,
    ) -> Result<PurchaseReport> {
        let total = if purchase.total.is_sign_negative() {
            warn!(
                purchase = %purchase.purchase_id,
                total = %purchase.total,
                "Negative purchase total, treating as zero"
            );
            Decimal::ZERO
        } else {
            purchase.total
        };

        let (drafts, halt) = if total.is_zero() {
            (Vec::new(), None)
        } else {
            let (drafts, halt) = self.draft_commissions(config, purchase, total).await?;
            (drafts, Some(halt))
        };

        let posting = PurchasePosting {
            purchase_id: purchase.purchase_id,
            buyer_account_id: purchase.buyer_account_id,
            month: MonthKey::of(now),
            spend: total,
            maintenance_minimum: config.maintenance_minimum,
            commissions: drafts,
            at: now,
        };
        let posted = self.ledger.post_purchase(&posting).await?;

        let report = PurchaseReport {
            purchase_id: purchase.purchase_id,
            maintenance: posted.maintenance,
            activated: posted.activated,
            commissions: posted.commissions,
            halt,
        };

        info!(
            purchase = %purchase.purchase_id,
            buyer = %purchase.buyer_account_id,
            total = %total,
            commissions = report.commissions.len(),
            paid = %report.total_paid(),
            "Purchase distributed"
        );
        Ok(report)
    }

    /// Walk the sponsor chain and compute one draft per paying level.
    ///
    /// The running sum is capped at `total * share / 100`, floored to the
    /// minor unit; a level that would cross it is trimmed to the remainder.
    async fn draft_commissions(
        &self,
        config: &CompensationConfig,
        purchase: &Purchase,
        total: Decimal,
    ) -> Result<(Vec<CommissionDraft>, AscentHalt)> {
        let ceiling = config.floor_money(percent_of(purchase, total, config.unilevel_share())?);
        let mut paid = Decimal::ZERO;
        let mut drafts = Vec::new();

        let sponsors = SponsorTree::new(self.genealogy.clone());
        let mut walker =
            AncestorWalker::start(&sponsors, purchase.buyer_account_id, config.unilevel_max_level)
                .await?;

        while let Some(step) = walker.next_ancestor().await? {
            let percent = config.unilevel_percent(step.level);
            if percent.is_zero() {
                continue;
            }

            let mut amount = config.round_money(percent_of(purchase, total, percent)?);
            if paid + amount > ceiling {
                amount = config.floor_money((ceiling - paid).max(Decimal::ZERO));
                debug!(
                    purchase = %purchase.purchase_id,
                    level = step.level,
                    amount = %amount,
                    "Commission trimmed to payout ceiling"
                );
            }
            if amount.is_zero() {
                continue;
            }

            paid += amount;
            drafts.push(CommissionDraft {
                member_account_id: step.ancestor,
                amount,
                level: step.level,
                percent,
                purchase_id: purchase.purchase_id,
                downline_account_id: purchase.buyer_account_id,
                trans_no: purchase.trans_no.clone(),
            });
        }

        let halt = walker.halt().unwrap_or(AscentHalt::Root);
        Ok((drafts, halt))
    }
}

fn percent_of(purchase: &Purchase, total: Decimal, percent: Decimal) -> Result<Decimal> {
    total
        .checked_mul(percent)
        .map(|scaled| scaled / Decimal::ONE_HUNDRED)
        .ok_or_else(|| {
            StorageError::AmountOutOfRange(format!(
                "{percent}% of purchase {} total {total}",
                purchase.purchase_id
            ))
        })
}
