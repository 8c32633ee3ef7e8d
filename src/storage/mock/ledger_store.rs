//! In-memory LedgerStore and SettingsStore.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::config::CompensationConfig;
use crate::maintenance::MaintenanceLedger;
use crate::model::{
    pairing_description, resolve_pair, AccountId, Commission, IncomeHistory, MaintenanceRecord,
    MonthKey, PairingHistory, PairingQueueEntry, PurchaseId, Side, PAIRING_SOURCE,
    UNILEVEL_SOURCE,
};
use crate::storage::{
    ClaimResult, LedgerStore, PairingClaim, PostedPurchase, PurchasePosting, Result,
    SettingsStore, StorageError,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    next_id: i64,
    queue: Vec<PairingQueueEntry>,
    pairings: Vec<PairingHistory>,
    incomes: Vec<IncomeHistory>,
    commissions: Vec<Commission>,
    maintenance: HashMap<(AccountId, MonthKey), MaintenanceRecord>,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_settled(&self, claim: &PairingClaim) -> bool {
        let node = claim.node_account_id;
        let queued = self.queue.iter().any(|e| {
            e.ancestor_account_id == claim.ancestor_account_id
                && e.level == claim.level
                && e.node_account_id == node
        });
        let paired = self.pairings.iter().any(|p| {
            p.ancestor_account_id == claim.ancestor_account_id
                && p.level == claim.level
                && (p.left_account_id == node || p.right_account_id == node)
        });
        queued || paired
    }

    fn settle(&mut self, claim: &PairingClaim) -> ClaimResult {
        if self.is_settled(claim) {
            return ClaimResult::AlreadySettled;
        }

        let opposite = claim.side.opposite();
        let oldest = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.ancestor_account_id == claim.ancestor_account_id
                    && e.level == claim.level
                    && e.side == opposite
            })
            .min_by_key(|(_, e)| (e.inserted_at, e.id))
            .map(|(idx, _)| idx);

        match oldest {
            Some(idx) => {
                let consumed = self.queue.remove(idx);
                let (left, right) =
                    resolve_pair(claim.side, claim.node_account_id, consumed.node_account_id);
                let pairing = PairingHistory {
                    id: self.next_id(),
                    ancestor_account_id: claim.ancestor_account_id,
                    left_account_id: left,
                    right_account_id: right,
                    level: claim.level,
                    amount: claim.amount,
                    paired_at: claim.at,
                };
                let income = IncomeHistory {
                    id: self.next_id(),
                    ancestor_account_id: claim.ancestor_account_id,
                    pairing_history_id: pairing.id,
                    amount: claim.amount,
                    source: PAIRING_SOURCE.to_string(),
                    description: pairing_description(claim.level, left, right),
                };
                self.pairings.push(pairing.clone());
                self.incomes.push(income.clone());
                ClaimResult::Matched {
                    consumed,
                    pairing,
                    income,
                }
            }
            None => {
                let entry = PairingQueueEntry {
                    id: self.next_id(),
                    ancestor_account_id: claim.ancestor_account_id,
                    level: claim.level,
                    side: claim.side,
                    node_account_id: claim.node_account_id,
                    inserted_at: claim.at,
                };
                self.queue.push(entry.clone());
                ClaimResult::Queued(entry)
            }
        }
    }
}

/// Ledger store that keeps every table in memory.
#[derive(Default)]
pub struct MockLedgerStore {
    state: Mutex<LedgerState>,
    settings: RwLock<Option<CompensationConfig>>,
    contention_failures: RwLock<u32>,
    writes_before_outage: RwLock<Option<u32>>,
}

impl MockLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` write operations fail with contention.
    pub async fn set_contention_failures(&self, count: u32) {
        *self.contention_failures.write().await = count;
    }

    /// Let `count` more write operations succeed, then fail every later one
    /// as unavailable until cleared with `None`.
    pub async fn set_outage_after(&self, count: Option<u32>) {
        *self.writes_before_outage.write().await = count;
    }

    /// All waiting halves, across every key.
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    async fn check_write(&self) -> Result<()> {
        let mut remaining = self.contention_failures.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StorageError::Contention("mock lock timeout".to_string()));
        }
        drop(remaining);

        let mut budget = self.writes_before_outage.write().await;
        match budget.as_mut() {
            Some(0) => Err(StorageError::Unavailable("mock write outage".to_string())),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn settle_pairing(&self, claims: &[PairingClaim]) -> Result<Vec<ClaimResult>> {
        self.check_write().await?;

        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let results = claims.iter().map(|claim| draft.settle(claim)).collect();
        *state = draft;
        Ok(results)
    }

    async fn post_purchase(&self, posting: &PurchasePosting) -> Result<PostedPurchase> {
        self.check_write().await?;

        let mut state = self.state.lock().await;
        let mut draft = state.clone();

        let key = (posting.buyer_account_id, posting.month);
        let current = draft
            .maintenance
            .get(&key)
            .cloned()
            .unwrap_or_else(|| MaintenanceRecord::empty(posting.buyer_account_id, posting.month));
        let spend = MaintenanceLedger::new(posting.maintenance_minimum).post_spend(
            current,
            posting.spend,
            posting.at,
        )?;
        draft.maintenance.insert(key, spend.record.clone());

        let mut commissions = Vec::with_capacity(posting.commissions.len());
        for commission in &posting.commissions {
            let duplicate = draft.commissions.iter().any(|c| {
                c.purchase_id == commission.purchase_id
                    && c.level == commission.level
                    && c.source == UNILEVEL_SOURCE
            });
            if duplicate {
                return Err(StorageError::DuplicatePosting(commission.purchase_id));
            }
            let id = draft.next_id();
            let row = commission.clone().into_commission(id, posting.at);
            draft.commissions.push(row.clone());
            commissions.push(row);
        }

        *state = draft;
        Ok(PostedPurchase {
            maintenance: spend.record,
            activated: spend.activated,
            commissions,
        })
    }

    async fn pending_entries(
        &self,
        ancestor: AccountId,
        level: u32,
        side: Side,
    ) -> Result<Vec<PairingQueueEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<PairingQueueEntry> = state
            .queue
            .iter()
            .filter(|e| e.ancestor_account_id == ancestor && e.level == level && e.side == side)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.inserted_at, e.id));
        Ok(entries)
    }

    async fn pairing_history(&self, ancestor: AccountId) -> Result<Vec<PairingHistory>> {
        let state = self.state.lock().await;
        Ok(state
            .pairings
            .iter()
            .filter(|p| p.ancestor_account_id == ancestor)
            .cloned()
            .collect())
    }

    async fn income_history(&self, ancestor: AccountId) -> Result<Vec<IncomeHistory>> {
        let state = self.state.lock().await;
        Ok(state
            .incomes
            .iter()
            .filter(|i| i.ancestor_account_id == ancestor)
            .cloned()
            .collect())
    }

    async fn commissions_for_purchase(&self, purchase: PurchaseId) -> Result<Vec<Commission>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Commission> = state
            .commissions
            .iter()
            .filter(|c| c.purchase_id == purchase)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.level);
        Ok(rows)
    }

    async fn commissions_for_member(&self, member: AccountId) -> Result<Vec<Commission>> {
        let state = self.state.lock().await;
        Ok(state
            .commissions
            .iter()
            .filter(|c| c.member_account_id == member)
            .cloned()
            .collect())
    }

    async fn maintenance(
        &self,
        account: AccountId,
        month: MonthKey,
    ) -> Result<Option<MaintenanceRecord>> {
        let state = self.state.lock().await;
        Ok(state.maintenance.get(&(account, month)).cloned())
    }
}

#[async_trait]
impl SettingsStore for MockLedgerStore {
    async fn load_settings(&self) -> Result<Option<CompensationConfig>> {
        Ok(self.settings.read().await.clone())
    }

    async fn save_settings(&self, settings: &CompensationConfig) -> Result<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}
