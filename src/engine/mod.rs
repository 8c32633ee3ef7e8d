//! Compensation engine facade.
//!
//! Two inbound events, each routed to exactly one engine:
//! - `on_member_placed` → [`PairingMatcher`]
//! - `on_purchase_confirmed` → [`CommissionDistributor`]
//!
//! Settings and the clock are read once per event and passed down. Lock
//! contention is retried with backoff; anything else surfaces immediately.

pub mod ancestry;
pub mod commission;
pub mod pairing;

pub use ancestry::{AncestorStep, AncestorWalker, AscentHalt, ParentLink, ParentLookup};
pub use commission::{CommissionDistributor, PurchaseReport};
pub use pairing::{LevelOutcome, PairingMatcher, PlacementReport};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{info, warn};

use crate::config::{CompensationConfig, Config, PairingCommit, RetryConfig};
use crate::error::{EngineError, Result};
use crate::model::{AccountId, GenealogyNode, MonthKey, Purchase};
use crate::storage::{self, init_storage, GenealogyStore, LedgerStore, SettingsStore, Stores};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::retry::contention_backoff;

/// Resolves the compensation settings for one event.
///
/// The administrator's stored row wins; the file/env configuration is the
/// fallback until one is saved.
pub struct SettingsSource {
    store: Arc<dyn SettingsStore>,
    fallback: CompensationConfig,
}

impl SettingsSource {
    pub fn new(store: Arc<dyn SettingsStore>, fallback: CompensationConfig) -> Self {
        Self { store, fallback }
    }

    pub async fn current(&self) -> Result<CompensationConfig> {
        let settings = self
            .store
            .load_settings()
            .await?
            .unwrap_or_else(|| self.fallback.clone());
        settings.validate()?;
        Ok(settings)
    }
}

pub struct CompensationEngine {
    stores: Stores,
    settings: SettingsSource,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    pairing_commit: PairingCommit,
    pairing: PairingMatcher,
    commissions: CommissionDistributor,
}

impl CompensationEngine {
    pub fn new(stores: Stores, config: &Config) -> Self {
        Self {
            settings: SettingsSource::new(stores.settings.clone(), config.compensation.clone()),
            clock: Arc::new(SystemClock),
            retry: config.retry.clone(),
            pairing_commit: config.pairing_commit,
            pairing: PairingMatcher::new(stores.genealogy.clone(), stores.ledger.clone()),
            commissions: CommissionDistributor::new(
                stores.genealogy.clone(),
                stores.ledger.clone(),
            ),
            stores,
        }
    }

    /// Open the configured storage backend and build an engine over it.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let stores = init_storage(&config.storage).await?;
        info!(
            storage = ?config.storage.storage_type,
            pairing_commit = ?config.pairing_commit,
            "Compensation engine ready"
        );
        Ok(Self::new(stores, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn genealogy(&self) -> &Arc<dyn GenealogyStore> {
        &self.stores.genealogy
    }

    /// Query side of the ledger.
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.stores.ledger
    }

    pub fn settings(&self) -> &SettingsSource {
        &self.settings
    }

    /// Handle a newly placed member.
    pub async fn on_member_placed(&self, node: &GenealogyNode) -> Result<PlacementReport> {
        let config = self.settings.current().await?;
        let now = self.clock.now();
        let commit = self.pairing_commit;

        self.with_retry("on_member_placed", || {
            self.pairing
                .handle_new_placement(&config, node, commit, now)
        })
        .await
    }

    /// Handle a confirmed purchase. Must be delivered at most once per
    /// purchase; a repeat fails with a duplicate-posting error.
    pub async fn on_purchase_confirmed(&self, purchase: &Purchase) -> Result<PurchaseReport> {
        let config = self.settings.current().await?;
        let now = self.clock.now();

        self.with_retry("on_purchase_confirmed", || {
            self.commissions
                .distribute_for_purchase(&config, purchase, now)
        })
        .await
    }

    /// Whether an account met the monthly maintenance minimum. Informational
    /// only; neither engine gates payouts on it.
    pub async fn is_active(&self, account: AccountId, month: MonthKey) -> Result<bool> {
        let record = self.stores.ledger.maintenance(account, month).await?;
        Ok(record.is_some_and(|r| r.is_active))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = storage::Result<T>>,
    {
        let mut retries = 0usize;
        let result = attempt
            .retry(contention_backoff(&self.retry))
            .when(|e: &storage::StorageError| e.is_contention())
            .notify(|err: &storage::StorageError, dur: Duration| {
                retries += 1;
                warn!(operation, attempt = retries, error = %err, delay = ?dur, "Lock contention, retrying");
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(source) if source.is_contention() => Err(EngineError::ConcurrencyConflict {
                operation,
                attempts: retries + 1,
                source,
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::model::{PurchaseId, Side};
    use crate::storage::{MockGenealogyStore, MockLedgerStore, StorageError};
    use crate::utils::clock::FixedClock;

    struct Harness {
        genealogy: Arc<MockGenealogyStore>,
        ledger: Arc<MockLedgerStore>,
        engine: CompensationEngine,
    }

    fn harness(retry: RetryConfig) -> Harness {
        let genealogy = Arc::new(MockGenealogyStore::new());
        let ledger = Arc::new(MockLedgerStore::new());
        let stores = Stores {
            genealogy: genealogy.clone(),
            ledger: ledger.clone(),
            settings: ledger.clone(),
        };
        let config = Config {
            retry,
            ..Config::for_test()
        };
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 12, 8, 0, 0).unwrap(),
        ));
        Harness {
            genealogy,
            ledger,
            engine: CompensationEngine::new(stores, &config).with_clock(clock),
        }
    }

    fn fast_retry(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts,
            jitter: false,
        }
    }

    async fn pair_under_root(h: &Harness) -> (GenealogyNode, GenealogyNode) {
        let root = GenealogyNode::root(AccountId(1));
        h.genealogy.place(&root).await.unwrap();
        let left = GenealogyNode::child(AccountId(2), &root, Side::Left);
        let right = GenealogyNode::child(AccountId(3), &root, Side::Right);
        h.genealogy.place(&left).await.unwrap();
        h.genealogy.place(&right).await.unwrap();
        (left, right)
    }

    #[tokio::test]
    async fn test_placement_retries_contention() {
        let h = harness(fast_retry(3));
        let (left, right) = pair_under_root(&h).await;

        h.engine.on_member_placed(&left).await.unwrap();
        h.ledger.set_contention_failures(2).await;
        let report = h.engine.on_member_placed(&right).await.unwrap();
        assert_eq!(report.matches(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_conflict() {
        let h = harness(fast_retry(1));
        let (left, _) = pair_under_root(&h).await;

        h.ledger.set_contention_failures(5).await;
        let err = h.engine.on_member_placed(&left).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            EngineError::ConcurrencyConflict {
                operation: "on_member_placed",
                attempts: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_non_contention_errors_are_not_retried() {
        let h = harness(fast_retry(3));
        h.genealogy.register_account(AccountId(1), None).await.unwrap();
        h.genealogy
            .register_account(AccountId(2), Some(AccountId(1)))
            .await
            .unwrap();
        let purchase = Purchase {
            purchase_id: PurchaseId(7),
            buyer_account_id: AccountId(2),
            total: dec!(100),
            trans_no: "TX-7".to_string(),
        };

        // stored settings take precedence over the config fallback
        let settings = CompensationConfig {
            unilevel_percents: [(1, dec!(10))].into_iter().collect(),
            ..CompensationConfig::default()
        };
        h.ledger.save_settings(&settings).await.unwrap();

        let report = h.engine.on_purchase_confirmed(&purchase).await.unwrap();
        assert_eq!(report.commissions.len(), 1);
        assert_eq!(report.commissions[0].amount, dec!(10));

        let err = h.engine.on_purchase_confirmed(&purchase).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(
            err,
            EngineError::Storage(StorageError::DuplicatePosting(PurchaseId(7)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_stored_settings_fail_fast() {
        let h = harness(fast_retry(0));
        let (left, _) = pair_under_root(&h).await;
        let broken = CompensationConfig {
            pairing_max_level: 0,
            ..CompensationConfig::default()
        };
        h.ledger.save_settings(&broken).await.unwrap();

        let err = h.engine.on_member_placed(&left).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(h.ledger.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_is_active_reports_maintenance() {
        let h = harness(fast_retry(0));
        h.genealogy.register_account(AccountId(5), None).await.unwrap();
        let month = MonthKey::new(2026, 10).unwrap();
        assert!(!h.engine.is_active(AccountId(5), month).await.unwrap());

        let purchase = Purchase {
            purchase_id: PurchaseId(1),
            buyer_account_id: AccountId(5),
            total: dec!(320),
            trans_no: "TX-1".to_string(),
        };
        h.engine.on_purchase_confirmed(&purchase).await.unwrap();
        assert!(h.engine.is_active(AccountId(5), month).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let engine = CompensationEngine::from_config(&Config::for_test()).await.unwrap();
        let settings = engine.settings().current().await.unwrap();
        assert_eq!(settings, CompensationConfig::default());
    }
}
