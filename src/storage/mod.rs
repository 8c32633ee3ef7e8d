//! Storage interfaces and implementations.
//!
//! Three seams:
//! - [`GenealogyStore`]: accounts, sponsorship and the binary placement tree.
//!   Written by the member-management collaborator, read by both engines.
//! - [`LedgerStore`]: pairing queue, pairing/income history, commissions and
//!   maintenance records. Every write is one atomic unit of work.
//! - [`SettingsStore`]: the administrator-edited compensation settings row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::config::{CompensationConfig, StorageConfig, StorageType};
use crate::model::{
    AccountId, Commission, CommissionDraft, GenealogyNode, IncomeHistory, MaintenanceRecord,
    MonthKey, PairingHistory, PairingQueueEntry, PurchaseId, Side,
};

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::{MockGenealogyStore, MockLedgerStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteGenealogyStore, SqliteLedgerStore};

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A lock could not be acquired in time. Retrying the whole unit of work
    /// is safe.
    #[error("Lock contention: {0}")]
    Contention(String),

    #[error("Account not found: {0}")]
    UnknownAccount(AccountId),

    #[error("Account already registered: {0}")]
    AlreadyRegistered(AccountId),

    #[error("Account already placed: {0}")]
    AlreadyPlaced(AccountId),

    #[error("Placement slot taken: parent={parent}, side={side}")]
    SlotTaken { parent: AccountId, side: Side },

    #[error("Commissions already posted for purchase {0}")]
    DuplicatePosting(PurchaseId),

    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether the failure came from lock contention rather than bad data.
    pub fn is_contention(&self) -> bool {
        matches!(self, StorageError::Contention(_))
    }

    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        StorageError::Corrupt {
            table,
            detail: detail.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if sqlite::is_lock_error(&err) {
            StorageError::Contention(err.to_string())
        } else {
            StorageError::Database(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A registered member and the account that sponsored them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: AccountId,
    pub sponsor_account_id: Option<AccountId>,
}

/// Interface for the member relations both engines walk.
///
/// Implementations:
/// - `SqliteGenealogyStore`: SQLite storage
/// - `MockGenealogyStore`: In-memory storage for tests and `memory` mode
#[async_trait]
pub trait GenealogyStore: Send + Sync {
    /// Register a member with an optional sponsor. The sponsor must already
    /// be registered.
    async fn register_account(&self, account: AccountId, sponsor: Option<AccountId>) -> Result<()>;

    /// Fetch an account record. `None` means no such account.
    async fn account(&self, account: AccountId) -> Result<Option<Account>>;

    /// Persist a placement node.
    ///
    /// Rejects a second node for the same account and a second child in the
    /// same (parent, side) slot.
    async fn place(&self, node: &GenealogyNode) -> Result<()>;

    /// Fetch the placement node of an account. `None` means the account was
    /// never placed.
    async fn node(&self, account: AccountId) -> Result<Option<GenealogyNode>>;

    /// Direct children of a parent, left first.
    async fn children(&self, parent: AccountId) -> Result<Vec<GenealogyNode>>;
}

/// One level of a pairing ascent, ready to be settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingClaim {
    pub ancestor_account_id: AccountId,
    pub level: u32,
    /// Side the new node arrives on, relative to this ancestor.
    pub side: Side,
    pub node_account_id: AccountId,
    /// Bonus paid if a waiting half is claimed.
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}

/// What settling a claim did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// No opposite half was waiting; the new node now waits.
    Queued(PairingQueueEntry),
    /// The oldest opposite half was consumed and a pair was paid.
    Matched {
        consumed: PairingQueueEntry,
        pairing: PairingHistory,
        income: IncomeHistory,
    },
    /// The node was already queued or paired at this ancestor and level.
    AlreadySettled,
}

/// Everything a confirmed purchase writes, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasePosting {
    pub purchase_id: PurchaseId,
    pub buyer_account_id: AccountId,
    pub month: MonthKey,
    /// Amount added to the buyer's monthly spend. Never negative.
    pub spend: Decimal,
    pub maintenance_minimum: Decimal,
    pub commissions: Vec<CommissionDraft>,
    pub at: DateTime<Utc>,
}

/// Result of a committed purchase posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedPurchase {
    pub maintenance: MaintenanceRecord,
    /// True if this posting flipped the record to active.
    pub activated: bool,
    pub commissions: Vec<Commission>,
}

/// Interface for the compensation ledger.
///
/// Write operations are atomic units of work: they either commit everything
/// they describe or nothing. Lock timeouts surface as
/// [`StorageError::Contention`].
///
/// Implementations:
/// - `SqliteLedgerStore`: SQLite storage
/// - `MockLedgerStore`: In-memory storage for tests and `memory` mode
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Settle pairing claims in order, within a single transaction.
    ///
    /// For each claim: if the node is already settled at (ancestor, level)
    /// report that; otherwise claim the oldest queued entry on the opposite
    /// side, deleting it and writing pairing + income rows, or queue the node
    /// if none is waiting.
    async fn settle_pairing(&self, claims: &[PairingClaim]) -> Result<Vec<ClaimResult>>;

    /// Apply a purchase: maintenance read-modify-write under lock plus all
    /// commission rows, in a single transaction.
    async fn post_purchase(&self, posting: &PurchasePosting) -> Result<PostedPurchase>;

    /// Waiting halves for a key, oldest first.
    async fn pending_entries(
        &self,
        ancestor: AccountId,
        level: u32,
        side: Side,
    ) -> Result<Vec<PairingQueueEntry>>;

    /// Pairs paid to an ancestor, oldest first.
    async fn pairing_history(&self, ancestor: AccountId) -> Result<Vec<PairingHistory>>;

    /// Income rows credited to an ancestor, oldest first.
    async fn income_history(&self, ancestor: AccountId) -> Result<Vec<IncomeHistory>>;

    /// Commission rows of one purchase, by level.
    async fn commissions_for_purchase(&self, purchase: PurchaseId) -> Result<Vec<Commission>>;

    /// Commission rows credited to a member, oldest first.
    async fn commissions_for_member(&self, member: AccountId) -> Result<Vec<Commission>>;

    async fn maintenance(
        &self,
        account: AccountId,
        month: MonthKey,
    ) -> Result<Option<MaintenanceRecord>>;
}

/// Interface for the administrator settings record.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// The stored settings, or `None` if the administrator never saved any.
    async fn load_settings(&self) -> Result<Option<CompensationConfig>>;

    /// Replace the stored settings.
    async fn save_settings(&self, settings: &CompensationConfig) -> Result<()>;
}

/// Stores backing one engine instance.
#[derive(Clone)]
pub struct Stores {
    pub genealogy: Arc<dyn GenealogyStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub settings: Arc<dyn SettingsStore>,
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Stores> {
    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!(path = %config.sqlite.path, "Storage: sqlite");
            let pool = sqlite::connect(&config.sqlite).await?;
            sqlite::init_schema(&pool).await?;

            let ledger = Arc::new(SqliteLedgerStore::new(pool.clone()));
            Ok(Stores {
                genealogy: Arc::new(SqliteGenealogyStore::new(pool)),
                ledger: ledger.clone(),
                settings: ledger,
            })
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => Err(StorageError::Unavailable(
            "sqlite storage requested but the 'sqlite' feature is not enabled".to_string(),
        )),
        StorageType::Memory => {
            info!("Storage: in-memory");
            let ledger = Arc::new(MockLedgerStore::new());
            Ok(Stores {
                genealogy: Arc::new(MockGenealogyStore::new()),
                ledger: ledger.clone(),
                settings: ledger,
            })
        }
    }
}
