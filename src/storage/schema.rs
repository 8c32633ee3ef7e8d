//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Member accounts and their sponsors.
#[derive(Iden)]
pub enum Accounts {
    Table,
    AccountId,
    SponsorAccountId,
    CreatedAt,
}

/// Binary placement tree.
#[derive(Iden)]
pub enum GenealogyNodes {
    Table,
    AccountId,
    ParentAccountId,
    Side,
    Level,
    CreatedAt,
}

/// Unmatched halves awaiting their opposite side.
#[derive(Iden)]
pub enum PairingQueue {
    Table,
    Id,
    AncestorAccountId,
    Level,
    Side,
    NodeAccountId,
    InsertedAt,
}

#[derive(Iden)]
pub enum PairingHistory {
    #[iden = "pairing_history"]
    Table,
    Id,
    AncestorAccountId,
    LeftAccountId,
    RightAccountId,
    Level,
    Amount,
    PairedAt,
}

#[derive(Iden)]
pub enum IncomeHistory {
    #[iden = "income_history"]
    Table,
    Id,
    AncestorAccountId,
    PairingHistoryId,
    Amount,
    Source,
    Description,
    CreatedAt,
}

#[derive(Iden)]
pub enum MaintenanceRecords {
    Table,
    AccountId,
    Month,
    TotalSpent,
    IsActive,
    ActivatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Commissions {
    Table,
    Id,
    MemberAccountId,
    Source,
    Amount,
    Level,
    Percent,
    PurchaseId,
    DownlineAccountId,
    TransNo,
    CreatedAt,
}

/// Single-row administrator settings.
#[derive(Iden)]
pub enum CompensationSettings {
    Table,
    Id,
    SettingsJson,
    UpdatedAt,
}

/// SQL for creating the genealogy tables.
///
/// The unique (parent, side) index keeps the placement tree binary; SQLite
/// treats NULL parents as distinct so any number of roots may exist.
pub const CREATE_GENEALOGY_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id INTEGER PRIMARY KEY NOT NULL,
    sponsor_account_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS genealogy_nodes (
    account_id INTEGER PRIMARY KEY NOT NULL,
    parent_account_id INTEGER,
    side TEXT,
    level INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_genealogy_slot
    ON genealogy_nodes(parent_account_id, side);
"#;

/// SQL for creating the pairing ledger tables.
pub const CREATE_PAIRING_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS pairing_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ancestor_account_id INTEGER NOT NULL,
    level INTEGER NOT NULL,
    side TEXT NOT NULL,
    node_account_id INTEGER NOT NULL,
    inserted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pairing_queue_key
    ON pairing_queue(ancestor_account_id, level, side, inserted_at, id);

CREATE UNIQUE INDEX IF NOT EXISTS idx_pairing_queue_node
    ON pairing_queue(ancestor_account_id, level, node_account_id);

CREATE TABLE IF NOT EXISTS pairing_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ancestor_account_id INTEGER NOT NULL,
    left_account_id INTEGER NOT NULL,
    right_account_id INTEGER NOT NULL,
    level INTEGER NOT NULL,
    amount TEXT NOT NULL,
    paired_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pairing_history_ancestor
    ON pairing_history(ancestor_account_id, level);

CREATE TABLE IF NOT EXISTS income_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ancestor_account_id INTEGER NOT NULL,
    pairing_history_id INTEGER NOT NULL UNIQUE,
    amount TEXT NOT NULL,
    source TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_income_history_ancestor
    ON income_history(ancestor_account_id);
"#;

/// SQL for creating the purchase ledger tables.
pub const CREATE_PURCHASE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS maintenance_records (
    account_id INTEGER NOT NULL,
    month TEXT NOT NULL,
    total_spent TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    activated_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (account_id, month)
);

CREATE TABLE IF NOT EXISTS commissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_account_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    amount TEXT NOT NULL,
    level INTEGER NOT NULL,
    percent TEXT NOT NULL,
    purchase_id INTEGER NOT NULL,
    downline_account_id INTEGER NOT NULL,
    trans_no TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_commissions_purchase_level
    ON commissions(purchase_id, level, source);

CREATE INDEX IF NOT EXISTS idx_commissions_member
    ON commissions(member_account_id);
"#;

/// SQL for creating the settings table.
pub const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS compensation_settings (
    id INTEGER PRIMARY KEY NOT NULL,
    settings_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
