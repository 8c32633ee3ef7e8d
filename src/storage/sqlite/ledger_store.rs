//! SQLite LedgerStore and SettingsStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::config::CompensationConfig;
use crate::maintenance::MaintenanceLedger;
use crate::model::{
    pairing_description, resolve_pair, AccountId, Commission, IncomeHistory, MaintenanceRecord,
    MonthKey, PairingHistory as PairingRow, PairingQueueEntry, PurchaseId, Side, PAIRING_SOURCE,
    UNILEVEL_SOURCE,
};
use crate::storage::schema::{
    Commissions, CompensationSettings, IncomeHistory as IncomeTable, MaintenanceRecords,
    PairingHistory as PairingTable, PairingQueue,
};
use crate::storage::{
    ClaimResult, LedgerStore, PairingClaim, PostedPurchase, PurchasePosting, Result,
    SettingsStore, StorageError,
};

use super::{
    begin_immediate, decode_decimal, decode_level, decode_side, decode_time, encode_time, finish,
    is_unique_violation,
};

/// The settings table holds a single row under this id.
const SETTINGS_ROW_ID: i64 = 1;

/// SQLite implementation of LedgerStore and SettingsStore.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn is_settled(conn: &mut SqliteConnection, claim: &PairingClaim) -> Result<bool> {
        let node = claim.node_account_id.0;

        let queued = Query::select()
            .column(PairingQueue::Id)
            .from(PairingQueue::Table)
            .and_where(Expr::col(PairingQueue::AncestorAccountId).eq(claim.ancestor_account_id.0))
            .and_where(Expr::col(PairingQueue::Level).eq(claim.level))
            .and_where(Expr::col(PairingQueue::NodeAccountId).eq(node))
            .limit(1)
            .to_string(SqliteQueryBuilder);
        if sqlx::query(&queued).fetch_optional(&mut *conn).await?.is_some() {
            return Ok(true);
        }

        let paired = Query::select()
            .column(PairingTable::Id)
            .from(PairingTable::Table)
            .and_where(Expr::col(PairingTable::AncestorAccountId).eq(claim.ancestor_account_id.0))
            .and_where(Expr::col(PairingTable::Level).eq(claim.level))
            .and_where(
                Expr::col(PairingTable::LeftAccountId)
                    .eq(node)
                    .or(Expr::col(PairingTable::RightAccountId).eq(node)),
            )
            .limit(1)
            .to_string(SqliteQueryBuilder);
        Ok(sqlx::query(&paired).fetch_optional(&mut *conn).await?.is_some())
    }

    async fn oldest_waiting(
        conn: &mut SqliteConnection,
        ancestor: AccountId,
        level: u32,
        side: Side,
    ) -> Result<Option<PairingQueueEntry>> {
        let query = queue_select()
            .and_where(Expr::col(PairingQueue::AncestorAccountId).eq(ancestor.0))
            .and_where(Expr::col(PairingQueue::Level).eq(level))
            .and_where(Expr::col(PairingQueue::Side).eq(side.as_str()))
            .order_by(PairingQueue::InsertedAt, Order::Asc)
            .order_by(PairingQueue::Id, Order::Asc)
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.as_ref().map(queue_entry_from_row).transpose()
    }

    async fn settle_one(conn: &mut SqliteConnection, claim: &PairingClaim) -> Result<ClaimResult> {
        if Self::is_settled(conn, claim).await? {
            debug!(
                ancestor = %claim.ancestor_account_id,
                level = claim.level,
                node = %claim.node_account_id,
                "Claim already settled"
            );
            return Ok(ClaimResult::AlreadySettled);
        }

        let waiting = Self::oldest_waiting(
            conn,
            claim.ancestor_account_id,
            claim.level,
            claim.side.opposite(),
        )
        .await?;

        let Some(consumed) = waiting else {
            return Self::enqueue(conn, claim).await.map(ClaimResult::Queued);
        };

        let delete = Query::delete()
            .from_table(PairingQueue::Table)
            .and_where(Expr::col(PairingQueue::Id).eq(consumed.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&delete).execute(&mut *conn).await?;

        let (left, right) = resolve_pair(claim.side, claim.node_account_id, consumed.node_account_id);
        let amount = claim.amount.to_string();
        let paired_at = encode_time(claim.at);

        let insert_pairing = Query::insert()
            .into_table(PairingTable::Table)
            .columns([
                PairingTable::AncestorAccountId,
                PairingTable::LeftAccountId,
                PairingTable::RightAccountId,
                PairingTable::Level,
                PairingTable::Amount,
                PairingTable::PairedAt,
            ])
            .values_panic([
                claim.ancestor_account_id.0.into(),
                left.0.into(),
                right.0.into(),
                claim.level.into(),
                amount.clone().into(),
                paired_at.clone().into(),
            ])
            .to_string(SqliteQueryBuilder);
        let pairing_id = sqlx::query(&insert_pairing)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        let description = pairing_description(claim.level, left, right);
        let insert_income = Query::insert()
            .into_table(IncomeTable::Table)
            .columns([
                IncomeTable::AncestorAccountId,
                IncomeTable::PairingHistoryId,
                IncomeTable::Amount,
                IncomeTable::Source,
                IncomeTable::Description,
                IncomeTable::CreatedAt,
            ])
            .values_panic([
                claim.ancestor_account_id.0.into(),
                pairing_id.into(),
                amount.into(),
                PAIRING_SOURCE.into(),
                description.clone().into(),
                paired_at.into(),
            ])
            .to_string(SqliteQueryBuilder);
        let income_id = sqlx::query(&insert_income)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        Ok(ClaimResult::Matched {
            consumed,
            pairing: PairingRow {
                id: pairing_id,
                ancestor_account_id: claim.ancestor_account_id,
                left_account_id: left,
                right_account_id: right,
                level: claim.level,
                amount: claim.amount,
                paired_at: claim.at,
            },
            income: IncomeHistory {
                id: income_id,
                ancestor_account_id: claim.ancestor_account_id,
                pairing_history_id: pairing_id,
                amount: claim.amount,
                source: PAIRING_SOURCE.to_string(),
                description,
            },
        })
    }

    async fn enqueue(conn: &mut SqliteConnection, claim: &PairingClaim) -> Result<PairingQueueEntry> {
        let query = Query::insert()
            .into_table(PairingQueue::Table)
            .columns([
                PairingQueue::AncestorAccountId,
                PairingQueue::Level,
                PairingQueue::Side,
                PairingQueue::NodeAccountId,
                PairingQueue::InsertedAt,
            ])
            .values_panic([
                claim.ancestor_account_id.0.into(),
                claim.level.into(),
                claim.side.as_str().into(),
                claim.node_account_id.0.into(),
                encode_time(claim.at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        let id = sqlx::query(&query)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        Ok(PairingQueueEntry {
            id,
            ancestor_account_id: claim.ancestor_account_id,
            level: claim.level,
            side: claim.side,
            node_account_id: claim.node_account_id,
            inserted_at: claim.at,
        })
    }

    async fn settle_all(
        conn: &mut SqliteConnection,
        claims: &[PairingClaim],
    ) -> Result<Vec<ClaimResult>> {
        let mut results = Vec::with_capacity(claims.len());
        for claim in claims {
            results.push(Self::settle_one(conn, claim).await?);
        }
        Ok(results)
    }

    async fn apply_purchase(
        conn: &mut SqliteConnection,
        posting: &PurchasePosting,
    ) -> Result<PostedPurchase> {
        let current = Self::fetch_maintenance(&mut *conn, posting.buyer_account_id, posting.month)
            .await?
            .unwrap_or_else(|| MaintenanceRecord::empty(posting.buyer_account_id, posting.month));

        let spend = MaintenanceLedger::new(posting.maintenance_minimum).post_spend(
            current,
            posting.spend,
            posting.at,
        )?;
        let record = &spend.record;

        let upsert = Query::insert()
            .into_table(MaintenanceRecords::Table)
            .columns([
                MaintenanceRecords::AccountId,
                MaintenanceRecords::Month,
                MaintenanceRecords::TotalSpent,
                MaintenanceRecords::IsActive,
                MaintenanceRecords::ActivatedAt,
                MaintenanceRecords::UpdatedAt,
            ])
            .values_panic([
                record.account_id.0.into(),
                record.month.to_string().into(),
                record.total_spent.to_string().into(),
                i64::from(record.is_active).into(),
                record.activated_at.map(encode_time).into(),
                encode_time(posting.at).into(),
            ])
            .on_conflict(
                OnConflict::columns([MaintenanceRecords::AccountId, MaintenanceRecords::Month])
                    .update_columns([
                        MaintenanceRecords::TotalSpent,
                        MaintenanceRecords::IsActive,
                        MaintenanceRecords::ActivatedAt,
                        MaintenanceRecords::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&upsert).execute(&mut *conn).await?;

        let mut commissions = Vec::with_capacity(posting.commissions.len());
        for draft in &posting.commissions {
            let query = Query::insert()
                .into_table(Commissions::Table)
                .columns([
                    Commissions::MemberAccountId,
                    Commissions::Source,
                    Commissions::Amount,
                    Commissions::Level,
                    Commissions::Percent,
                    Commissions::PurchaseId,
                    Commissions::DownlineAccountId,
                    Commissions::TransNo,
                    Commissions::CreatedAt,
                ])
                .values_panic([
                    draft.member_account_id.0.into(),
                    UNILEVEL_SOURCE.into(),
                    draft.amount.to_string().into(),
                    draft.level.into(),
                    draft.percent.to_string().into(),
                    draft.purchase_id.0.into(),
                    draft.downline_account_id.0.into(),
                    draft.trans_no.clone().into(),
                    encode_time(posting.at).into(),
                ])
                .to_string(SqliteQueryBuilder);

            let id = match sqlx::query(&query).execute(&mut *conn).await {
                Ok(done) => done.last_insert_rowid(),
                Err(e) if is_unique_violation(&e) => {
                    return Err(StorageError::DuplicatePosting(draft.purchase_id))
                }
                Err(e) => return Err(e.into()),
            };
            commissions.push(draft.clone().into_commission(id, posting.at));
        }

        Ok(PostedPurchase {
            maintenance: spend.record,
            activated: spend.activated,
            commissions,
        })
    }

    async fn fetch_maintenance(
        conn: &mut SqliteConnection,
        account: AccountId,
        month: MonthKey,
    ) -> Result<Option<MaintenanceRecord>> {
        let query = maintenance_select(account, month);
        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.as_ref().map(maintenance_from_row).transpose()
    }
}

fn queue_select() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            PairingQueue::Id,
            PairingQueue::AncestorAccountId,
            PairingQueue::Level,
            PairingQueue::Side,
            PairingQueue::NodeAccountId,
            PairingQueue::InsertedAt,
        ])
        .from(PairingQueue::Table)
        .to_owned()
}

fn commission_select() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            Commissions::Id,
            Commissions::MemberAccountId,
            Commissions::Source,
            Commissions::Amount,
            Commissions::Level,
            Commissions::Percent,
            Commissions::PurchaseId,
            Commissions::DownlineAccountId,
            Commissions::TransNo,
            Commissions::CreatedAt,
        ])
        .from(Commissions::Table)
        .to_owned()
}

fn maintenance_select(account: AccountId, month: MonthKey) -> String {
    Query::select()
        .columns([
            MaintenanceRecords::AccountId,
            MaintenanceRecords::Month,
            MaintenanceRecords::TotalSpent,
            MaintenanceRecords::IsActive,
            MaintenanceRecords::ActivatedAt,
        ])
        .from(MaintenanceRecords::Table)
        .and_where(Expr::col(MaintenanceRecords::AccountId).eq(account.0))
        .and_where(Expr::col(MaintenanceRecords::Month).eq(month.to_string()))
        .to_string(SqliteQueryBuilder)
}

fn queue_entry_from_row(row: &SqliteRow) -> Result<PairingQueueEntry> {
    const TABLE: &str = "pairing_queue";
    Ok(PairingQueueEntry {
        id: row.try_get("id")?,
        ancestor_account_id: AccountId(row.try_get("ancestor_account_id")?),
        level: decode_level(TABLE, row.try_get("level")?)?,
        side: decode_side(TABLE, row.try_get("side")?)?,
        node_account_id: AccountId(row.try_get("node_account_id")?),
        inserted_at: decode_time(TABLE, row.try_get("inserted_at")?)?,
    })
}

fn pairing_from_row(row: &SqliteRow) -> Result<PairingRow> {
    const TABLE: &str = "pairing_history";
    Ok(PairingRow {
        id: row.try_get("id")?,
        ancestor_account_id: AccountId(row.try_get("ancestor_account_id")?),
        left_account_id: AccountId(row.try_get("left_account_id")?),
        right_account_id: AccountId(row.try_get("right_account_id")?),
        level: decode_level(TABLE, row.try_get("level")?)?,
        amount: decode_decimal(TABLE, row.try_get("amount")?)?,
        paired_at: decode_time(TABLE, row.try_get("paired_at")?)?,
    })
}

fn income_from_row(row: &SqliteRow) -> Result<IncomeHistory> {
    Ok(IncomeHistory {
        id: row.try_get("id")?,
        ancestor_account_id: AccountId(row.try_get("ancestor_account_id")?),
        pairing_history_id: row.try_get("pairing_history_id")?,
        amount: decode_decimal("income_history", row.try_get("amount")?)?,
        source: row.try_get("source")?,
        description: row.try_get("description")?,
    })
}

fn commission_from_row(row: &SqliteRow) -> Result<Commission> {
    const TABLE: &str = "commissions";
    Ok(Commission {
        id: row.try_get("id")?,
        member_account_id: AccountId(row.try_get("member_account_id")?),
        source: row.try_get("source")?,
        amount: decode_decimal(TABLE, row.try_get("amount")?)?,
        level: decode_level(TABLE, row.try_get("level")?)?,
        percent: decode_decimal(TABLE, row.try_get("percent")?)?,
        purchase_id: PurchaseId(row.try_get("purchase_id")?),
        downline_account_id: AccountId(row.try_get("downline_account_id")?),
        trans_no: row.try_get("trans_no")?,
        created_at: decode_time(TABLE, row.try_get("created_at")?)?,
    })
}

fn maintenance_from_row(row: &SqliteRow) -> Result<MaintenanceRecord> {
    const TABLE: &str = "maintenance_records";
    let month: String = row.try_get("month")?;
    let activated_at: Option<String> = row.try_get("activated_at")?;
    Ok(MaintenanceRecord {
        account_id: AccountId(row.try_get("account_id")?),
        month: month
            .parse()
            .map_err(|e| StorageError::corrupt(TABLE, format!("{e}")))?,
        total_spent: decode_decimal(TABLE, row.try_get("total_spent")?)?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        activated_at: activated_at
            .as_deref()
            .map(|raw| decode_time(TABLE, raw))
            .transpose()?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn settle_pairing(&self, claims: &[PairingClaim]) -> Result<Vec<ClaimResult>> {
        if claims.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = begin_immediate(&self.pool).await?;
        let result = Self::settle_all(&mut conn, claims).await;
        finish(conn, result).await
    }

    async fn post_purchase(&self, posting: &PurchasePosting) -> Result<PostedPurchase> {
        let mut conn = begin_immediate(&self.pool).await?;
        let result = Self::apply_purchase(&mut conn, posting).await;
        finish(conn, result).await
    }

    async fn pending_entries(
        &self,
        ancestor: AccountId,
        level: u32,
        side: Side,
    ) -> Result<Vec<PairingQueueEntry>> {
        let query = queue_select()
            .and_where(Expr::col(PairingQueue::AncestorAccountId).eq(ancestor.0))
            .and_where(Expr::col(PairingQueue::Level).eq(level))
            .and_where(Expr::col(PairingQueue::Side).eq(side.as_str()))
            .order_by(PairingQueue::InsertedAt, Order::Asc)
            .order_by(PairingQueue::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(queue_entry_from_row).collect()
    }

    async fn pairing_history(&self, ancestor: AccountId) -> Result<Vec<PairingRow>> {
        let query = Query::select()
            .columns([
                PairingTable::Id,
                PairingTable::AncestorAccountId,
                PairingTable::LeftAccountId,
                PairingTable::RightAccountId,
                PairingTable::Level,
                PairingTable::Amount,
                PairingTable::PairedAt,
            ])
            .from(PairingTable::Table)
            .and_where(Expr::col(PairingTable::AncestorAccountId).eq(ancestor.0))
            .order_by(PairingTable::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(pairing_from_row).collect()
    }

    async fn income_history(&self, ancestor: AccountId) -> Result<Vec<IncomeHistory>> {
        let query = Query::select()
            .columns([
                IncomeTable::Id,
                IncomeTable::AncestorAccountId,
                IncomeTable::PairingHistoryId,
                IncomeTable::Amount,
                IncomeTable::Source,
                IncomeTable::Description,
            ])
            .from(IncomeTable::Table)
            .and_where(Expr::col(IncomeTable::AncestorAccountId).eq(ancestor.0))
            .order_by(IncomeTable::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(income_from_row).collect()
    }

    async fn commissions_for_purchase(&self, purchase: PurchaseId) -> Result<Vec<Commission>> {
        let query = commission_select()
            .and_where(Expr::col(Commissions::PurchaseId).eq(purchase.0))
            .order_by(Commissions::Level, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn commissions_for_member(&self, member: AccountId) -> Result<Vec<Commission>> {
        let query = commission_select()
            .and_where(Expr::col(Commissions::MemberAccountId).eq(member.0))
            .order_by(Commissions::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn maintenance(
        &self,
        account: AccountId,
        month: MonthKey,
    ) -> Result<Option<MaintenanceRecord>> {
        let query = maintenance_select(account, month);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(maintenance_from_row).transpose()
    }
}

#[async_trait]
impl SettingsStore for SqliteLedgerStore {
    async fn load_settings(&self) -> Result<Option<CompensationConfig>> {
        let query = Query::select()
            .column(CompensationSettings::SettingsJson)
            .from(CompensationSettings::Table)
            .and_where(Expr::col(CompensationSettings::Id).eq(SETTINGS_ROW_ID))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("settings_json")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn save_settings(&self, settings: &CompensationConfig) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        let query = Query::insert()
            .into_table(CompensationSettings::Table)
            .columns([
                CompensationSettings::Id,
                CompensationSettings::SettingsJson,
                CompensationSettings::UpdatedAt,
            ])
            .values_panic([
                SETTINGS_ROW_ID.into(),
                json.into(),
                encode_time(Utc::now()).into(),
            ])
            .on_conflict(
                OnConflict::column(CompensationSettings::Id)
                    .update_columns([
                        CompensationSettings::SettingsJson,
                        CompensationSettings::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
