//! SQLite GenealogyStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::model::{AccountId, GenealogyNode};
use crate::storage::schema::{Accounts, GenealogyNodes};
use crate::storage::{Account, GenealogyStore, Result, StorageError};

use super::{begin_immediate, decode_level, decode_side, encode_time, finish, is_unique_violation};

const TABLE: &str = "genealogy_nodes";

/// SQLite implementation of GenealogyStore.
pub struct SqliteGenealogyStore {
    pool: SqlitePool,
}

impl SqliteGenealogyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select_node(account: AccountId) -> String {
        Query::select()
            .columns([
                GenealogyNodes::AccountId,
                GenealogyNodes::ParentAccountId,
                GenealogyNodes::Side,
                GenealogyNodes::Level,
            ])
            .from(GenealogyNodes::Table)
            .and_where(Expr::col(GenealogyNodes::AccountId).eq(account.0))
            .to_string(SqliteQueryBuilder)
    }

    fn select_account(account: AccountId) -> String {
        Query::select()
            .columns([Accounts::AccountId, Accounts::SponsorAccountId])
            .from(Accounts::Table)
            .and_where(Expr::col(Accounts::AccountId).eq(account.0))
            .to_string(SqliteQueryBuilder)
    }

    async fn insert_account(
        conn: &mut SqliteConnection,
        account: AccountId,
        sponsor: Option<AccountId>,
    ) -> Result<()> {
        let existing = sqlx::query(&Self::select_account(account))
            .fetch_optional(&mut *conn)
            .await?;
        if existing.is_some() {
            return Err(StorageError::AlreadyRegistered(account));
        }

        if let Some(sponsor) = sponsor {
            let found = sqlx::query(&Self::select_account(sponsor))
                .fetch_optional(&mut *conn)
                .await?;
            if found.is_none() {
                return Err(StorageError::UnknownAccount(sponsor));
            }
        }

        let query = Query::insert()
            .into_table(Accounts::Table)
            .columns([
                Accounts::AccountId,
                Accounts::SponsorAccountId,
                Accounts::CreatedAt,
            ])
            .values_panic([
                account.0.into(),
                sponsor.map(|s| s.0).into(),
                encode_time(Utc::now()).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn insert_node(conn: &mut SqliteConnection, node: &GenealogyNode) -> Result<()> {
        let existing = sqlx::query(&Self::select_node(node.account_id))
            .fetch_optional(&mut *conn)
            .await?;
        if existing.is_some() {
            return Err(StorageError::AlreadyPlaced(node.account_id));
        }

        if let Some(parent) = node.parent_account_id {
            let found = sqlx::query(&Self::select_node(parent))
                .fetch_optional(&mut *conn)
                .await?;
            if found.is_none() {
                return Err(StorageError::UnknownAccount(parent));
            }
        }

        let query = Query::insert()
            .into_table(GenealogyNodes::Table)
            .columns([
                GenealogyNodes::AccountId,
                GenealogyNodes::ParentAccountId,
                GenealogyNodes::Side,
                GenealogyNodes::Level,
                GenealogyNodes::CreatedAt,
            ])
            .values_panic([
                node.account_id.0.into(),
                node.parent_account_id.map(|p| p.0).into(),
                node.side.map(|s| s.as_str().to_string()).into(),
                i64::from(node.level).into(),
                encode_time(Utc::now()).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&mut *conn).await {
            Ok(_) => Ok(()),
            // the (parent, side) index is the only unique key left after the
            // account check above
            Err(e) if is_unique_violation(&e) => match (node.parent_account_id, node.side) {
                (Some(parent), Some(side)) => Err(StorageError::SlotTaken { parent, side }),
                _ => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}

fn node_from_row(row: &SqliteRow) -> Result<GenealogyNode> {
    let side: Option<String> = row.try_get("side")?;
    Ok(GenealogyNode {
        account_id: AccountId(row.try_get("account_id")?),
        parent_account_id: row
            .try_get::<Option<i64>, _>("parent_account_id")?
            .map(AccountId),
        side: side.as_deref().map(|s| decode_side(TABLE, s)).transpose()?,
        level: decode_level(TABLE, row.try_get("level")?)?,
    })
}

#[async_trait]
impl GenealogyStore for SqliteGenealogyStore {
    async fn register_account(&self, account: AccountId, sponsor: Option<AccountId>) -> Result<()> {
        let mut conn = begin_immediate(&self.pool).await?;
        let result = Self::insert_account(&mut conn, account, sponsor).await;
        finish(conn, result).await
    }

    async fn account(&self, account: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&Self::select_account(account))
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<Account> {
            Ok(Account {
                account_id: AccountId(row.try_get("account_id")?),
                sponsor_account_id: row
                    .try_get::<Option<i64>, _>("sponsor_account_id")?
                    .map(AccountId),
            })
        })
        .transpose()
    }

    async fn place(&self, node: &GenealogyNode) -> Result<()> {
        let mut conn = begin_immediate(&self.pool).await?;
        let result = Self::insert_node(&mut conn, node).await;
        finish(conn, result).await
    }

    async fn node(&self, account: AccountId) -> Result<Option<GenealogyNode>> {
        let row = sqlx::query(&Self::select_node(account))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn children(&self, parent: AccountId) -> Result<Vec<GenealogyNode>> {
        let query = Query::select()
            .columns([
                GenealogyNodes::AccountId,
                GenealogyNodes::ParentAccountId,
                GenealogyNodes::Side,
                GenealogyNodes::Level,
            ])
            .from(GenealogyNodes::Table)
            .and_where(Expr::col(GenealogyNodes::ParentAccountId).eq(parent.0))
            .order_by_expr(
                Expr::cust("CASE side WHEN 'left' THEN 0 WHEN 'right' THEN 1 ELSE 2 END"),
                Order::Asc,
            )
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }
}
