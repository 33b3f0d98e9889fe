use std::collections::HashSet;
use std::str::FromStr;

use anyhow::Context;
use sqlx::types::Json;
use sqlx::{
    SqliteExecutor, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::schema::{RiskLevel, ScoredTransaction};

pub struct Database {
    pool: SqlitePool,
}
impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Failed to create SQLite connect options")?
            .create_if_missing(true);

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Database migration error")?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub async fn get_all_transaction_ids(&self) -> anyhow::Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT transaction_id FROM transactions
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to get known transaction ids")?;
        Ok(ids.into_iter().collect())
    }

    /// Returns `None` when the id is already stored; the existing row is left untouched.
    pub async fn save_transaction(
        &self,
        transaction: &ScoredTransaction,
    ) -> anyhow::Result<Option<ScoredTransaction>> {
        insert_transaction(&self.pool, transaction).await
    }

    /// Inserts a whole upload atomically: either every new row is committed or none is.
    /// Ids that are already stored are skipped and missing from the result.
    pub async fn save_transactions(
        &self,
        transactions: &[ScoredTransaction],
    ) -> anyhow::Result<Vec<ScoredTransaction>> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction batch")?;

        let mut saved = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            match insert_transaction(&mut *db_tx, transaction).await? {
                Some(row) => saved.push(row),
                None => log::warn!(
                    "Transaction {} was stored by another upload, skipping",
                    transaction.transaction_id
                ),
            }
        }

        db_tx
            .commit()
            .await
            .context("Failed to commit transaction batch")?;
        Ok(saved)
    }

    /// Most recent first.
    pub async fn get_transactions(
        &self,
        skip: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<ScoredTransaction>> {
        let rows = sqlx::query_as::<_, ScoredTransaction>(
            r#"
            SELECT * FROM transactions
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get transactions")?;
        Ok(rows)
    }

    pub async fn get_transactions_by_level(
        &self,
        level: RiskLevel,
        skip: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<ScoredTransaction>> {
        let rows = sqlx::query_as::<_, ScoredTransaction>(
            r#"
            SELECT * FROM transactions
            WHERE risk_level = ?
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(level)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .context(format!("Failed to get {} risk transactions", level))?;
        Ok(rows)
    }

    pub async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> anyhow::Result<Option<ScoredTransaction>> {
        let row = sqlx::query_as::<_, ScoredTransaction>(
            r#"
            SELECT * FROM transactions WHERE transaction_id = ?
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .context(format!(
            "Failed to get transaction with id {}",
            transaction_id
        ))?;
        Ok(row)
    }

    /// Amounts of everything not already judged high risk; the anomaly model learns from these.
    pub async fn get_training_amounts(&self) -> anyhow::Result<Vec<f64>> {
        let amounts: Vec<f64> = sqlx::query_scalar(
            r#"
            SELECT amount FROM transactions WHERE risk_level IN ('low', 'medium')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to get training amounts")?;
        Ok(amounts)
    }
}

async fn insert_transaction<'e, E>(
    executor: E,
    transaction: &ScoredTransaction,
) -> anyhow::Result<Option<ScoredTransaction>>
where
    E: SqliteExecutor<'e>,
{
    let saved = sqlx::query_as::<_, ScoredTransaction>(
        r#"
        INSERT OR IGNORE INTO transactions (
            transaction_id, amount, currency, timestamp, customer_id, counterparty,
            risk_score, risk_level, flags, ai_analysis
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *;
        "#,
    )
    .bind(&transaction.transaction_id)
    .bind(transaction.amount)
    .bind(&transaction.currency)
    .bind(transaction.timestamp)
    .bind(&transaction.customer_id)
    .bind(&transaction.counterparty)
    .bind(transaction.risk_score)
    .bind(transaction.risk_level)
    .bind(Json(&transaction.flags))
    .bind(&transaction.ai_analysis)
    .fetch_optional(executor)
    .await
    .with_context(|| {
        format!(
            "Failed to save transaction {} to database",
            transaction.transaction_id
        )
    })?;
    Ok(saved)
}
