use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::helpers::save_json;

/// Reasoning stored for transactions that never reached deep analysis.
pub const PLACEHOLDER_ANALYSIS: &str = "Standard rule-based check passed.";

fn timestamp_from_str<'de, D>(d: D) -> Result<NaiveDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

/// Accepts RFC 3339 (converted to UTC) or a naive ISO-8601 date-time.
pub fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .with_context(|| format!("Invalid timestamp `{}`", s))
}

/// A transaction as submitted by a caller, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub amount: f64,
    pub currency: String,
    #[serde(deserialize_with = "timestamp_from_str")]
    pub timestamp: NaiveDateTime,
    pub customer_id: String,
    pub counterparty: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// low < 40, medium 40..=74, high >= 75
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 75 => RiskLevel::High,
            s if s >= 40 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(anyhow::anyhow!(
                "Risk level must be either 'low', 'medium', or 'high', got '{}'",
                other
            )),
        }
    }
}

/// A transaction after scoring, as persisted and returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoredTransaction {
    #[serde(default)]
    pub id: i64,
    pub transaction_id: String,
    pub amount: f64,
    pub currency: String,
    pub timestamp: NaiveDateTime,
    pub customer_id: String,
    pub counterparty: String,
    pub risk_score: i64,
    pub risk_level: RiskLevel,
    #[sqlx(json)]
    pub flags: Vec<String>,
    pub ai_analysis: String,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

impl ScoredTransaction {
    pub fn new(
        transaction: Transaction,
        risk_score: i64,
        flags: Vec<String>,
        ai_analysis: String,
    ) -> Self {
        let risk_score = risk_score.clamp(0, 100);
        ScoredTransaction {
            id: 0, // set by DB
            transaction_id: transaction.transaction_id,
            amount: transaction.amount,
            currency: transaction.currency,
            timestamp: transaction.timestamp,
            customer_id: transaction.customer_id,
            counterparty: transaction.counterparty,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            flags,
            ai_analysis,
            created_at: None, // set by DB
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

const COUNTERPARTIES: [&str; 10] = [
    "Acme Supplies",
    "Northwind Traders",
    "Globex Corp",
    "Initech",
    "Umbrella Logistics",
    "Stark Industries",
    "Wayne Enterprises",
    "Hooli",
    "Vandelay Imports",
    "Offshore Holdings Ltd",
];
const CURRENCIES: [&str; 3] = ["USD", "EUR", "GBP"];

impl Transaction {
    /// Builds a synthetic batch: mostly everyday amounts, `anomaly_ratio` of
    /// large outliers, and the occasional repeated identifier.
    pub fn generate_test_batch(count: usize, anomaly_ratio: f64, seed: Option<u64>) -> Vec<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let anomaly_ratio = anomaly_ratio.clamp(0.0, 1.0);
        let now = Utc::now().naive_utc();
        let mut batch: Vec<Transaction> = Vec::with_capacity(count);

        for i in 0..count {
            let transaction_id = if !batch.is_empty() && rng.random_bool(0.02) {
                let reused = rng.random_range(0..batch.len());
                batch[reused].transaction_id.clone()
            } else {
                format!("TXN-{:06}", i + 1)
            };

            let amount: f64 = if rng.random_bool(anomaly_ratio) {
                rng.random_range(15_000.0..50_000.0)
            } else {
                rng.random_range(10.0..3_000.0)
            };

            let seconds_ago: i64 = rng.random_range(0..30 * 24 * 3600);

            batch.push(Transaction {
                transaction_id,
                amount: (amount * 100.0).round() / 100.0,
                currency: CURRENCIES[rng.random_range(0..CURRENCIES.len())].to_string(),
                timestamp: now - Duration::seconds(seconds_ago),
                customer_id: format!("CUST-{:04}", rng.random_range(1..=50)),
                counterparty: COUNTERPARTIES[rng.random_range(0..COUNTERPARTIES.len())]
                    .to_string(),
            });
        }
        batch
    }

    pub async fn generate_test_transactions_json(
        path: &str,
        count: usize,
        anomaly_ratio: f64,
        seed: Option<u64>,
    ) -> anyhow::Result<()> {
        let batch = Self::generate_test_batch(count, anomaly_ratio, seed);
        save_json(path, &batch)
            .await
            .with_context(|| format!("Failed to write test transactions to `{}`", path))?;
        log::info!("Test transactions JSON generated at {}", path);
        Ok(())
    }
}
