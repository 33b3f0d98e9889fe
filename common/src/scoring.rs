//! Amount rule, anomaly boost, escalation choice and final merge.

use std::collections::HashMap;

use crate::analyst::{CandidatePayload, DeepVerdict};
use crate::anomaly::AnomalyModel;
use crate::schema::{PLACEHOLDER_ANALYSIS, ScoredTransaction, Transaction};

pub const HIGH_AMOUNT_FLAG: &str = "High Amount Flag";
pub const ML_ANOMALY_FLAG: &str = "ML Anomaly Detected";
pub const DEEP_AI_FLAG: &str = "Deep AI Analyzed";

/// Amounts at or above this get the fixed score instead of the linear one.
pub const LARGE_AMOUNT_THRESHOLD: f64 = 15_000.0;
pub const LARGE_AMOUNT_SCORE: i64 = 90;
pub const ANOMALY_BOOST: i64 = 15;
pub const ESCALATION_SCORE: i64 = 85;
const HIGH_AMOUNT_FLAG_SCORE: i64 = 75;

/// Score and flags accumulated before any remote analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: i64,
    pub flags: Vec<String>,
    pub anomaly: bool,
}

/// `floor(amount * 0.005)` capped to 0..=100.
pub fn linear_score(amount: f64) -> i64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    ((amount * 0.005).floor() as i64).min(100)
}

pub fn rule_score(amount: f64) -> Assessment {
    let score = if amount < LARGE_AMOUNT_THRESHOLD {
        linear_score(amount)
    } else {
        LARGE_AMOUNT_SCORE
    };

    let mut flags = Vec::new();
    if score > HIGH_AMOUNT_FLAG_SCORE {
        flags.push(HIGH_AMOUNT_FLAG.to_string());
    }
    Assessment {
        score,
        flags,
        anomaly: false,
    }
}

/// Folds the anomaly signal in. An untrained model leaves the assessment untouched.
pub fn apply_anomaly(mut assessment: Assessment, model: &AnomalyModel, amount: f64) -> Assessment {
    if model.is_anomalous(amount) == Some(true) {
        assessment.anomaly = true;
        assessment.flags.push(ML_ANOMALY_FLAG.to_string());
        assessment.score = (assessment.score + ANOMALY_BOOST).min(100);
    }
    assessment
}

pub fn assess(transaction: &Transaction, model: &AnomalyModel) -> Assessment {
    apply_anomaly(rule_score(transaction.amount), model, transaction.amount)
}

pub fn needs_deep_analysis(assessment: &Assessment) -> bool {
    assessment.score > ESCALATION_SCORE || assessment.anomaly
}

pub fn candidate_payload(transaction: &Transaction) -> CandidatePayload {
    CandidatePayload {
        transaction_id: transaction.transaction_id.clone(),
        amount: transaction.amount,
        customer_id: transaction.customer_id.clone(),
        counterparty: transaction.counterparty.clone(),
    }
}

/// Adopts the remote verdict when one exists for this transaction.
pub fn assemble(
    transaction: Transaction,
    assessment: Assessment,
    verdicts: &HashMap<String, DeepVerdict>,
) -> ScoredTransaction {
    let Assessment {
        score, mut flags, ..
    } = assessment;

    match verdicts.get(&transaction.transaction_id) {
        Some(verdict) => {
            flags.push(DEEP_AI_FLAG.to_string());
            ScoredTransaction::new(transaction, verdict.score, flags, verdict.reasoning.clone())
        }
        None => ScoredTransaction::new(transaction, score, flags, PLACEHOLDER_ANALYSIS.to_string()),
    }
}
