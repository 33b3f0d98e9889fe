use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{
    AnomalyModel, CandidatePayload, Database, DeepAnalyzer, DeepVerdict, Transaction,
    parse_timestamp,
};

use crate::state::AppState;

/// Answers from a fixed table and remembers which ids each call asked about.
/// An empty table behaves like a remote service that failed.
pub struct RecordingAnalyst {
    verdicts: HashMap<String, DeepVerdict>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingAnalyst {
    pub fn new(verdicts: &[(&str, i64, &str)]) -> Self {
        Self {
            verdicts: verdicts
                .iter()
                .map(|(id, score, reasoning)| {
                    (
                        id.to_string(),
                        DeepVerdict {
                            score: *score,
                            reasoning: reasoning.to_string(),
                        },
                    )
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeepAnalyzer for RecordingAnalyst {
    async fn analyze(&self, candidates: &[CandidatePayload]) -> HashMap<String, DeepVerdict> {
        self.calls
            .lock()
            .unwrap()
            .push(candidates.iter().map(|c| c.transaction_id.clone()).collect());
        candidates
            .iter()
            .filter_map(|c| {
                self.verdicts
                    .get(&c.transaction_id)
                    .map(|v| (c.transaction_id.clone(), v.clone()))
            })
            .collect()
    }
}

pub fn tx(id: &str, amount: f64) -> Transaction {
    Transaction {
        transaction_id: id.to_string(),
        amount,
        currency: "USD".to_string(),
        timestamp: parse_timestamp("2024-06-01T10:00:00Z").unwrap(),
        customer_id: "CUST-0003".to_string(),
        counterparty: "Northwind Traders".to_string(),
    }
}

pub async fn test_state(analyst: Arc<dyn DeepAnalyzer>, model: AnomalyModel) -> AppState {
    test_state_with_frontend(analyst, model, PathBuf::from("does-not-exist")).await
}

pub async fn test_state_with_frontend(
    analyst: Arc<dyn DeepAnalyzer>,
    model: AnomalyModel,
    frontend_dir: PathBuf,
) -> AppState {
    let db = Database::in_memory().await.unwrap();
    AppState::from_parts(db, model, analyst, frontend_dir, 1024 * 1024)
}
