use std::collections::{HashMap, HashSet};

use common::{
    Assessment, CandidatePayload, ScoredTransaction, Transaction, assemble, assess,
    candidate_payload, needs_deep_analysis,
};

use crate::state::AppState;

/// Drops identifiers already stored and repeats within the batch (first one wins).
pub fn filter_new(batch: Vec<Transaction>, known: &HashSet<String>) -> Vec<Transaction> {
    let mut seen = HashSet::new();
    batch
        .into_iter()
        .filter(|tx| !known.contains(&tx.transaction_id))
        .filter(|tx| seen.insert(tx.transaction_id.clone()))
        .collect()
}

/// Scores a batch and persists the new entries. Returns only rows this call inserted.
pub async fn process_upload(
    state: &AppState,
    batch: Vec<Transaction>,
) -> anyhow::Result<Vec<ScoredTransaction>> {
    let received = batch.len();
    let known = state.db.get_all_transaction_ids().await?;
    let fresh = filter_new(batch, &known);

    if fresh.is_empty() {
        log::info!("Upload of {} transactions contained nothing new", received);
        return Ok(Vec::new());
    }

    let assessed: Vec<(Transaction, Assessment)> = fresh
        .into_iter()
        .map(|tx| {
            let assessment = assess(&tx, &state.model);
            log::debug!(
                "Transaction {} amount={} scored {} flags={:?}",
                tx.transaction_id,
                tx.amount,
                assessment.score,
                assessment.flags
            );
            (tx, assessment)
        })
        .collect();

    let candidates: Vec<CandidatePayload> = assessed
        .iter()
        .filter(|(_, assessment)| needs_deep_analysis(assessment))
        .map(|(tx, _)| candidate_payload(tx))
        .collect();

    let verdicts = if candidates.is_empty() {
        HashMap::new()
    } else {
        log::info!("Escalating {} transactions for deep analysis", candidates.len());
        state.analyst.analyze(&candidates).await
    };

    let scored: Vec<ScoredTransaction> = assessed
        .into_iter()
        .map(|(tx, assessment)| assemble(tx, assessment, &verdicts))
        .collect();
    let saved = state.db.save_transactions(&scored).await?;

    log::info!(
        "Upload processed: received={} new={} escalated={} deep_analyzed={}",
        received,
        saved.len(),
        candidates.len(),
        verdicts.len()
    );
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingAnalyst, test_state, tx};
    use common::{
        AnomalyModel, AnomalyParams, DEEP_AI_FLAG, HIGH_AMOUNT_FLAG, ML_ANOMALY_FLAG,
        PLACEHOLDER_ANALYSIS, RiskLevel,
    };
    use std::sync::Arc;

    #[test]
    fn filter_new_drops_known_and_repeated_ids() {
        let known: HashSet<String> = ["A".to_string()].into();
        let batch = vec![tx("A", 1.0), tx("B", 2.0), tx("C", 3.0), tx("B", 4.0)];
        let fresh = filter_new(batch, &known);
        let ids: Vec<_> = fresh.iter().map(|t| (t.transaction_id.as_str(), t.amount)).collect();
        assert_eq!(ids, vec![("B", 2.0), ("C", 3.0)]);
    }

    #[tokio::test]
    async fn low_amounts_never_reach_the_analyst() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let state = test_state(analyst.clone(), AnomalyModel::Untrained).await;

        let saved = process_upload(&state, vec![tx("T-1", 100.0), tx("T-2", 5_000.0)])
            .await
            .unwrap();

        assert_eq!(saved.len(), 2);
        assert!(analyst.calls().is_empty());
        assert_eq!(saved[1].risk_score, 25);
        assert!(saved.iter().all(|t| t.ai_analysis == PLACEHOLDER_ANALYSIS));
    }

    #[tokio::test]
    async fn escalated_transactions_adopt_remote_verdict() {
        let analyst = Arc::new(RecordingAnalyst::new(&[("T-2", 72, "Unusual counterparty")]));
        let state = test_state(analyst.clone(), AnomalyModel::Untrained).await;

        let saved = process_upload(&state, vec![tx("T-1", 100.0), tx("T-2", 20_000.0)])
            .await
            .unwrap();

        assert_eq!(analyst.calls(), vec![vec!["T-2".to_string()]]);
        let low = &saved[0];
        assert_eq!(low.risk_level, RiskLevel::Low);
        assert!(!low.has_flag(DEEP_AI_FLAG));

        let high = &saved[1];
        assert_eq!(high.risk_score, 72);
        assert_eq!(high.risk_level, RiskLevel::Medium);
        assert_eq!(high.ai_analysis, "Unusual counterparty");
        assert_eq!(
            high.flags,
            vec![HIGH_AMOUNT_FLAG.to_string(), DEEP_AI_FLAG.to_string()]
        );
    }

    #[tokio::test]
    async fn analyst_failure_keeps_rule_scores() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let state = test_state(analyst.clone(), AnomalyModel::Untrained).await;

        let saved = process_upload(&state, vec![tx("T-9", 20_000.0)])
            .await
            .unwrap();

        assert_eq!(analyst.calls().len(), 1);
        assert_eq!(saved[0].risk_score, 90);
        assert_eq!(saved[0].risk_level, RiskLevel::High);
        assert_eq!(saved[0].ai_analysis, PLACEHOLDER_ANALYSIS);
        assert!(!saved[0].has_flag(DEEP_AI_FLAG));
    }

    #[tokio::test]
    async fn unreachable_remote_service_does_not_fail_upload() {
        let analyst = Arc::new(
            common::OpenAiAnalyst::new(
                "test-key",
                "http://127.0.0.1:9/v1",
                "gpt-4o-mini",
                std::time::Duration::from_secs(2),
            )
            .unwrap(),
        );
        let state = test_state(analyst, AnomalyModel::Untrained).await;

        let saved = process_upload(&state, vec![tx("T-1", 100.0), tx("T-2", 30_000.0)])
            .await
            .unwrap();
        let scores: Vec<i64> = saved.iter().map(|t| t.risk_score).collect();
        assert_eq!(scores, vec![0, 90]);
    }

    #[tokio::test]
    async fn anomaly_signal_escalates_below_score_threshold() {
        let history: Vec<f64> = (0..200).map(|i| 50.0 + (i % 50) as f64).collect();
        let model = AnomalyModel::train(&history, &AnomalyParams::default());
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let state = test_state(analyst.clone(), model).await;

        let saved = process_upload(&state, vec![tx("T-1", 2_000.0)]).await.unwrap();

        assert_eq!(analyst.calls(), vec![vec!["T-1".to_string()]]);
        assert_eq!(saved[0].risk_score, 10 + 15);
        assert_eq!(saved[0].flags, vec![ML_ANOMALY_FLAG.to_string()]);
    }

    #[tokio::test]
    async fn resubmission_yields_nothing_and_keeps_original() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let state = test_state(analyst.clone(), AnomalyModel::Untrained).await;

        process_upload(&state, vec![tx("T-1", 100.0)]).await.unwrap();
        let again = process_upload(&state, vec![tx("T-1", 99_000.0)])
            .await
            .unwrap();

        assert!(again.is_empty());
        let stored = state.db.get_transaction("T-1").await.unwrap().unwrap();
        assert_eq!(stored.amount, 100.0);
        assert_eq!(stored.risk_score, 0);
        assert!(analyst.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let state = test_state(analyst.clone(), AnomalyModel::Untrained).await;
        assert!(process_upload(&state, vec![]).await.unwrap().is_empty());
    }
}
