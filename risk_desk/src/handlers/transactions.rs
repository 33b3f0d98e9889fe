use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, error::InternalError, get, http::StatusCode, post, web};
use common::{RiskLevel, Transaction};
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::pipeline::process_upload;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Reads the first multipart field in full, refusing anything over `limit` bytes.
async fn read_first_field(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, Error> {
    let mut field = match payload.next().await {
        Some(field) => field.map_err(|e| {
            log::warn!("Malformed multipart upload: {}", e);
            InternalError::new("Malformed multipart upload.", StatusCode::BAD_REQUEST)
        })?,
        None => {
            return Err(InternalError::new(
                "Upload must contain a file field.",
                StatusCode::BAD_REQUEST,
            )
            .into());
        }
    };

    let mut body = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            log::warn!("Failed to read upload chunk: {}", e);
            InternalError::new("Failed to read uploaded file.", StatusCode::BAD_REQUEST)
        })?;
        if body.len() + chunk.len() > limit {
            return Err(InternalError::new(
                "Uploaded file is too large.",
                StatusCode::PAYLOAD_TOO_LARGE,
            )
            .into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[post("/api/upload")]
pub async fn upload_transactions(
    mut payload: Multipart,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let body = read_first_field(&mut payload, app_state.upload_limit_bytes).await?;

    let batch: Vec<Transaction> = serde_json::from_slice(&body).map_err(|e| {
        log::warn!("Rejected upload with invalid transaction JSON: {}", e);
        InternalError::new(
            format!("Invalid transaction file: {}", e),
            StatusCode::BAD_REQUEST,
        )
    })?;

    let scored = process_upload(&app_state, batch).await.map_err(|e| {
        log::error!("Failed to process upload: {:#}", e);
        InternalError::new(
            "Failed to process transactions. Please try again later.",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    })?;

    Ok(HttpResponse::Ok().json(scored))
}

#[derive(Debug, Deserialize)]
struct TransactionQuery {
    #[serde(default)]
    skip: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    risk_level: Option<String>,
}

#[get("/api/transactions")]
pub async fn get_transactions(
    query: web::Query<TransactionQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if skip < 0 || limit < 0 {
        return Err(InternalError::new(
            "skip and limit must not be negative.",
            StatusCode::BAD_REQUEST,
        )
        .into());
    }
    let limit = limit.min(MAX_LIMIT);

    // Validate `risk_level` if provided
    let level = match query.risk_level.as_deref() {
        Some(raw) => Some(
            raw.parse::<RiskLevel>()
                .map_err(|e| InternalError::new(e.to_string(), StatusCode::BAD_REQUEST))?,
        ),
        None => None,
    };

    let transactions_result = match level {
        Some(level) => {
            app_state
                .db
                .get_transactions_by_level(level, skip, limit)
                .await
        }
        None => app_state.db.get_transactions(skip, limit).await,
    };

    let transactions = transactions_result.map_err(|e| {
        log::error!("Failed to get transactions: {:#}", e);
        InternalError::new(
            "Failed to get transactions. Please try again later.",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    })?;

    Ok(HttpResponse::Ok().json(transactions))
}

#[get("/api/transactions/{transaction_id}")]
pub async fn get_transaction(
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let transaction_id = path.into_inner();

    let maybe_transaction = app_state
        .db
        .get_transaction(&transaction_id)
        .await
        .map_err(|e| {
            log::error!(
                "Database error fetching transaction {}: {:#}",
                transaction_id,
                e
            );
            InternalError::new(
                "Internal server error while fetching transaction.",
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        })?;

    match maybe_transaction {
        Some(transaction) => Ok(HttpResponse::Ok().json(transaction)),
        None => {
            log::warn!("Transaction not found: {}", transaction_id);
            Err(InternalError::new(
                "Transaction with provided ID not found.",
                StatusCode::NOT_FOUND,
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, http::StatusCode, http::header, test, web};
    use common::{AnomalyModel, DEEP_AI_FLAG, PLACEHOLDER_ANALYSIS, RiskLevel, ScoredTransaction};
    use serde_json::json;

    use crate::handlers::configure;
    use crate::test_support::{RecordingAnalyst, test_state};

    const BOUNDARY: &str = "----riskdeskboundary";

    fn multipart_body(content: &str) -> Vec<u8> {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"batch.json\"\r\n\
             Content-Type: application/json\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY
        )
        .into_bytes()
    }

    fn upload_request(content: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/upload")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(content))
    }

    fn batch_json() -> String {
        json!([
            {
                "transaction_id": "TXN-1",
                "amount": 100.0,
                "currency": "USD",
                "timestamp": "2024-06-01T10:00:00Z",
                "customer_id": "CUST-0001",
                "counterparty": "Acme Supplies"
            },
            {
                "transaction_id": "TXN-2",
                "amount": 20000,
                "currency": "EUR",
                "timestamp": "2024-06-01T10:05:00",
                "customer_id": "CUST-0002",
                "counterparty": "Offshore Holdings Ltd"
            }
        ])
        .to_string()
    }

    #[actix_web::test]
    async fn upload_then_list_end_to_end() {
        let analyst = Arc::new(RecordingAnalyst::new(&[(
            "TXN-2",
            95,
            "Large transfer to a shell company.",
        )]));
        let data = web::Data::new(test_state(analyst.clone(), AnomalyModel::Untrained).await);
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let resp = test::call_service(&app, upload_request(&batch_json()).to_request()).await;
        assert!(resp.status().is_success());
        let uploaded: Vec<ScoredTransaction> = test::read_body_json(resp).await;
        assert_eq!(uploaded.len(), 2);

        assert_eq!(uploaded[0].transaction_id, "TXN-1");
        assert_eq!(uploaded[0].risk_level, RiskLevel::Low);
        assert_eq!(uploaded[0].ai_analysis, PLACEHOLDER_ANALYSIS);
        assert!(uploaded[0].flags.is_empty());

        assert_eq!(uploaded[1].risk_score, 95);
        assert_eq!(uploaded[1].risk_level, RiskLevel::High);
        assert!(uploaded[1].has_flag(DEEP_AI_FLAG));
        assert_eq!(analyst.calls(), vec![vec!["TXN-2".to_string()]]);

        let req = test::TestRequest::get().uri("/api/transactions").to_request();
        let listed: Vec<ScoredTransaction> = test::call_and_read_body_json(&app, req).await;
        let ids: Vec<_> = listed.iter().map(|t| t.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["TXN-2", "TXN-1"]);
    }

    #[actix_web::test]
    async fn reupload_returns_empty_list() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let data = web::Data::new(test_state(analyst, AnomalyModel::Untrained).await);
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let first: Vec<ScoredTransaction> =
            test::call_and_read_body_json(&app, upload_request(&batch_json()).to_request()).await;
        assert_eq!(first.len(), 2);

        let second: Vec<ScoredTransaction> =
            test::call_and_read_body_json(&app, upload_request(&batch_json()).to_request()).await;
        assert!(second.is_empty());

        let req = test::TestRequest::get()
            .uri("/api/transactions/TXN-2")
            .to_request();
        let stored: ScoredTransaction = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stored.risk_score, 90);
        assert_eq!(stored.ai_analysis, PLACEHOLDER_ANALYSIS);
    }

    #[actix_web::test]
    async fn malformed_json_is_a_client_error() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let data = web::Data::new(test_state(analyst, AnomalyModel::Untrained).await);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let resp = test::call_service(&app, upload_request("{\"not\": \"a list\"}").to_request())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            upload_request(r#"[{"transaction_id":"x","amount":"lots"}]"#).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let mut state = test_state(analyst, AnomalyModel::Untrained).await;
        state.upload_limit_bytes = 16;
        let data = web::Data::new(state);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let resp = test::call_service(&app, upload_request(&batch_json()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_web::test]
    async fn list_paginates_and_filters() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let data = web::Data::new(test_state(analyst, AnomalyModel::Untrained).await);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;
        let _: Vec<ScoredTransaction> =
            test::call_and_read_body_json(&app, upload_request(&batch_json()).to_request()).await;

        let req = test::TestRequest::get()
            .uri("/api/transactions?skip=1&limit=1")
            .to_request();
        let page: Vec<ScoredTransaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].transaction_id, "TXN-1");

        let req = test::TestRequest::get()
            .uri("/api/transactions?risk_level=high")
            .to_request();
        let high: Vec<ScoredTransaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].transaction_id, "TXN-2");

        let req = test::TestRequest::get()
            .uri("/api/transactions?risk_level=severe")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/transactions?limit=-1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn unknown_transaction_is_not_found() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let data = web::Data::new(test_state(analyst, AnomalyModel::Untrained).await);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/transactions/NOPE")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn health_reports_component_state() {
        let analyst = Arc::new(RecordingAnalyst::new(&[]));
        let data = web::Data::new(test_state(analyst, AnomalyModel::Untrained).await);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            body,
            json!({"status": "ok", "model_trained": false, "deep_analysis": true})
        );
    }
}
