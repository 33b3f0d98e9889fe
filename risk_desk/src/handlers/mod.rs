mod frontend;
mod transactions;

use actix_web::{HttpResponse, Responder, get, web};
pub use frontend::*;
pub use transactions::*;

use crate::state::AppState;

#[get("/api/health")]
pub async fn health(app_state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "model_trained": app_state.model.is_trained(),
        "deep_analysis": app_state.analyst.is_enabled(),
    }))
}

/// Registers every route. The static catch-all goes last so API paths win.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(upload_transactions)
        .service(get_transactions)
        .service(get_transaction)
        .service(index)
        .service(static_file);
}
