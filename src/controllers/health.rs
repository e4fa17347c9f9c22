use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    banks: Vec<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health)));
}

async fn health(state: web::Data<AppState>) -> impl Responder {
    match state.gateway.supported_banks().await {
        Ok(banks) => HttpResponse::Ok().json(HealthResponse {
            status: "ok",
            banks,
        }),
        Err(e) => {
            log::warn!("Hub unreachable during health check: {}", e);
            HttpResponse::Ok().json(HealthResponse {
                status: "degraded",
                banks: vec![],
            })
        }
    }
}
