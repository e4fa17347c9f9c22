use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::dispatcher::{AskRequest, DispatchError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AskBody {
    pub user_id: String,
    pub prompt: String,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Defaults to the configured bank when omitted
    #[serde(default)]
    pub bank_name: Option<String>,
    /// Defaults to the configured demo phone when omitted
    #[serde(default)]
    pub phone_num: Option<String>,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/ask").route(web::post().to(ask)));
}

async fn ask(state: web::Data<AppState>, body: web::Json<AskBody>) -> impl Responder {
    let body = body.into_inner();
    let request = AskRequest {
        user_id: body.user_id,
        prompt: body.prompt,
        account_id: body.account_id,
        bank_name: body
            .bank_name
            .unwrap_or_else(|| state.config.default_bank.clone()),
        phone: body.phone_num.or_else(|| Some(state.config.default_phone.clone())),
    };

    match state.dispatcher.dispatch(request).await {
        Ok(outcome) => HttpResponse::Ok().json(AskResponse {
            success: true,
            reply: Some(outcome.reply),
            source: Some(outcome.source),
            error: None,
        }),
        Err(DispatchError::BadRequest(msg)) => HttpResponse::BadRequest().json(AskResponse {
            success: false,
            reply: None,
            source: None,
            error: Some(msg),
        }),
        Err(DispatchError::Internal(msg)) => {
            log::error!("Ask dispatch error: {}", msg);
            HttpResponse::InternalServerError().json(AskResponse {
                success: false,
                reply: None,
                source: None,
                error: Some("Internal server error".to_string()),
            })
        }
    }
}
