use actix_web::web::{Bytes, Data};
use actix_web::{post, HttpRequest, HttpResponse};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::webhook::WebhookPayload;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Notion-Signature";

#[derive(Debug, Serialize)]
pub struct ApiResponseError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Shared with the webhook handler. Hands record ids to the poller without
/// ever waiting on it.
#[derive(Clone)]
pub struct WebhookState {
    trigger: mpsc::Sender<String>,
    secret: Option<String>,
}

impl WebhookState {
    pub fn new(trigger: mpsc::Sender<String>, secret: Option<String>) -> Self {
        Self { trigger, secret }
    }
}

/// Checks `sha256=<hex>` against an HMAC-SHA256 of the raw body.
pub fn validate_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(expected) = hex::decode(provided) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

// POST /notion-webhook
#[post("/notion-webhook")]
pub async fn notion_webhook(
    req: HttpRequest,
    body: Bytes,
    state: Data<WebhookState>,
) -> HttpResponse {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("Rejecting malformed webhook body: {}", e);
            return HttpResponse::BadRequest().json(ApiResponseError {
                message: "Invalid webhook payload".to_string(),
                details: Some(e.to_string()),
            });
        }
    };

    // The subscription handshake is unsigned: its token becomes the signing secret.
    if let Some(token) = &payload.verification_token {
        log::info!("Received Notion webhook verification token: {}", token);
        return HttpResponse::Ok().body("Verification received");
    }

    if let Some(secret) = &state.secret {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let valid = signature
            .map(|sig| validate_webhook_signature(secret, &body, sig))
            .unwrap_or(false);
        if !valid {
            log::warn!("Rejecting webhook with missing or invalid signature");
            return HttpResponse::Unauthorized().json(ApiResponseError {
                message: "Invalid signature".to_string(),
                details: None,
            });
        }
    }

    log::debug!("Webhook payload: {:?}", payload);

    match payload.created_record_id() {
        Some(record_id) => match state.trigger.try_send(record_id.to_string()) {
            Ok(()) => log::info!("📣 Queued poll for new record {}", record_id),
            Err(TrySendError::Full(_)) => {
                log::warn!("Trigger queue full; record {} left to the next poll", record_id)
            }
            Err(TrySendError::Closed(_)) => {
                log::error!("Poller is not running; dropped trigger for {}", record_id)
            }
        },
        None => log::debug!("Ignoring webhook event {:?}", payload.kind()),
    }

    HttpResponse::Ok().body("Webhook received")
}
