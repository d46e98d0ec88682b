use actix_web::HttpResponse;

/// Liveness probe for the hosting platform. Never touches the poller.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("👋 Polling server active")
}
