use actix_web::web;

pub mod health;
pub mod webhook;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health::health_check))
        .service(webhook::notion_webhook);
}
