use actix_web::{middleware::Logger, web::Data, App, HttpServer};
use dotenv::dotenv;
use tokio::sync::mpsc;

use pto_notifier::config::Config;
use pto_notifier::handlers::{self, webhook::WebhookState};
use pto_notifier::services::{
    notion::NotionService, slack::SlackService, watermark::FileWatermarkStore,
};
use pto_notifier::tasks::poll_task::Poller;

const TRIGGER_QUEUE_SIZE: usize = 32;

fn fatal(message: String) -> ! {
    log::error!("{}", message);
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()
        .unwrap_or_else(|e| fatal(format!("Failed to load configuration: {}", e)));

    let timeout = config.app.http_timeout();
    let notion = NotionService::new(config.notion.clone(), timeout)
        .unwrap_or_else(|e| fatal(format!("Failed to build Notion client: {:#}", e)));
    let slack = SlackService::new(config.slack.clone(), timeout)
        .unwrap_or_else(|e| fatal(format!("Failed to build Slack client: {:#}", e)));
    let store = FileWatermarkStore::new(&config.app.watermark_file);

    let poller = Poller::new(
        notion,
        slack,
        store,
        config.labels.clone(),
        config.app.notify_since,
    )
    .unwrap_or_else(|e| fatal(format!("Failed to load watermark: {:#}", e)));

    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_SIZE);
    tokio::spawn(poller.run(config.app.poll_interval(), trigger_rx));

    let webhook_state = Data::new(WebhookState::new(
        trigger_tx,
        config.notion.webhook_secret.clone(),
    ));

    let bind_address = format!("0.0.0.0:{}", config.app.port);
    log::info!(
        "Watching database {} and posting to channel {}",
        config.notion.database_id,
        config.slack.channel_id
    );
    println!("🚀 Starting PTO notifier on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(webhook_state.clone())
            .configure(handlers::routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
