use std::net::SocketAddr;
use std::sync::Arc;

use calorie_analytics::InlineAnalyticsAggregator;
use calorie_core::config::AppConfig;
use calorie_core::logging::init_tracing;
use calorie_mediagroup::MediaGroupAggregator;
use calorie_permission::RedisPermissionNoticeStore;
use calorie_queue::RedisJobQueue;
use calorie_telemetry::InlineTelemetry;
use calorie_trigger::BotIdentity;
use tracing::info;

use calorie_gateway::app::{build_router, AppState};
use calorie_gateway::chat_sender::TelegramChatSender;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var("CALORIE_CONFIG").ok();
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let permissions = RedisPermissionNoticeStore::new(&config.redis.redis_url)
        .unwrap_or_else(|e| {
            eprintln!("fatal: failed to connect permission-notice store: {e}");
            std::process::exit(1);
        });
    let queue = RedisJobQueue::new(&config.redis.redis_url).unwrap_or_else(|e| {
        eprintln!("fatal: failed to connect job queue: {e}");
        std::process::exit(1);
    });
    let analytics = InlineAnalyticsAggregator::open(&config.analytics.db_path).unwrap_or_else(|e| {
        eprintln!("fatal: failed to open analytics database: {e}");
        std::process::exit(1);
    });

    let bot = teloxide::Bot::new(&config.telegram.bot_token);
    let bot_identity = BotIdentity::new(config.telegram.bot_username.clone());
    let chat_sender = Arc::new(TelegramChatSender::new(bot.clone()));

    let state = Arc::new(AppState {
        config,
        telemetry: InlineTelemetry::default(),
        permissions: Box::new(permissions),
        queue: Box::new(queue),
        mediagroup: MediaGroupAggregator::new(),
        analytics,
        bot_identity,
        chat_sender,
        bot,
    });

    let router = build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("calorie-gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
