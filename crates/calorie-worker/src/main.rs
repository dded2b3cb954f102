use std::sync::Arc;

use calorie_analytics::InlineAnalyticsAggregator;
use calorie_core::config::AppConfig;
use calorie_core::logging::init_tracing;
use calorie_estimator::OpenAiVisionEstimator;
use calorie_queue::RedisJobQueue;
use calorie_telemetry::InlineTelemetry;
use tokio::sync::watch;
use tracing::info;

use calorie_worker::delivery::TelegramChatDelivery;
use calorie_worker::meal_store::PostgresMealStore;
use calorie_worker::uploader::HttpPresignedUploader;
use calorie_worker::worker::{run_worker, WorkerDeps, WorkerExit};

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

    let database_url = match config.database.resolve_url() {
        Ok(url) => url,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let queue = RedisJobQueue::new(&config.redis.redis_url).unwrap_or_else(|e| {
        eprintln!("fatal: failed to connect job queue: {e}");
        std::process::exit(1);
    });
    let meal_store = PostgresMealStore::connect(&database_url).await.unwrap_or_else(|e| {
        eprintln!("fatal: failed to connect meal store: {e}");
        std::process::exit(1);
    });
    let analytics = InlineAnalyticsAggregator::open(&config.analytics.db_path).unwrap_or_else(|e| {
        eprintln!("fatal: failed to open analytics database: {e}");
        std::process::exit(1);
    });

    let estimator = OpenAiVisionEstimator::new(
        config.openai.openai_api_key.clone(),
        config.openai.openai_model.clone(),
    );
    let uploader = HttpPresignedUploader::new(
        config.object_store.aws_endpoint_url_s3.clone(),
        config.object_store.bucket_name.clone(),
    );
    let bot = teloxide::Bot::new(&config.telegram.bot_token);
    let chat_delivery = TelegramChatDelivery::new(bot);

    let deps = Arc::new(WorkerDeps {
        queue: Arc::new(queue),
        uploader: Arc::new(uploader),
        estimator: Arc::new(estimator),
        meal_store: Arc::new(meal_store),
        chat_delivery: Arc::new(chat_delivery),
        telemetry: InlineTelemetry::default(),
        analytics,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    match run_worker(deps, shutdown_rx).await {
        WorkerExit::Graceful => Ok(()),
        WorkerExit::Unrecoverable => {
            eprintln!("fatal: queue unreachable after exhausting retry budget");
            std::process::exit(2);
        }
    }
}
