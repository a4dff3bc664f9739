use groupsage::config::Config;
use groupsage::db::Database;
use groupsage::dispatcher::Dispatcher;
use groupsage::ingest::{IngestScheduler, TopicIngestor};
use groupsage::kb::KnowledgeBase;
use groupsage::llm::LlmClient;
use groupsage::router::Router;
use groupsage::spam::SpamClassifier;
use groupsage::summarize::Summarizer;
use groupsage::transport::WhatsAppClient;
use groupsage::webhook;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load configuration (validated at startup)
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);

    let db = Database::new(&config)?;
    db.execute_init()?;

    let llm = Arc::new(LlmClient::new(&config));
    let transport = Arc::new(WhatsAppClient::new(reqwest::Client::new(), &config));

    let router = Router::new(llm.clone(), &config);
    let kb = KnowledgeBase::new(llm.clone(), llm.clone(), db.clone(), &config);
    let spam = SpamClassifier::new(llm.clone(), &config);
    let summarizer = Summarizer::new(llm.clone(), db.clone(), &config);
    let ingestor = Arc::new(TopicIngestor::new(llm.clone(), db.clone(), &config));

    let dispatcher = Arc::new(Dispatcher::new(
        router,
        kb,
        spam,
        summarizer,
        ingestor.clone(),
        transport,
        db.clone(),
        &config,
    ));

    // Background conversation sweep feeding the knowledge base
    if config.ingest_enabled {
        let scheduler = IngestScheduler::new(db.clone(), llm.clone(), ingestor, &config);
        tokio::spawn(scheduler.run());
        info!(
            "Ingest scheduler running every {}s",
            config.ingest_interval_secs
        );
    }

    let app = webhook::router(dispatcher);
    let listener = tokio::net::TcpListener::bind(&config.webhook_bind).await?;
    info!("Webhook listening on {}", config.webhook_bind);
    axum::serve(listener, app).await?;

    Ok(())
}
