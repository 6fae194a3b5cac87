use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use modguard::{
    api::{create_app, ModerationApiState, SecurityMiddlewareConfig, SecurityState},
    config::{sanitize_for_logging, AppConfig},
    database::{DatabasePool, MemoryStore, StrikeStore, WhitelistStore},
    toxicity::{
        http::{build_client, validate_endpoint, AnalyzerHttpConfig},
        OpenAiModerationAnalyzer, PerspectiveAnalyzer, ToxicityAnalyzer,
    },
    ModerationEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check MODGUARD_* environment variables.");
        e
    })?;

    init_secure_logging(&config)?;

    info!("Starting modguard moderation server");
    info!(
        "Security settings: analyzer HTTPS required: {}, Auth enabled: {}",
        config.analyzers.require_https, config.security.enable_auth
    );

    let analyzers = build_analyzers(&config)?;
    let (strikes, whitelist) = open_stores(&config).await?;

    let engine = ModerationEngine::new(
        config.engine.clone(),
        analyzers,
        Duration::from_millis(config.analyzers.timeout_ms),
        strikes,
        whitelist,
    )
    .context("Failed to build moderation engine")?;

    let security_state = SecurityState::new(SecurityMiddlewareConfig::from_app_config(&config));

    let rate_limiter = security_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.cleanup();
        }
    });

    let app = create_app(ModerationApiState::new(Arc::new(engine)), security_state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("modguard listening on {}", bind_addr);
    info!(
        "Security middleware: Auth={}, Rate limit={}/min, Max body={}KB",
        config.security.enable_auth,
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );

    // Serve with connect info for client IP extraction
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_secure_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if config.logging.sanitize_logs {
        info!("Secure logging initialized with data sanitization enabled");
    }

    Ok(())
}

/// Remote analyzers for every configured API key. The pattern analyzer is
/// added by the engine itself.
fn build_analyzers(config: &AppConfig) -> Result<Vec<Arc<dyn ToxicityAnalyzer>>> {
    let settings = &config.analyzers;
    let mut analyzers: Vec<Arc<dyn ToxicityAnalyzer>> = Vec::new();

    if settings.perspective_api_key.is_none() && settings.openai_api_key.is_none() {
        warn!("No remote analyzer keys configured - decisions rely on local patterns only");
        return Ok(analyzers);
    }

    let client = build_client(&AnalyzerHttpConfig {
        require_https: settings.require_https,
        timeout_ms: settings.timeout_ms,
        ..AnalyzerHttpConfig::default()
    })?;

    if let Some(key) = &settings.perspective_api_key {
        let endpoint = validate_endpoint(&settings.perspective_endpoint, settings.require_https)?;
        info!(
            endpoint = %endpoint,
            key = %sanitize_for_logging(key),
            "Perspective analyzer enabled"
        );
        analyzers.push(Arc::new(PerspectiveAnalyzer::new(client.clone(), endpoint, key.clone())));
    }

    if let Some(key) = &settings.openai_api_key {
        let endpoint = validate_endpoint(&settings.openai_endpoint, settings.require_https)?;
        info!(
            endpoint = %endpoint,
            key = %sanitize_for_logging(key),
            "OpenAI moderation analyzer enabled"
        );
        analyzers.push(Arc::new(OpenAiModerationAnalyzer::new(client, endpoint, key.clone())));
    }

    Ok(analyzers)
}

async fn open_stores(config: &AppConfig) -> Result<(Arc<dyn StrikeStore>, Arc<dyn WhitelistStore>)> {
    if !config.database.postgres_enabled {
        warn!("PostgreSQL disabled - strikes and whitelist are kept in memory only");
        let store = Arc::new(MemoryStore::new());
        let strikes: Arc<dyn StrikeStore> = store.clone();
        let whitelist: Arc<dyn WhitelistStore> = store;
        return Ok((strikes, whitelist));
    }

    let pool = DatabasePool::new(&config.database.postgres_url, config.database.max_connections)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to PostgreSQL at {}",
                sanitize_for_logging(&config.database.postgres_url)
            )
        })?;
    pool.init_schema().await.context("Failed to initialize database schema")?;

    Ok((pool.strike_store(), pool.whitelist_store()))
}
