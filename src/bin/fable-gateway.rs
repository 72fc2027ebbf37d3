use std::sync::Arc;

use fable_gateway::config::GatewayConfig;
use fable_gateway::gateway::ChatGateway;
use fable_gateway::model::LanguageModel;
use fable_gateway::providers::{SimulatedModel, WorkersAi};
use fable_gateway::store::{KeyValueStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let usage = "usage: fable-gateway <config.json> [--listen HOST:PORT] [--redis URL] [--redis-prefix PREFIX] [--simulate] [--json-logs]";
    let config_path = args.next().ok_or(usage)?;

    let mut listen = "127.0.0.1:8080".to_string();
    let mut redis_url: Option<String> = None;
    let mut redis_prefix: Option<String> = None;
    let mut simulate = false;
    let mut json_logs = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen = args.next().ok_or("missing value for --listen/--addr")?;
            }
            "--redis" => {
                redis_url = Some(args.next().ok_or("missing value for --redis")?);
            }
            "--redis-prefix" => {
                redis_prefix = Some(args.next().ok_or("missing value for --redis-prefix")?);
            }
            "--simulate" => {
                simulate = true;
            }
            "--json-logs" => {
                json_logs = true;
            }
            "--help" | "-h" => {
                println!("{usage}");
                return Ok(());
            }
            other => return Err(format!("unknown arg: {other}").into()),
        }
    }

    init_tracing(json_logs);

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|err| format!("failed to read {config_path}: {err}"))?;
    let config = GatewayConfig::from_json_str(&raw)
        .map_err(|err| format!("failed to parse {config_path}: {err}"))?;

    let store = open_store(redis_url, redis_prefix).await?;

    let model: Arc<dyn LanguageModel> = if simulate {
        tracing::info!("serving simulated completions, no provider calls will be made");
        Arc::new(SimulatedModel)
    } else {
        Arc::new(
            WorkersAi::new(&config.provider.account_id, &config.provider.api_token)
                .with_model(&config.provider.model),
        )
    };

    let gateway = Arc::new(
        ChatGateway::new(model, store.clone())
            .with_generation(config.generation_config())
            .with_rate_limit(store.clone(), config.limits.requests, config.limits.window_secs)
            .with_cache_ttl(store, config.cache_ttl_secs),
    );

    let app = fable_gateway::http::router(gateway);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    println!("fable-gateway listening on {listen}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[cfg(feature = "store-redis")]
async fn open_store(
    redis_url: Option<String>,
    redis_prefix: Option<String>,
) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    match redis_url {
        Some(url) => {
            let mut store = fable_gateway::RedisStore::new(&url)?;
            if let Some(prefix) = redis_prefix {
                store = store.with_prefix(prefix);
            }
            store.ping().await?;
            tracing::info!("using redis for rate limits and the completion cache");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "store-redis"))]
async fn open_store(
    redis_url: Option<String>,
    _redis_prefix: Option<String>,
) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    if redis_url.is_some() {
        return Err("rebuild with --features store-redis to use --redis".into());
    }
    Ok(Arc::new(MemoryStore::new()))
}
