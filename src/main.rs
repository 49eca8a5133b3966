use clap::Parser;
use gateway_mediator::config::{self, GatewayConfig};
use gateway_mediator::{build_runtime, http, hub_register, pubsub};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gateway-mediator", version)]
struct Cli {
    /// Path to the TOML config file. Falls back to
    /// `GATEWAY_MEDIATOR_CONFIG`, then `config::DEFAULT_CONFIG_PATH`.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    info!(version = env!("CARGO_PKG_VERSION"), "gateway-mediator starting");

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var("GATEWAY_MEDIATOR_CONFIG").ok())
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_owned());

    let config: GatewayConfig = match config::load_config_from_path(std::path::Path::new(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: failed to load config from '{config_path}': {e}");
            std::process::exit(1);
        }
    };

    let http_bind = config.http.bind.clone();
    let mqtt = config.mqtt.clone();
    let hub = config.hub.clone();

    let runtime = build_runtime(config);
    let app_state = http::AppState::new(runtime.queue.clone(), runtime.pool.clone());

    if let Some(mqtt) = mqtt {
        let bridge = pubsub::PubSubBridge::new(
            &mqtt.broker_host,
            mqtt.broker_port,
            &mqtt.device_id,
            runtime.queue.clone(),
        );
        tokio::spawn(bridge.run());
        info!(host = mqtt.broker_host, port = mqtt.broker_port, "pub/sub bridge started");
    } else {
        info!("no [mqtt] section configured, pub/sub front-end disabled");
    }

    if let Some(hub) = hub {
        let local_port = local_port_from_bind(&http_bind);
        tokio::spawn(hub_register::run(hub.url.clone(), hub.device_name.clone(), local_port));
        info!(url = hub.url, "hub registration task started");
    } else {
        info!("no [hub] section configured, hub registration disabled");
    }

    let listener = match tokio::net::TcpListener::bind(&http_bind).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind HTTP listener on '{http_bind}': {e}");
            std::process::exit(1);
        }
    };
    info!(bind = http_bind, "HTTP front-end listening");

    if let Err(e) = axum::serve(listener, http::router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("FATAL: HTTP server error: {e}");
        std::process::exit(1);
    }
}

fn local_port_from_bind(bind: &str) -> u16 {
    bind.rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(8000)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining HTTP connections");
}
