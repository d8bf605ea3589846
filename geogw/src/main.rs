use std::path::PathBuf;

use tracing::error;
use tracing_subscriber::EnvFilter;

use geogw::Gateway;
use geogw_core::DatadirConfig;

#[tokio::main]
async fn main() {
    let datadir = PathBuf::from(
        std::env::var("GEOGW_DATADIR").unwrap_or_else(|_| "datadir".to_string()),
    );

    let config = match DatadirConfig::load(&datadir) {
        Ok(config) => config,
        Err(e) => {
            // tracing is not up yet: startup failures go to stderr
            eprintln!("configuration error in {}: {e}", datadir.display());
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let gateway = match Gateway::builder(config).build().await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "gateway startup failed");
            std::process::exit(1);
        }
    };

    let addr = std::env::var("GEOGW_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    if let Err(e) = geogw::serve(gateway, &addr).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn init_tracing(config: &DatadirConfig) {
    let logging = &config.logging.logging;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
