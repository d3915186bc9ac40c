use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use widget_relay::builtin::builtin_factory;
use widget_relay::BundleDir;
use widget_relay_server::http;
use widget_relay_server::http::AppState;
use widget_relay_server::session_table::SessionTable;

#[derive(Debug, Parser)]
#[command(name = "widget-relay-server")]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Base URL advertised for generated asset links.
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Directory of prebuilt widget bundle artifacts.
    #[arg(long, env = "ASSETS_DIR", default_value = "./dist")]
    assets_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let base_url = args
        .base_url
        .unwrap_or_else(|| format!("http://localhost:{}", args.port));

    let factory = match builtin_factory(BundleDir::new(&args.assets_dir), base_url) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to build session factory: {e}");
            std::process::exit(2);
        }
    };

    let app = axum::Router::new()
        .merge(http::routes())
        .with_state(AppState {
            factory: Arc::new(factory),
            sessions: Arc::new(SessionTable::new()),
        });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind http listener");
    info!(%addr, assets = %args.assets_dir.display(), "widget relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("http server crashed");
}
