// src/main.rs

use axum::{routing::post, serve, Router};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

mod adapter;
mod api;
mod auction;
mod cache;
mod cookie;
mod error;
mod logging;
mod metrics;
mod mock_bidder;
mod model;
mod openrtb;
mod settings;

use adapter::appnexus::AppnexusAdapter;
use adapter::catalog::AdapterCatalog;
use adapter::pulsepoint::PulsepointAdapter;
use auction::orchestrator::AuctionOrchestrator;
use auction::transport::ReqwestTransport;
use cache::PrebidCache;
use cookie::service::UidsCookieService;
use logging::runtime_logger::RuntimeLogger;
use settings::FileApplicationSettings;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AuctionOrchestrator>,
    pub runtime_logger: Arc<RuntimeLogger>,
}

#[derive(Parser, Debug)]
#[command(version = "1.0", about = "A Prebid-style bid-request broker")]
struct CliArgs {
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    #[arg(long, default_value = "static/accounts.json")]
    accounts_file: String,
    /// Public URL bidders redirect usersyncs back through.
    #[arg(long, default_value = "http://localhost:8000")]
    external_url: String,
    #[arg(long, default_value = "http://localhost:9001/cache")]
    cache_endpoint: String,
    #[arg(long, default_value_t = 9001)]
    mock_bidder_port: u16,
    #[arg(long, default_value = "http://localhost:9001/bid")]
    pulsepoint_endpoint: String,
    #[arg(long, default_value = "http://localhost:9001/bid")]
    appnexus_endpoint: String,
    #[arg(long, default_value = "uids_optout")]
    opt_out_cookie_name: String,
    #[arg(long, default_value = "true")]
    opt_out_cookie_value: String,
    #[arg(long)]
    host_cookie_family: Option<String>,
    #[arg(long)]
    host_cookie_name: Option<String>,
    #[arg(long)]
    cookie_domain: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // Mock bidder for local runs; the default adapter endpoints point at it.
    let bidder_mock_server = tokio::spawn({
        let port = args.mock_bidder_port;
        async move {
            mock_bidder::start_mock_bidder_server(port).await;
        }
    });

    let log_file = rolling::hourly(&args.log_dir, "broker_log.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");
    info!("broker starting on port {}", args.port);

    let runtime_logger = RuntimeLogger::new(&args.log_dir, "auction", 1000, 100, 1000);
    runtime_logger.log("INFO", "broker is starting...").await;

    let settings = Arc::new(FileApplicationSettings::from_file(&args.accounts_file));

    let catalog = Arc::new(AdapterCatalog::new(vec![
        Arc::new(PulsepointAdapter::new(
            &args.pulsepoint_endpoint,
            "http://bh.contextweb.com/rtset?pid=561205&ev=1&rurl=",
            &args.external_url,
        )),
        Arc::new(AppnexusAdapter::new(
            &args.appnexus_endpoint,
            "http://ib.adnxs.com/getuid?",
            &args.external_url,
        )),
    ]));

    let cookie_service = Arc::new(UidsCookieService::new(
        Some(args.opt_out_cookie_name.clone()),
        Some(args.opt_out_cookie_value.clone()),
        args.host_cookie_family.clone(),
        args.host_cookie_name.clone(),
        args.cookie_domain.clone(),
    ));

    let orchestrator = Arc::new(AuctionOrchestrator::new(
        settings,
        catalog,
        Arc::new(ReqwestTransport::new()),
        Arc::new(PrebidCache::new(&args.cache_endpoint, &args.cache_endpoint)),
        cookie_service,
        Some(runtime_logger.clone()),
    ));

    let state = Arc::new(AppState {
        orchestrator,
        runtime_logger: runtime_logger.clone(),
    });

    let broker_server = tokio::spawn({
        let state = state.clone();
        let port = args.port;
        let runtime_logger = runtime_logger.clone();
        async move {
            let app = Router::new()
                .route("/auction", post(api::handlers::handle_auction))
                .with_state(state);
            let addr = format!("0.0.0.0:{}", port);
            runtime_logger
                .log("INFO", &format!("broker running at http://{}", addr))
                .await;
            let listener = TcpListener::bind(&addr).await.unwrap();
            serve(listener, app).await.unwrap();
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            runtime_logger.log("INFO", "Shutting down gracefully...").await;
        }
    }

    runtime_logger.shutdown().await;
    broker_server.abort();
    bidder_mock_server.abort();
    info!("broker shut down.");
}
