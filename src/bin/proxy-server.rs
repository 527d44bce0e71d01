//! `proxy-server` -- the process entrypoint. Loads configuration,
//! builds the shared engine state, and serves both protocol revisions
//! over one HTTP/2 listener until a shutdown signal arrives.

use anyhow::Context;
use broker_proxy::activities::v1::MessagingServiceV1;
use broker_proxy::activities::v2::MessagingServiceV2;
use broker_proxy::bootstrap::ProxyState;
use clap::Parser;
use proxy_core::config::ProxyConfig;
use proxy_core::shutdown::GracefulShutdown;
use proxy_proto::v1::messaging_service_server::MessagingServiceServer as MessagingServiceServerV1;
use proxy_proto::v2::messaging_service_server::MessagingServiceServer as MessagingServiceServerV2;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Server;

#[derive(Parser)]
#[command(name = "proxy-server")]
#[command(about = "Stateless gRPC-to-legacy-broker message proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Explicit config file path, bypassing $RMQ_PROXY_HOME resolution.
    #[arg(long, env = "RMQ_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => ProxyConfig::load_from(&path).context("loading config from --config path")?,
        None => ProxyConfig::load().context("loading config from RMQ_PROXY_HOME")?,
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_server_port)
        .parse()
        .context("invalid grpcServerPort")?;

    let state = ProxyState::build(config).context("building proxy state")?;

    let shutdown = Arc::new(GracefulShutdown::new());
    spawn_background_services(&state, &shutdown);

    let health_service = build_health_service().await;
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(proxy_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("building gRPC reflection service")?;

    tracing::info!(%addr, "proxy-server listening");

    let server = Server::builder()
        .add_service(MessagingServiceServerV1::new(MessagingServiceV1::new(state.clone())))
        .add_service(MessagingServiceServerV2::new(MessagingServiceV2::new(state.clone())))
        .add_service(health_service)
        .add_service(reflection_service)
        .serve_with_shutdown(addr, async {
            shutdown.wait().await;
            tracing::info!("shutdown signal received, draining in-flight RPCs");
        });

    server.await.context("gRPC server terminated with an error")?;

    state.forward.shutdown_all().await;
    tracing::info!("proxy-server stopped");
    Ok(())
}

/// Runs the periodic half-message heartbeat loop and the relay channel's
/// idle-client/timed-out-pending sweeper for the process lifetime, each
/// tied to its own shutdown token so they stop in step with the server.
fn spawn_background_services(state: &Arc<ProxyState>, shutdown: &Arc<GracefulShutdown>) {
    let tx_heartbeat = state.tx_heartbeat.clone();
    let heartbeat_token = shutdown.token();
    tokio::spawn(async move {
        tx_heartbeat.run(heartbeat_token).await;
    });

    let relay = state.relay.clone();
    let sweeper_token = shutdown.token();
    tokio::spawn(async move {
        relay.run_sweeper(sweeper_token).await;
    });
}

async fn build_health_service() -> tonic_health::pb::health_server::HealthServer<impl tonic_health::pb::health_server::Health> {
    let (reporter, health_service) = tonic_health::server::health_reporter();
    reporter
        .set_serving::<proxy_proto::v1::messaging_service_server::MessagingServiceServer<MessagingServiceV1>>()
        .await;
    reporter
        .set_serving::<proxy_proto::v2::messaging_service_server::MessagingServiceServer<MessagingServiceV2>>()
        .await;
    health_service
}
