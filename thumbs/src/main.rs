use clap::Parser;
use tokio_util::sync::CancellationToken;

use thumbs::app;
use thumbs::config::AppConfig;
use thumbs::logging::init_logging;
use thumbs::panic_hook;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::parse();
    init_logging(&config.log_filter)?;
    panic_hook::install();

    let runtime = config.validate()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        tcp = ?runtime.listen.tcp,
        uds = ?runtime.listen.uds,
        upstream_version = %runtime.transport.version,
        ip_family = %runtime.transport.ip_family,
        block_checker = runtime.monitor.is_some(),
        "Starting thumbs"
    );

    let shutdown = CancellationToken::new();
    app::spawn_signal_handler(shutdown.clone());
    app::run(runtime, shutdown).await?;
    Ok(())
}
