use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lumewatch::api;
use lumewatch::api::ApiContext;
use lumewatch::chain::ChainClient;
use lumewatch::config::Settings;
use lumewatch::probe::Prober;
use lumewatch::scheduler::Runner;
use lumewatch::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = match env::var("LW_LOG") {
        Ok(value) => value,
        _ => "info".to_owned(),
    };
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(level)
        .finish();
    let _guard = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("starting lumewatch");
    let settings = Settings::from_env();

    let store = Store::connect(&settings.db_url, settings.db_max_conns).await?;
    store.init_schema().await?;
    tracing::info!("database ready");

    let chain = ChainClient::new(&settings.chain_api_base, settings.http_timeout)?;
    let prober = Prober::new(settings.dial_timeout)?;

    let shutdown = CancellationToken::new();

    let runner = Runner::new(settings.clone(), store.clone(), chain, prober);
    runner.clone().start(shutdown.clone()).await;

    let ctx = Arc::new(ApiContext {
        store,
        runner,
        enable_sync_endpoint: settings.enable_sync_endpoint,
    });
    let server = tokio::spawn(api::serve(
        settings.api_bind,
        ctx,
        settings.clone(),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = server.await;
    tracing::info!("stopped");
    Ok(())
}
