use slideflow::api;
use slideflow::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slideflow=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        backend_url = %config.backend_url,
        working_dir = %config.working_dir.display(),
        "starting slideflow"
    );

    api::serve(config).await
}
