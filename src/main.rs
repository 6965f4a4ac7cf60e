use liomesh::sim::{self, SimConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "simulate".into());
    match mode.as_str() {
        "simulate" => {
            let config = SimConfig::from_env();
            info!(
                nodes = config.nodes,
                run_secs = config.run.as_secs(),
                "liomesh simulation"
            );
            let report = sim::run(config).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        other => Err(format!("unknown mode `{other}`, expected `simulate`").into()),
    }
}
