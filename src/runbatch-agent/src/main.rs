use env_logger::Builder;

mod agent;
mod config;
mod docker;
mod envfile;
mod logsink;
mod runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize the logger
    Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    agent::run().await
}
