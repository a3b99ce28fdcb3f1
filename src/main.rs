mod app;
mod bootstrap;
mod config;
mod snapshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_base().await;

    bootstrap::init_binding().await
}
