#![cfg(not(tarpaulin_include))]

use medlog::app;
use medlog::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    println!(
        "Starting medicine log on http://{} ({} upload worker(s))",
        config.bind_addr, config.concurrency
    );

    app::run(config).await
}
