//! Web service command: `questforge serve`.

use anyhow::Result;
use questforge::config::QuestConfig;
use questforge::web::{ServerConfig, start_server};

use super::generate::build_generator;

pub async fn cmd_serve(
    config: QuestConfig,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let generator = build_generator(&config.generation)?;

    let server = ServerConfig {
        host: host.unwrap_or_else(|| config.server.host.clone()),
        port: port.unwrap_or(config.server.port),
        dev_mode: dev,
    };
    start_server(server, config.server, config.generation, generator).await
}
