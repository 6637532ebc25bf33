use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use ziwei_engine::echo::EchoGenerator;
use ziwei_server::GatewayConfig;
use ziwei_store::{ConversationMirror, Database, SqliteMirror};
use ziwei_telemetry::{init_telemetry, parse_level, LogFormat, TelemetryConfig};

/// Streaming chat gateway for birth-chart conversations.
#[derive(Debug, Parser)]
#[command(name = "ziwei", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "ZIWEI_PORT", default_value_t = 9092)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "ZIWEI_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Default log level. RUST_LOG takes precedence when set.
    #[arg(long, env = "ZIWEI_LOG_LEVEL", default_value = "info", value_parser = level_arg)]
    log_level: Level,

    /// Emit JSON logs instead of compact text.
    #[arg(long, env = "ZIWEI_LOG_JSON")]
    log_json: bool,

    /// Idle time after which a conversation is evicted.
    #[arg(long, env = "ZIWEI_CONVERSATION_TTL_SECS", default_value_t = 6 * 60 * 60)]
    conversation_ttl_secs: u64,

    /// How often expired conversations are swept.
    #[arg(long, env = "ZIWEI_SWEEP_INTERVAL_SECS", default_value_t = 60 * 60)]
    sweep_interval_secs: u64,

    /// Per-call tool time limit.
    #[arg(long, env = "ZIWEI_TOOL_TIMEOUT_SECS", default_value_t = 30)]
    tool_timeout_secs: u64,

    /// Generation passes allowed per turn before it is aborted.
    #[arg(long, env = "ZIWEI_MAX_TOOL_ROUNDS", default_value_t = 8)]
    max_tool_rounds: u32,

    /// Keep-alive comment interval on idle streams.
    #[arg(long, env = "ZIWEI_KEEP_ALIVE_SECS", default_value_t = 15)]
    keep_alive_secs: u64,

    /// SQLite file to mirror conversations into. Mirroring is off when unset.
    #[arg(long, env = "ZIWEI_MIRROR_PATH")]
    mirror_path: Option<PathBuf>,
}

fn level_arg(s: &str) -> Result<Level, String> {
    parse_level(s).ok_or_else(|| format!("unknown log level: {s}"))
}

impl Args {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            port: self.port,
            bind_address: self.bind.clone(),
            conversation_ttl: Duration::from_secs(self.conversation_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            max_tool_rounds: self.max_tool_rounds,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            mirror_path: self.mirror_path.clone(),
            ..GatewayConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_telemetry(&TelemetryConfig {
        log_level: args.log_level,
        format: if args.log_json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
        ..TelemetryConfig::default()
    });

    let config = args.gateway_config();
    config.validate().context("invalid configuration")?;

    let mut mirror_writer = None;
    let mirror: Option<Arc<dyn ConversationMirror>> = match &config.mirror_path {
        Some(path) => {
            let db = Database::open(path).context("open mirror database")?;
            let (mirror, writer) = SqliteMirror::spawn(db).context("start mirror writer")?;
            mirror_writer = Some(writer);
            Some(Arc::new(mirror))
        }
        None => None,
    };

    let handle = ziwei_server::start(config, Arc::new(EchoGenerator), mirror)
        .await
        .context("start gateway")?;
    tracing::info!(port = handle.port, "ziwei gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl+c")?;

    handle.shutdown().await;

    // The store held the last mirror sender; the writer drains and exits.
    if let Some(writer) = mirror_writer {
        let joined = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || writer.join()),
        )
        .await;
        if !matches!(joined, Ok(Ok(Ok(())))) {
            tracing::warn!("mirror writer did not stop cleanly");
        }
    }
    Ok(())
}
