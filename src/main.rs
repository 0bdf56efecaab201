//! Hive - 多智能体对话编排器
//!
//! 入口：初始化日志、加载配置、构建 agent 模板，在终端 channel 上运行一个 flow。
//! 标准输入的每一行作为人工回复；`@<channel> <text>` 以指定 channel 的身份回复。
//!
//! 用法：`hive [flow] [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use hive::agent::AgentFactory;
use hive::config::load_config;
use hive::core::Orchestrator;
use hive::gateway::{ChannelError, ChannelTransport, SessionRegistry};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_CHANNEL: &str = "console";

/// 把消息打印到终端
struct ConsoleTransport;

#[async_trait]
impl ChannelTransport for ConsoleTransport {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("[{}] {}", channel_id, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let mut args = std::env::args().skip(1);
    let flow = args.next().unwrap_or_else(|| "default".to_string());
    let config_path = args.next().map(PathBuf::from);

    let cfg = load_config(config_path).context("Failed to load configuration")?;
    cfg.validate().context("Invalid configuration")?;
    let cfg = Arc::new(cfg);

    let factory = AgentFactory::from_config(&cfg).context("Failed to create model client")?;
    let registry = Arc::new(
        SessionRegistry::new(Arc::new(ConsoleTransport))
            .with_bindings(&cfg.human_bindings)
            .await,
    );
    let orchestrator = Orchestrator::from_factory(cfg.clone(), &factory, registry.clone())
        .context("Failed to build agents")?;

    let reader_registry = registry.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let (channel, text) = match line.strip_prefix('@').and_then(|rest| rest.split_once(' ')) {
                Some((channel, text)) => (channel.to_string(), text.to_string()),
                None => (CONSOLE_CHANNEL.to_string(), line),
            };
            if reader_registry
                .deliver_human_reply(&channel, &text)
                .await
                .is_none()
            {
                tracing::warn!(channel = %channel, "no flow is waiting for a human reply");
            }
        }
    });

    let cancel_registry = registry.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_registry.cancel(CONSOLE_CHANNEL).await;
        }
    });

    let outcome = orchestrator
        .run(CONSOLE_CHANNEL, &flow)
        .await
        .with_context(|| format!("Flow '{}' failed", flow))?;
    tracing::info!(
        flow = %outcome.flow,
        turns = outcome.turns,
        termination = ?outcome.termination,
        "done"
    );

    registry.close_all().await;
    Ok(())
}
