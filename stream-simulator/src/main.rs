mod config;
mod registry;
mod sim;

use anyhow::Result;
use player_controller::{RenderSurface, StreamController};
use registry::FeedRegistry;
use sim::{SimulatedEngine, SimulatedPeer};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("🎥 Stream simulator starting...");

    // 加载配置
    let config = config::Config::load()?;
    info!("✓ Configuration loaded");
    info!("  Feeds: {}", config.feeds.len());
    info!("  Recovery delay: {:?}", config.settings.recovery_delay);
    info!("  Max recovery attempts: {}", config.settings.max_recovery_attempts);

    let registry = FeedRegistry::new();

    for feed in &config.feeds {
        let stream_id = feed.stream.stream_id.clone();
        let surface = RenderSurface::new(&stream_id);
        let handle = StreamController::spawn(
            surface,
            Arc::new(SimulatedPeer::new(feed.peer.clone())),
            Some(Arc::new(SimulatedEngine::new(feed.segmented.clone()))),
            config.settings.clone(),
        );

        // 每路画面的状态以 JSON 行输出
        let mut updates = handle.subscribe();
        let label = stream_id.clone();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => match serde_json::to_string(&update) {
                        Ok(json) => println!("{} {}", label, json),
                        Err(e) => warn!(stream = %label, "Failed to encode status: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(stream = %label, skipped, "Status subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        handle.start(feed.stream.clone())?;
        registry.insert(&stream_id, handle)?;
    }

    info!("✓ {} feed(s) registered", registry.len());
    info!("✅ Stream simulator ready!");
    match config.run_for {
        Some(duration) => {
            info!("   Running for {:?}", duration);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            info!("   Press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("Shutting down...");
    for report in registry.reports().await {
        println!("{}", serde_json::to_string(&report)?);
    }
    registry.shutdown_all().await;

    info!("👋 Stream simulator stopped");
    Ok(())
}
