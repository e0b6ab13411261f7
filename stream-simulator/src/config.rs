use anyhow::{Context, Result};
use common::StreamConfig;
use player_controller::ControllerSettings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// 模拟点对点协商的行为
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerProfile {
    /// 协商耗时
    pub connect_delay_ms: u64,
    /// 前 N 次协商失败
    pub failures_before_success: u32,
    /// 播放一段时间后断开
    pub drop_after_ms: Option<u64>,
}

impl Default for PeerProfile {
    fn default() -> Self {
        Self {
            connect_delay_ms: 300,
            failures_before_success: 0,
            drop_after_ms: None,
        }
    }
}

/// 模拟分片引擎的行为
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentedProfile {
    pub supported: bool,
    pub startup_ms: u64,
    /// 周期性欠载
    pub stall_every_ms: Option<u64>,
    pub stall_ms: u64,
    /// 前 N 次加载失败（播放列表不可达）
    pub load_failures: u32,
}

impl Default for SegmentedProfile {
    fn default() -> Self {
        Self {
            supported: true,
            startup_ms: 800,
            stall_every_ms: None,
            stall_ms: 500,
            load_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    #[serde(flatten)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub peer: PeerProfile,
    #[serde(default)]
    pub segmented: SegmentedProfile,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feeds: Vec<FeedConfig>,
    pub settings: ControllerSettings,
    /// 运行时长，未设置时运行到 Ctrl+C
    pub run_for: Option<Duration>,
}

impl Config {
    /// 加载配置
    ///
    /// `SIMULATOR_FEEDS` 指向 JSON 文件（画面数组）时从文件读取，否则使用内置画面。
    pub fn load() -> Result<Self> {
        let feeds = match std::env::var("SIMULATOR_FEEDS") {
            Ok(path) => Self::load_feeds(&PathBuf::from(path))?,
            Err(_) => Self::default_feeds(),
        };

        let settings = ControllerSettings::from_env().context("invalid controller settings")?;

        let run_for = match std::env::var("SIMULATOR_RUN_SECS") {
            Ok(raw) => Some(Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("invalid SIMULATOR_RUN_SECS: {}", raw))?,
            )),
            Err(_) => None,
        };

        Ok(Self {
            feeds,
            settings,
            run_for,
        })
    }

    fn load_feeds(path: &PathBuf) -> Result<Vec<FeedConfig>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed file {:?}", path))?;
        parse_feeds(&raw).with_context(|| format!("failed to parse feed file {:?}", path))
    }

    fn default_feeds() -> Vec<FeedConfig> {
        vec![
            // 低延迟正常
            FeedConfig {
                stream: StreamConfig::new("gate-north")
                    .with_low_latency("https://edge.local/gate-north/whep")
                    .with_segmented("https://cdn.local/gate-north/index.m3u8")
                    .with_token(1),
                peer: PeerProfile::default(),
                segmented: SegmentedProfile::default(),
            },
            // 低延迟前两次失败，之后恢复
            FeedConfig {
                stream: StreamConfig::new("loading-dock")
                    .with_low_latency("https://edge.local/loading-dock/whep")
                    .with_segmented("https://cdn.local/loading-dock/index.m3u8?auth=demo")
                    .with_token(7),
                peer: PeerProfile {
                    failures_before_success: 2,
                    ..PeerProfile::default()
                },
                segmented: SegmentedProfile {
                    stall_every_ms: Some(4_000),
                    load_failures: 1,
                    ..SegmentedProfile::default()
                },
            },
            // 没有回退地址
            FeedConfig {
                stream: StreamConfig::new("lobby")
                    .with_low_latency("https://edge.local/lobby/whep")
                    .with_token(3),
                peer: PeerProfile {
                    failures_before_success: u32::MAX,
                    ..PeerProfile::default()
                },
                segmented: SegmentedProfile::default(),
            },
        ]
    }
}

pub fn parse_feeds(raw: &str) -> Result<Vec<FeedConfig>> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feeds_with_profiles() {
        let raw = r#"[
            {
                "streamId": "cam-1",
                "lowLatencyEndpoint": "https://x/whep",
                "segmentedSourceUrl": "https://y/index.m3u8",
                "sessionToken": 4,
                "peer": { "failuresBeforeSuccess": 3 },
                "segmented": { "loadFailures": 2 }
            },
            { "streamId": "cam-2", "segmentedSourceUrl": "https://y/2.m3u8" }
        ]"#;

        let feeds = parse_feeds(raw).unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].stream.session_token, 4);
        assert_eq!(feeds[0].peer.failures_before_success, 3);
        assert_eq!(feeds[0].peer.connect_delay_ms, 300);
        assert!(feeds[1].stream.low_latency_endpoint.is_none());
        assert_eq!(feeds[0].segmented.load_failures, 2);
        assert_eq!(feeds[0].segmented.startup_ms, 800);
        assert!(feeds[1].segmented.supported);
        assert_eq!(feeds[1].segmented.load_failures, 0);
    }

    #[test]
    fn test_default_feeds_are_distinct() {
        let feeds = Config::default_feeds();
        let mut ids: Vec<_> = feeds.iter().map(|f| f.stream.stream_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
