// 画面注册表
//
// 每路画面一个独立控制器，按流ID索引。

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use common::PlayerError;
use dashmap::DashMap;
use futures::future::join_all;
use player_controller::{ArbiterSnapshot, ControllerHandle};
use serde::Serialize;
use tracing::{info, warn};

struct FeedEntry {
    handle: ControllerHandle,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedReport {
    pub stream_id: String,
    pub started_at: DateTime<Utc>,
    pub snapshot: ArbiterSnapshot,
}

#[derive(Default)]
pub struct FeedRegistry {
    feeds: DashMap<String, FeedEntry>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stream_id: &str, handle: ControllerHandle) -> Result<()> {
        if self.feeds.contains_key(stream_id) {
            bail!("feed {} already registered", stream_id);
        }
        info!(stream = stream_id, instance = %handle.id(), "Feed registered");
        self.feeds.insert(
            stream_id.to_string(),
            FeedEntry {
                handle,
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// 收集所有画面的仲裁器快照
    pub async fn reports(&self) -> Vec<FeedReport> {
        // 先发出全部查询，不跨 await 持有分片锁
        let pending: Vec<_> = self
            .feeds
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.started_at,
                    entry.handle.inspect(),
                )
            })
            .collect();

        let mut reports = Vec::with_capacity(pending.len());
        for (stream_id, started_at, request) in pending {
            let result = match request {
                Ok(rx) => rx.await.map_err(|_| PlayerError::ControllerStopped),
                Err(e) => Err(e),
            };
            match result {
                Ok(snapshot) => reports.push(FeedReport {
                    stream_id,
                    started_at,
                    snapshot,
                }),
                Err(e) => warn!(stream = %stream_id, "Snapshot failed: {}", e),
            }
        }
        reports.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        reports
    }

    /// 关闭全部控制器
    pub async fn shutdown_all(&self) {
        let keys: Vec<String> = self.feeds.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<_> = keys
            .iter()
            .filter_map(|key| self.feeds.remove(key))
            .map(|(stream_id, entry)| async move {
                if let Err(e) = entry.handle.shutdown().await {
                    warn!(stream = %stream_id, "Feed shutdown failed: {}", e);
                }
            })
            .collect();

        let count = handles.len();
        join_all(handles).await;
        info!("Stopped {} feed(s)", count);
    }
}
