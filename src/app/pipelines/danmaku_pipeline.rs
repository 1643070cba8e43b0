use crate::adapters::bilibili::{parse_danmaku_xml, BiliClient};
use crate::config::toml_config::EtlConfig;
use crate::core::index::VideoIndex;
use crate::core::tabular::{safe_title, write_csv};
use crate::core::{Pipeline, Storage};
use crate::domain::model::{CrawlStatus, DanmakuRecord, VideoEntry};
use crate::utils::error::Result;
use std::collections::BTreeMap;

pub struct DanmakuPipeline<S: Storage> {
    storage: S,
    config: EtlConfig,
    client: BiliClient,
    only: Option<String>,
}

pub struct CrawlOutcome {
    pub danmaku: Vec<DanmakuRecord>,
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

impl<S: Storage> DanmakuPipeline<S> {
    pub fn new(storage: S, config: EtlConfig) -> Result<Self> {
        let client = BiliClient::new(&config.platform)?;
        Ok(Self {
            storage,
            config,
            client,
            only: None,
        })
    }

    pub fn with_only(mut self, bvid: Option<String>) -> Self {
        self.only = bvid;
        self
    }

    /// 抓取並解析一支影片的彈幕；限流與解析失敗以指數退避重試
    async fn crawl_video(&self, entry: &mut VideoEntry) -> Result<Vec<DanmakuRecord>> {
        let cid = match entry.cid {
            Some(cid) => cid,
            None => {
                let cid = self.client.resolve_cid(&entry.bvid).await?;
                entry.cid = Some(cid);
                cid
            }
        };
        tracing::debug!("CID: {}", cid);

        let policy = self.config.crawl.retry_policy();
        let mut attempt = 0;
        loop {
            let wait = policy.delay_for(attempt);
            if !wait.is_zero() {
                tracing::info!(
                    "🔁 Retry {}/{} for {}, waiting {}s",
                    attempt + 1,
                    policy.attempts,
                    entry.bvid,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
            }

            let result = self
                .client
                .fetch_danmaku_xml(cid)
                .await
                .and_then(|xml| parse_danmaku_xml(&xml, &entry.bvid, &entry.title));

            match result {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() && !policy.is_last(attempt) => {
                    tracing::warn!("⚠️ {}: {}", entry.bvid, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn danmaku_file(&self, entry: &VideoEntry) -> String {
        format!(
            "{}/{}_{}.csv",
            self.config.paths.danmaku_dir,
            entry.bvid,
            safe_title(&entry.title)
        )
    }
}

fn mode_distribution(records: &[DanmakuRecord]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.mode_name.as_str()).or_default() += 1;
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for DanmakuPipeline<S> {
    type Extracted = (VideoIndex, Vec<VideoEntry>);
    type Transformed = CrawlOutcome;

    fn name(&self) -> &str {
        "danmaku"
    }

    async fn extract(&self) -> Result<(VideoIndex, Vec<VideoEntry>)> {
        let index = VideoIndex::load(&self.storage, &self.config.paths.video_index).await?;
        let pending = index.danmaku_work_list(self.config.crawl.continue_from_last, self.only.as_deref());
        tracing::info!("📋 {} videos in index, {} pending", index.len(), pending.len());
        Ok((index, pending))
    }

    async fn transform(&self, data: (VideoIndex, Vec<VideoEntry>)) -> Result<CrawlOutcome> {
        let (mut index, pending) = data;
        let pacer = self.config.crawl.pacer();
        let total = pending.len();

        let mut outcome = CrawlOutcome {
            danmaku: Vec::new(),
            succeeded: 0,
            failed: Vec::new(),
        };

        for (i, mut entry) in pending.into_iter().enumerate() {
            tracing::info!("🎬 [{}/{}] {} | {}", i + 1, total, entry.bvid, entry.title);

            let status = match self.crawl_video(&mut entry).await {
                Ok(records) if !records.is_empty() => {
                    let hidden = records.iter().filter(|r| r.is_hidden()).count();
                    tracing::info!("✅ Collected {} danmaku ({} hidden)", records.len(), hidden);

                    if self.config.crawl.save_individual {
                        let path = self.danmaku_file(&entry);
                        self.storage.write_file(&path, &write_csv(&records)?).await?;
                        tracing::debug!("💾 Saved {}", path);
                    }

                    outcome.danmaku.extend(records);
                    outcome.succeeded += 1;
                    CrawlStatus::Done
                }
                Ok(_) => {
                    tracing::warn!("⚠️ {} returned no danmaku", entry.bvid);
                    outcome.failed.push((entry.bvid.clone(), "empty".to_string()));
                    CrawlStatus::Failed
                }
                Err(e) => {
                    tracing::error!("❌ {}: {}", entry.bvid, e);
                    outcome.failed.push((entry.bvid.clone(), e.to_string()));
                    CrawlStatus::Failed
                }
            };

            if let Some(row) = index.get_mut(&entry.bvid) {
                row.crawled = status;
                row.cid = row.cid.or(entry.cid);
            }
            index.save(&self.storage, &self.config.paths.video_index).await?;

            if i + 1 < total {
                pacer.pause().await;
            }
        }

        Ok(outcome)
    }

    async fn load(&self, result: CrawlOutcome) -> Result<String> {
        let dir = &self.config.paths.danmaku_dir;

        if self.config.crawl.save_merged && !result.danmaku.is_empty() {
            let merged = format!("{}/all_danmaku_merged.csv", dir);
            self.storage.write_file(&merged, &write_csv(&result.danmaku)?).await?;
            tracing::info!("💾 Saved {}", merged);

            let hidden: Vec<&DanmakuRecord> = result.danmaku.iter().filter(|r| r.is_hidden()).collect();
            if !hidden.is_empty() {
                let hidden_path = format!("{}/hidden_danmaku_only.csv", dir);
                self.storage.write_file(&hidden_path, &write_csv(&hidden)?).await?;
                tracing::info!("💾 Saved {} ({} hidden)", hidden_path, hidden.len());
            }
        }

        tracing::info!(
            "📊 Processed {} videos: {} succeeded, {} failed, {} danmaku",
            result.succeeded + result.failed.len(),
            result.succeeded,
            result.failed.len(),
            result.danmaku.len()
        );
        for (bvid, reason) in &result.failed {
            tracing::debug!("  ✗ {}: {}", bvid, reason);
        }

        let total = result.danmaku.len().max(1) as f64;
        for (mode, count) in mode_distribution(&result.danmaku) {
            tracing::info!("  {:20}: {:>8} ({:>5.1}%)", mode, count, count as f64 / total * 100.0);
        }

        if result.succeeded == 0 && !result.failed.is_empty() {
            tracing::warn!(
                "⚠️ None of the {} pending videos yielded danmaku; earlier results are kept",
                result.failed.len()
            );
        }

        Ok(dir.clone())
    }
}
