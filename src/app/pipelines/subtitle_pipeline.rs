use crate::adapters::bilibili::BiliClient;
use crate::config::toml_config::EtlConfig;
use crate::core::index::VideoIndex;
use crate::core::tabular::write_json;
use crate::core::{Pipeline, Storage};
use crate::domain::model::{CrawlStatus, SubtitleCue, SubtitleMethod, VideoEntry};
use crate::utils::error::Result;

pub struct SubtitlePipeline<S: Storage> {
    storage: S,
    config: EtlConfig,
    client: BiliClient,
    only: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubtitleStats {
    pub processed: usize,
    pub with_subtitles: usize,
    pub without_subtitles: usize,
    pub errors: usize,
}

/// 一支影片的字幕抓取結果
enum Fetched {
    Cues(Vec<SubtitleCue>),
    NoSubtitles,
}

/// 純文字版：每行一句，略過空白行
pub fn subtitle_plain_text(cues: &[SubtitleCue]) -> String {
    cues.iter()
        .map(|c| c.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 同時寫出 `{bvid}_subtitle.json` 與 `{bvid}_subtitle.txt`
pub async fn save_subtitles<S: Storage>(
    storage: &S,
    config: &EtlConfig,
    bvid: &str,
    cues: &[SubtitleCue],
) -> Result<()> {
    storage
        .write_file(&config.paths.subtitle_json(bvid), &write_json(cues)?)
        .await?;
    storage
        .write_file(
            &config.paths.subtitle_text(bvid),
            subtitle_plain_text(cues).as_bytes(),
        )
        .await?;
    Ok(())
}

impl<S: Storage> SubtitlePipeline<S> {
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

    async fn fetch(&self, entry: &mut VideoEntry) -> Result<Fetched> {
        let cid = match entry.cid {
            Some(cid) => cid,
            None => {
                let cid = self.client.resolve_cid(&entry.bvid).await?;
                entry.cid = Some(cid);
                cid
            }
        };

        let tracks = self.client.player_subtitles(&entry.bvid, cid).await?;
        let Some(track) = tracks.first() else {
            return Ok(Fetched::NoSubtitles);
        };
        tracing::debug!("Subtitle track {} ({})", track.lan, track.lan_doc);

        let cues = self.client.fetch_subtitle_body(track).await?;
        if cues.is_empty() {
            return Ok(Fetched::NoSubtitles);
        }
        Ok(Fetched::Cues(cues))
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for SubtitlePipeline<S> {
    type Extracted = (VideoIndex, Vec<VideoEntry>);
    type Transformed = (VideoIndex, SubtitleStats);

    fn name(&self) -> &str {
        "subtitles"
    }

    async fn extract(&self) -> Result<(VideoIndex, Vec<VideoEntry>)> {
        let index = VideoIndex::load(&self.storage, &self.config.paths.video_index).await?;
        let pending = index.subtitle_work_list(self.only.as_deref());
        tracing::info!(
            "📋 {} videos in index, {} without subtitles yet",
            index.len(),
            pending.len()
        );
        Ok((index, pending))
    }

    async fn transform(&self, data: (VideoIndex, Vec<VideoEntry>)) -> Result<(VideoIndex, SubtitleStats)> {
        let (mut index, pending) = data;
        let pacer = self.config.subtitles.pacer();
        let checkpoint_every = self.config.subtitles.checkpoint_every.max(1);
        let total = pending.len();
        let mut stats = SubtitleStats::default();

        for (i, mut entry) in pending.into_iter().enumerate() {
            tracing::info!("📝 [{}/{}] {}", i + 1, total, entry.bvid);
            stats.processed += 1;

            let (status, method, count) = match self.fetch(&mut entry).await {
                Ok(Fetched::Cues(cues)) => {
                    if let Err(e) = save_subtitles(&self.storage, &self.config, &entry.bvid, &cues).await {
                        // 寫檔失敗：先保存上次檢查點之後的進度
                        tracing::error!("❌ Failed to save subtitles for {}: {}", entry.bvid, e);
                        index.save(&self.storage, &self.config.paths.video_index).await?;
                        return Err(e);
                    }
                    tracing::info!("✅ {} subtitle lines", cues.len());
                    stats.with_subtitles += 1;
                    (CrawlStatus::Done, SubtitleMethod::Api, cues.len())
                }
                Ok(Fetched::NoSubtitles) => {
                    tracing::info!("➖ No subtitles for {}", entry.bvid);
                    stats.without_subtitles += 1;
                    (CrawlStatus::Pending, SubtitleMethod::None, 0)
                }
                Err(e) => {
                    tracing::error!("❌ {}: {}", entry.bvid, e);
                    stats.errors += 1;
                    (CrawlStatus::Failed, SubtitleMethod::None, 0)
                }
            };

            if let Some(row) = index.get_mut(&entry.bvid) {
                row.has_subtitle = status;
                row.subtitle_method = method;
                row.subtitle_count = count;
                row.cid = row.cid.or(entry.cid);
            }

            if (i + 1) % checkpoint_every == 0 {
                index.save(&self.storage, &self.config.paths.video_index).await?;
                tracing::debug!("💾 Checkpoint after {} videos", i + 1);
            }

            if i + 1 < total {
                pacer.pause().await;
            }
        }

        Ok((index, stats))
    }

    async fn load(&self, result: (VideoIndex, SubtitleStats)) -> Result<String> {
        let (index, stats) = result;
        index.save(&self.storage, &self.config.paths.video_index).await?;

        let progress = index.progress();
        tracing::info!(
            "📊 Processed {}: {} with subtitles, {} without, {} errors",
            stats.processed,
            stats.with_subtitles,
            stats.without_subtitles,
            stats.errors
        );
        tracing::info!(
            "🗂️ Index now has {}/{} videos with subtitles",
            progress.with_subtitles,
            progress.total
        );

        Ok(self.config.paths.subtitle_dir.clone())
    }
}
