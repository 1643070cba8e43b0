use crate::app::pipelines::subtitle_pipeline::save_subtitles;
use crate::config::toml_config::EtlConfig;
use crate::core::index::VideoIndex;
use crate::core::{Pipeline, Storage, Transcriber};
use crate::domain::model::{CrawlStatus, SubtitleCue, SubtitleMethod, VideoEntry};
use crate::utils::error::Result;
use std::path::Path;

/// 沒有官方字幕的影片：下載音訊後以語音辨識產生帶時間軸的字幕
pub struct TranscribePipeline<S: Storage, T: Transcriber> {
    storage: S,
    config: EtlConfig,
    transcriber: T,
    only: Option<String>,
}

#[derive(Debug, Default)]
pub struct TranscribeOutcome {
    pub transcribed: usize,
    pub failed: Vec<(String, String)>,
}

impl<S: Storage, T: Transcriber> TranscribePipeline<S, T> {
    pub fn new(storage: S, config: EtlConfig, transcriber: T) -> Self {
        Self {
            storage,
            config,
            transcriber,
            only: None,
        }
    }

    pub fn with_only(mut self, bvid: Option<String>) -> Self {
        self.only = bvid;
        self
    }

    async fn transcribe_once(&self, entry: &VideoEntry, audio_dir: &Path) -> Result<Vec<SubtitleCue>> {
        let audio = self
            .transcriber
            .download_audio(&entry.bvid, &entry.url, audio_dir)
            .await?;
        let result = self.transcriber.transcribe(&audio).await;

        if self.config.transcribe.delete_audio {
            match tokio::fs::remove_file(&audio).await {
                Ok(()) => tracing::debug!("🗑️ Removed {}", audio.display()),
                Err(e) => tracing::debug!("Could not remove {}: {}", audio.display(), e),
            }
        }

        result
    }

    async fn transcribe_with_retries(&self, entry: &VideoEntry, audio_dir: &Path) -> Result<Vec<SubtitleCue>> {
        let attempts = self.config.transcribe.retry_attempts.max(1);
        let pacer = self.config.transcribe.pacer();
        let mut attempt = 1;

        loop {
            match self.transcribe_once(entry, audio_dir).await {
                Ok(cues) => return Ok(cues),
                Err(e) if attempt < attempts => {
                    tracing::warn!("⚠️ Attempt {}/{} for {} failed: {}", attempt, attempts, entry.bvid, e);
                    attempt += 1;
                    pacer.pause().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage, T: Transcriber> Pipeline for TranscribePipeline<S, T> {
    type Extracted = (VideoIndex, Vec<VideoEntry>);
    type Transformed = TranscribeOutcome;

    fn name(&self) -> &str {
        "transcribe"
    }

    async fn extract(&self) -> Result<(VideoIndex, Vec<VideoEntry>)> {
        let index = VideoIndex::load(&self.storage, &self.config.paths.video_index).await?;

        let mut pending = Vec::new();
        for entry in index.entries() {
            if self.only.as_deref().is_some_and(|bvid| entry.bvid != bvid) {
                continue;
            }
            if !VideoIndex::needs_transcription(entry) {
                continue;
            }
            if self
                .storage
                .exists(&self.config.paths.subtitle_json(&entry.bvid))
                .await
            {
                tracing::debug!("⏭️ {} already has a timed subtitle file", entry.bvid);
                continue;
            }
            pending.push(entry.clone());
        }

        tracing::info!("📋 {} videos need transcription", pending.len());
        if !pending.is_empty() {
            self.transcriber.check_dependencies().await?;
        }
        Ok((index, pending))
    }

    async fn transform(&self, data: (VideoIndex, Vec<VideoEntry>)) -> Result<TranscribeOutcome> {
        let (mut index, pending) = data;
        let audio_dir = self.config.paths.audio_path();
        let pacer = self.config.transcribe.pacer();
        let total = pending.len();
        let mut outcome = TranscribeOutcome::default();

        for (i, entry) in pending.iter().enumerate() {
            tracing::info!("🎙️ [{}/{}] {} | {}", i + 1, total, entry.bvid, entry.title);

            match self.transcribe_with_retries(entry, &audio_dir).await {
                Ok(cues) => {
                    if cues.is_empty() {
                        tracing::warn!("⚠️ {} produced no speech segments", entry.bvid);
                    }
                    save_subtitles(&self.storage, &self.config, &entry.bvid, &cues).await?;

                    if let Some(row) = index.get_mut(&entry.bvid) {
                        row.has_subtitle = CrawlStatus::Done;
                        row.subtitle_method = SubtitleMethod::Whisper;
                        row.subtitle_count = cues.len();
                    }
                    index.save(&self.storage, &self.config.paths.video_index).await?;

                    tracing::info!("✅ {} segments", cues.len());
                    outcome.transcribed += 1;
                }
                Err(e) => {
                    tracing::error!("❌ {}: {}", entry.bvid, e);
                    outcome.failed.push((entry.bvid.clone(), e.to_string()));
                }
            }

            if i + 1 < total {
                pacer.pause().await;
            }
        }

        Ok(outcome)
    }

    async fn load(&self, result: TranscribeOutcome) -> Result<String> {
        tracing::info!(
            "📊 Transcribed {} videos, {} failed",
            result.transcribed,
            result.failed.len()
        );
        for (bvid, reason) in &result.failed {
            tracing::info!("  ✗ {}: {}", bvid, reason);
        }
        Ok(self.config.paths.subtitle_dir.clone())
    }
}
