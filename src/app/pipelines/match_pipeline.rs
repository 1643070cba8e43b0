use crate::config::toml_config::EtlConfig;
use crate::core::tabular::{bvid_from_file_name, read_csv, read_json, write_csv};
use crate::core::timeline::{engagement_windows, match_danmaku, top_subtitles, SubtitleTrack};
use crate::core::{Pipeline, Storage};
use crate::domain::model::{
    DanmakuRecord, EngagementWindow, MatchStats, MatchSummaryRow, MatchedDanmaku, SubtitleCue,
};
use crate::utils::error::{EtlError, Result};

pub struct MatchPipeline<S: Storage> {
    storage: S,
    config: EtlConfig,
}

pub struct MatchInput {
    pub bvid: String,
    pub danmaku: Vec<DanmakuRecord>,
    pub track: SubtitleTrack,
}

pub struct MatchedVideo {
    pub bvid: String,
    pub rows: Vec<MatchedDanmaku>,
    pub stats: MatchStats,
    pub windows: Vec<EngagementWindow>,
}

pub struct MatchReport {
    pub videos: Vec<MatchedVideo>,
    pub failed: Vec<(String, String)>,
}

/// 合併檔與隱藏彈幕檔不是單支影片的彈幕
fn is_per_video_file(name: &str) -> bool {
    name.ends_with(".csv") && !name.starts_with("all_") && !name.starts_with("hidden_")
}

impl<S: Storage> MatchPipeline<S> {
    pub fn new(storage: S, config: EtlConfig) -> Self {
        Self { storage, config }
    }

    async fn load_input(&self, file_name: &str) -> Result<MatchInput> {
        let bvid = bvid_from_file_name(file_name).to_string();
        let danmaku_path = format!("{}/{}", self.config.paths.danmaku_dir, file_name);
        let danmaku: Vec<DanmakuRecord> = read_csv(&self.storage.read_file(&danmaku_path).await?)?;

        let subtitle_path = self.config.paths.subtitle_json(&bvid);
        if !self.storage.exists(&subtitle_path).await {
            return Err(EtlError::ProcessingError {
                message: format!("subtitle file {} not found", subtitle_path),
            });
        }
        let cues: Vec<SubtitleCue> = read_json(&self.storage.read_file(&subtitle_path).await?)?;

        Ok(MatchInput {
            bvid,
            danmaku,
            track: SubtitleTrack::new(cues),
        })
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for MatchPipeline<S> {
    type Extracted = (Vec<MatchInput>, Vec<(String, String)>);
    type Transformed = MatchReport;

    fn name(&self) -> &str {
        "match"
    }

    async fn extract(&self) -> Result<(Vec<MatchInput>, Vec<(String, String)>)> {
        let files: Vec<String> = self
            .storage
            .list_files(&self.config.paths.danmaku_dir)
            .await?
            .into_iter()
            .filter(|name| is_per_video_file(name))
            .collect();
        tracing::info!("📂 Found {} danmaku files", files.len());

        let mut inputs = Vec::new();
        let mut failed = Vec::new();
        for name in &files {
            match self.load_input(name).await {
                Ok(input) => inputs.push(input),
                Err(e) => {
                    let bvid = bvid_from_file_name(name).to_string();
                    tracing::warn!("⚠️ {}: {}", bvid, e);
                    failed.push((bvid, e.to_string()));
                }
            }
        }

        Ok((inputs, failed))
    }

    async fn transform(&self, data: (Vec<MatchInput>, Vec<(String, String)>)) -> Result<MatchReport> {
        let (inputs, failed) = data;
        let window = self.config.analysis.engagement_window_seconds;

        let videos = inputs
            .into_iter()
            .map(|input| {
                let (rows, stats) = match_danmaku(&input.danmaku, &input.track);
                tracing::info!(
                    "🔗 {}: {} danmaku, {} matched ({:.1}%)",
                    input.bvid,
                    stats.total,
                    stats.matched,
                    stats.rate()
                );

                for (rank, (content, count)) in top_subtitles(&rows, self.config.analysis.top_subtitles)
                    .iter()
                    .enumerate()
                {
                    tracing::debug!("  #{} [{}] {}", rank + 1, count, content);
                }

                let windows = engagement_windows(&rows, window);
                MatchedVideo {
                    bvid: input.bvid,
                    rows,
                    stats,
                    windows,
                }
            })
            .collect();

        Ok(MatchReport { videos, failed })
    }

    async fn load(&self, result: MatchReport) -> Result<String> {
        let dir = &self.config.paths.matched_dir;
        let mut overall = MatchStats::default();
        let mut summary = Vec::with_capacity(result.videos.len());

        for video in &result.videos {
            self.storage
                .write_file(&self.config.paths.matched_csv(&video.bvid), &write_csv(&video.rows)?)
                .await?;
            self.storage
                .write_file(
                    &format!("{}/{}_engagement.csv", dir, video.bvid),
                    &write_csv(&video.windows)?,
                )
                .await?;

            overall.absorb(video.stats);
            summary.push(MatchSummaryRow {
                bvid: video.bvid.clone(),
                danmaku_count: video.stats.total,
                matched_count: video.stats.matched,
                match_rate: video.stats.rate(),
            });
        }

        self.storage
            .write_file(&format!("{}/match_summary.csv", dir), &write_csv(&summary)?)
            .await?;

        tracing::info!(
            "📊 {} videos matched, {} failed",
            result.videos.len(),
            result.failed.len()
        );
        tracing::info!(
            "📊 {} danmaku, {} matched, overall rate {:.2}%",
            overall.total,
            overall.matched,
            overall.rate()
        );

        Ok(dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_storage::MockStorage;
    use crate::core::tabular::write_json;
    use crate::domain::model::danmaku_mode_name;

    fn danmaku(bvid: &str, time: f64, text: &str) -> DanmakuRecord {
        DanmakuRecord {
            bvid: bvid.to_string(),
            video_title: "测试".to_string(),
            video_time_sec: time,
            mode: "1".to_string(),
            mode_name: danmaku_mode_name("1"),
            font_size: "25".to_string(),
            color: "16777215".to_string(),
            timestamp: 1_700_000_000,
            pool: "0".to_string(),
            user_hash: "abcd".to_string(),
            dmid: "1".to_string(),
            text: text.to_string(),
        }
    }

    async fn seed(storage: &MockStorage) {
        let rows = vec![
            danmaku("BVa", 0.5, "开头"),
            danmaku("BVa", 1.2, "同一句"),
            danmaku("BVa", 3.5, "第二句？"),
            danmaku("BVa", 99.0, "片尾"),
        ];
        storage
            .put("danmaku_results/BVa_标题.csv", write_csv(&rows).unwrap())
            .await;
        storage
            .put(
                "subtitles/BVa_subtitle.json",
                write_json(&vec![
                    SubtitleCue::new(0.0, 2.0, "第一句"),
                    SubtitleCue::new(2.0, 4.0, "第二句"),
                ])
                .unwrap(),
            )
            .await;

        // 沒有字幕檔
        storage
            .put(
                "danmaku_results/BVnosub_x.csv",
                write_csv(&[danmaku("BVnosub", 1.0, "x")]).unwrap(),
            )
            .await;
        storage.put("danmaku_results/all_danmaku_merged.csv", "ignored").await;
        storage.put("danmaku_results/hidden_danmaku_only.csv", "ignored").await;
    }

    #[test]
    fn test_per_video_file_filter() {
        assert!(is_per_video_file("BV1_title.csv"));
        assert!(!is_per_video_file("all_danmaku_merged.csv"));
        assert!(!is_per_video_file("hidden_danmaku_only.csv"));
        assert!(!is_per_video_file("notes.txt"));
    }

    #[tokio::test]
    async fn test_match_stage_outputs() {
        let storage = MockStorage::new();
        seed(&storage).await;

        let pipeline = MatchPipeline::new(storage.clone(), EtlConfig::default());
        let extracted = pipeline.extract().await.unwrap();
        assert_eq!(extracted.0.len(), 1);
        assert_eq!(extracted.1.len(), 1);
        assert_eq!(extracted.1[0].0, "BVnosub");

        let report = pipeline.transform(extracted).await.unwrap();
        assert_eq!(report.videos[0].stats, MatchStats { total: 4, matched: 3 });
        pipeline.load(report).await.unwrap();

        let matched: Vec<MatchedDanmaku> =
            read_csv(&storage.get_file("matched_results/BVa_matched.csv").await.unwrap()).unwrap();
        assert_eq!(matched.len(), 4);
        assert_eq!(matched[0].subtitle_content.as_deref(), Some("第一句"));
        assert_eq!(matched[2].subtitle_content.as_deref(), Some("第二句"));
        assert_eq!(matched[3].subtitle_content, None);
        assert_eq!(matched[3].danmaku_user_hash, "abcd");

        let header = storage.get_text("matched_results/BVa_matched.csv").await.unwrap();
        assert!(header
            .trim_start_matches('\u{feff}')
            .starts_with("danmaku_time,danmaku_content,subtitle_content,subtitle_from,subtitle_to,danmaku_bvid"));

        let windows: Vec<EngagementWindow> =
            read_csv(&storage.get_file("matched_results/BVa_engagement.csv").await.unwrap()).unwrap();
        assert_eq!(windows[0].time_start, 0.0);
        assert_eq!(windows[0].danmaku_count, 3);
        assert_eq!(windows[0].subtitles, "第一句 | 第二句");

        let summary: Vec<MatchSummaryRow> =
            read_csv(&storage.get_file("matched_results/match_summary.csv").await.unwrap()).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].match_rate, 75.0);
    }
}
