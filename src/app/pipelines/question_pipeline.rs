use crate::config::toml_config::EtlConfig;
use crate::core::tabular::{read_csv, read_json, write_csv, write_json};
use crate::core::timeline::{is_question, question_contexts, SubtitleTrack};
use crate::core::{Pipeline, Storage};
use crate::domain::model::{MatchedDanmaku, QuestionContext, QuestionSummary, SubtitleCue};
use crate::utils::error::Result;
use std::fmt::Write as _;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const ANALYSIS_FILE: &str = "question_danmaku_analysis.json";
pub const SUMMARY_FILE: &str = "question_danmaku_summary.csv";
const CONTEXT_DIR: &str = "detailed_contexts";
const ARCHIVE_FILE: &str = "question_analysis.zip";

pub struct QuestionPipeline<S: Storage> {
    storage: S,
    config: EtlConfig,
}

pub struct MatchedVideoRows {
    pub bvid: String,
    pub rows: Vec<MatchedDanmaku>,
    pub track: SubtitleTrack,
}

/// 單則問題彈幕的可讀上下文
pub fn render_context(context: &QuestionContext, window: f64, markers: &[String]) -> String {
    let rule = "=".repeat(60);
    let thin = "-".repeat(60);
    let mut out = String::new();

    let _ = writeln!(out, "视频: {}", context.bvid);
    let _ = writeln!(out, "问号弹幕: {}", context.question_danmaku);
    let _ = writeln!(out, "时间: {:.2}秒", context.question_time);
    let _ = writeln!(
        out,
        "对应字幕: {}",
        context.question_subtitle.as_deref().unwrap_or("无")
    );
    let _ = writeln!(out, "\n{}", rule);

    let _ = writeln!(out, "\n前后{}秒的字幕内容:", window);
    let _ = writeln!(out, "{}", thin);
    let mut subtitles: Vec<_> = context.nearby_subtitles.iter().collect();
    subtitles.sort_by(|a, b| a.from.total_cmp(&b.from));
    for sub in subtitles {
        let _ = writeln!(out, "[{:.1}s - {:.1}s] {}", sub.from, sub.to, sub.content);
    }

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(
        out,
        "\n前后{}秒的弹幕内容 (共{}条):",
        window, context.nearby_danmaku_count
    );
    let _ = writeln!(out, "{}", thin);
    let mut danmaku: Vec<_> = context.nearby_danmaku.iter().collect();
    danmaku.sort_by(|a, b| a.danmaku_time.total_cmp(&b.danmaku_time));
    for dm in danmaku {
        let flag = if is_question(&dm.danmaku_content, markers) {
            " [问号弹幕]"
        } else {
            ""
        };
        let _ = writeln!(out, "[{:.1}s] {}{}", dm.danmaku_time, dm.danmaku_content, flag);
    }

    out
}

impl<S: Storage> QuestionPipeline<S> {
    pub fn new(storage: S, config: EtlConfig) -> Self {
        Self { storage, config }
    }

    fn output(&self, name: &str) -> String {
        format!("{}/{}", self.config.paths.question_dir, name)
    }

    async fn load_video(&self, file_name: &str) -> Result<MatchedVideoRows> {
        let bvid = file_name.trim_end_matches("_matched.csv").to_string();
        let path = format!("{}/{}", self.config.paths.matched_dir, file_name);
        let rows: Vec<MatchedDanmaku> = read_csv(&self.storage.read_file(&path).await?)?;

        let subtitle_path = self.config.paths.subtitle_json(&bvid);
        let track = if self.storage.exists(&subtitle_path).await {
            let cues: Vec<SubtitleCue> = read_json(&self.storage.read_file(&subtitle_path).await?)?;
            SubtitleTrack::new(cues)
        } else {
            tracing::debug!("No subtitle file for {}, nearby subtitles will be empty", bvid);
            SubtitleTrack::default()
        };

        Ok(MatchedVideoRows { bvid, rows, track })
    }

    fn build_archive(&self, files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in files {
            zip.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
            zip.write_all(data)?;
        }
        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for QuestionPipeline<S> {
    type Extracted = Vec<MatchedVideoRows>;
    type Transformed = Vec<QuestionContext>;

    fn name(&self) -> &str {
        "questions"
    }

    async fn extract(&self) -> Result<Vec<MatchedVideoRows>> {
        let files: Vec<String> = self
            .storage
            .list_files(&self.config.paths.matched_dir)
            .await?
            .into_iter()
            .filter(|name| name.ends_with("_matched.csv"))
            .collect();
        tracing::info!("📂 Found {} matched files", files.len());

        let mut videos = Vec::new();
        for name in &files {
            match self.load_video(name).await {
                Ok(video) if video.rows.is_empty() => {
                    tracing::debug!("Skipping {}: no rows", video.bvid);
                }
                Ok(video) => videos.push(video),
                Err(e) => tracing::error!("❌ {}: {}", name, e),
            }
        }
        Ok(videos)
    }

    async fn transform(&self, data: Vec<MatchedVideoRows>) -> Result<Vec<QuestionContext>> {
        let analysis = &self.config.analysis;
        let mut results = Vec::new();

        for video in &data {
            let contexts = question_contexts(
                &video.bvid,
                &video.rows,
                &video.track,
                &analysis.question_markers,
                analysis.question_window_seconds,
            );
            if !contexts.is_empty() {
                tracing::info!("❓ {}: {} question danmaku", video.bvid, contexts.len());
            }
            results.extend(contexts);
        }

        tracing::info!("🔎 Found {} question danmaku in total", results.len());
        Ok(results)
    }

    async fn load(&self, result: Vec<QuestionContext>) -> Result<String> {
        let analysis = &self.config.analysis;
        let mut bundle: Vec<(String, Vec<u8>)> = Vec::new();

        let json = write_json(&result)?;
        self.storage.write_file(&self.output(ANALYSIS_FILE), &json).await?;
        bundle.push((ANALYSIS_FILE.to_string(), json));

        let summary: Vec<QuestionSummary> = result.iter().map(QuestionSummary::from).collect();
        let csv = write_csv(&summary)?;
        self.storage.write_file(&self.output(SUMMARY_FILE), &csv).await?;
        bundle.push((SUMMARY_FILE.to_string(), csv));

        if analysis.export_contexts {
            for (i, context) in result.iter().enumerate() {
                let name = format!("{}/{}_{}.txt", CONTEXT_DIR, context.bvid, i + 1);
                let text = render_context(
                    context,
                    analysis.question_window_seconds,
                    &analysis.question_markers,
                );
                self.storage.write_file(&self.output(&name), text.as_bytes()).await?;
                bundle.push((name, text.into_bytes()));
            }
            tracing::debug!("💾 Exported {} context files", result.len());
        }

        if analysis.archive {
            let zip_data = self.build_archive(&bundle)?;
            tracing::debug!("Writing ZIP file ({} bytes)", zip_data.len());
            self.storage.write_file(&self.output(ARCHIVE_FILE), &zip_data).await?;
        }

        if !result.is_empty() {
            let n = result.len() as f64;
            let avg_danmaku = result.iter().map(|r| r.nearby_danmaku_count).sum::<usize>() as f64 / n;
            let avg_subtitles = result.iter().map(|r| r.nearby_subtitle_count).sum::<usize>() as f64 / n;
            tracing::info!("📊 Average {:.1} danmaku around each question", avg_danmaku);
            tracing::info!("📊 Average {:.1} subtitles around each question", avg_subtitles);
        }

        Ok(self.config.paths.question_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_storage::MockStorage;
    use crate::domain::model::{danmaku_mode_name, DanmakuRecord};

    fn matched(time: f64, text: &str, subtitle: Option<&SubtitleCue>) -> MatchedDanmaku {
        let record = DanmakuRecord {
            bvid: "BVq".to_string(),
            video_title: "t".to_string(),
            video_time_sec: time,
            mode: "1".to_string(),
            mode_name: danmaku_mode_name("1"),
            font_size: String::new(),
            color: String::new(),
            timestamp: 0,
            pool: String::new(),
            user_hash: "u1".to_string(),
            dmid: String::new(),
            text: text.to_string(),
        };
        MatchedDanmaku::new(&record, subtitle)
    }

    async fn seed(storage: &MockStorage) {
        let cues = vec![
            SubtitleCue::new(0.0, 5.0, "开场"),
            SubtitleCue::new(5.0, 12.0, "签证材料"),
            SubtitleCue::new(40.0, 45.0, "很远的字幕"),
        ];
        let rows = vec![
            matched(2.0, "来了", Some(&cues[0])),
            matched(8.0, "要多久？", Some(&cues[1])),
            matched(14.0, "同问", None),
            matched(30.0, "远处", None),
        ];
        storage
            .put("matched_results/BVq_matched.csv", write_csv(&rows).unwrap())
            .await;
        storage
            .put("subtitles/BVq_subtitle.json", write_json(&cues).unwrap())
            .await;
        storage.put("matched_results/match_summary.csv", "ignored").await;
    }

    #[tokio::test]
    async fn test_question_stage_outputs() {
        let storage = MockStorage::new();
        seed(&storage).await;

        let mut config = EtlConfig::default();
        config.analysis.archive = true;
        let pipeline = QuestionPipeline::new(storage.clone(), config);

        let videos = pipeline.extract().await.unwrap();
        assert_eq!(videos.len(), 1);
        let results = pipeline.transform(videos).await.unwrap();
        assert_eq!(results.len(), 1);

        let question = &results[0];
        assert_eq!(question.question_time, 8.0);
        assert_eq!(question.question_subtitle.as_deref(), Some("签证材料"));
        // [−2, 18]：2.0、8.0、14.0
        assert_eq!(question.nearby_danmaku_count, 3);
        assert_eq!(question.nearby_subtitle_count, 2);

        pipeline.load(results).await.unwrap();

        let saved: Vec<QuestionContext> = read_json(
            &storage
                .get_file("question_analysis/question_danmaku_analysis.json")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(saved.len(), 1);

        let summary: Vec<QuestionSummary> = read_csv(
            &storage
                .get_file("question_analysis/question_danmaku_summary.csv")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(summary[0].nearby_danmaku_count, 3);

        let text = storage
            .get_text("question_analysis/detailed_contexts/BVq_1.txt")
            .await
            .unwrap();
        assert!(text.contains("问号弹幕: 要多久？"));
        assert!(text.contains("[8.0s] 要多久？ [问号弹幕]"));
        assert!(text.contains("[5.0s - 12.0s] 签证材料"));
        assert!(!text.contains("很远的字幕"));

        let zip_data = storage
            .get_file("question_analysis/question_analysis.zip")
            .await
            .unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(zip_data)).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[test]
    fn test_render_context_orders_by_time() {
        let context = QuestionContext {
            bvid: "BVx".to_string(),
            question_danmaku: "为什么？".to_string(),
            question_time: 10.0,
            question_subtitle: None,
            nearby_danmaku_count: 2,
            nearby_subtitle_count: 0,
            nearby_danmaku: vec![
                crate::domain::model::NearbyDanmaku {
                    danmaku_time: 12.0,
                    danmaku_content: "后面".to_string(),
                    subtitle_content: None,
                    danmaku_mode_name: "Scroll".to_string(),
                    danmaku_user_hash: String::new(),
                    time_diff: 2.0,
                },
                crate::domain::model::NearbyDanmaku {
                    danmaku_time: 10.0,
                    danmaku_content: "为什么？".to_string(),
                    subtitle_content: None,
                    danmaku_mode_name: "Scroll".to_string(),
                    danmaku_user_hash: String::new(),
                    time_diff: 0.0,
                },
            ],
            nearby_subtitles: vec![],
        };

        let text = render_context(&context, 10.0, &["？".to_string()]);
        assert!(text.contains("对应字幕: 无"));
        assert!(text.contains("前后10秒的弹幕内容 (共2条):"));
        let first = text.find("为什么？ [问号弹幕]").unwrap();
        let second = text.find("[12.0s] 后面").unwrap();
        assert!(first < second);
    }
}
