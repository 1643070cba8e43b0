use crate::adapters::WhisperCli;
use crate::app::pipelines::{
    DanmakuPipeline, MatchPipeline, QuestionPipeline, SearchPipeline, SubtitlePipeline, TopicPipeline,
    TranscribePipeline,
};
use crate::config::toml_config::EtlConfig;
use crate::core::etl::EtlEngine;
use crate::core::Storage;
use crate::utils::error::Result;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Danmaku,
    Subtitles,
    Transcribe,
    Match,
    Questions,
    Topics,
}

impl Stage {
    /// `all` 的執行順序
    pub const ALL: [Stage; 7] = [
        Stage::Search,
        Stage::Danmaku,
        Stage::Subtitles,
        Stage::Transcribe,
        Stage::Match,
        Stage::Questions,
        Stage::Topics,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Search => "search",
            Stage::Danmaku => "danmaku",
            Stage::Subtitles => "subtitles",
            Stage::Transcribe => "transcribe",
            Stage::Match => "match",
            Stage::Questions => "questions",
            Stage::Topics => "topics",
        };
        f.write_str(name)
    }
}

/// 以對應的管道執行單一階段，回傳輸出路徑
pub async fn run_stage<S: Storage + Clone>(
    stage: Stage,
    storage: &S,
    config: &EtlConfig,
    only: Option<&str>,
) -> Result<String> {
    let monitor = config.monitoring_enabled();
    let only = only.map(str::to_string);
    let storage = storage.clone();
    let config = config.clone();

    match stage {
        Stage::Search => {
            let pipeline = SearchPipeline::new(storage, config)?;
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
        Stage::Danmaku => {
            let pipeline = DanmakuPipeline::new(storage, config)?.with_only(only);
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
        Stage::Subtitles => {
            let pipeline = SubtitlePipeline::new(storage, config)?.with_only(only);
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
        Stage::Transcribe => {
            let transcriber = WhisperCli::new(config.transcribe.clone());
            let pipeline = TranscribePipeline::new(storage, config, transcriber).with_only(only);
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
        Stage::Match => {
            let pipeline = MatchPipeline::new(storage, config);
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
        Stage::Questions => {
            let pipeline = QuestionPipeline::new(storage, config);
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
        Stage::Topics => {
            let pipeline = TopicPipeline::new(storage, config)?;
            EtlEngine::new_with_monitoring(pipeline, monitor).run().await
        }
    }
}

/// 依序執行，遇到第一個失敗的階段即停止
pub async fn run_stages<S: Storage + Clone>(
    stages: &[Stage],
    storage: &S,
    config: &EtlConfig,
    only: Option<&str>,
) -> Result<Vec<(Stage, String)>> {
    let mut outputs = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        tracing::info!("▶️ Stage {}/{}: {}", i + 1, stages.len(), stage);
        match run_stage(*stage, storage, config, only).await {
            Ok(output) => outputs.push((*stage, output)),
            Err(e) => {
                tracing::error!("❌ Stage {} failed, stopping: {}", stage, e);
                return Err(e);
            }
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_storage::MockStorage;
    use crate::core::tabular::{write_csv, write_json};
    use crate::domain::model::{danmaku_mode_name, DanmakuRecord, SubtitleCue};

    #[test]
    fn test_stage_order_and_names() {
        assert_eq!(Stage::ALL[0], Stage::Search);
        assert_eq!(Stage::ALL[6], Stage::Topics);
        assert_eq!(Stage::Questions.to_string(), "questions");
    }

    #[tokio::test]
    async fn test_run_stages_stops_at_first_failure() {
        let storage = MockStorage::new();
        let record = DanmakuRecord {
            bvid: "BVs".to_string(),
            video_title: "t".to_string(),
            video_time_sec: 1.0,
            mode: "1".to_string(),
            mode_name: danmaku_mode_name("1"),
            font_size: String::new(),
            color: String::new(),
            timestamp: 0,
            pool: String::new(),
            user_hash: String::new(),
            dmid: String::new(),
            text: "为啥？".to_string(),
        };
        storage
            .put("danmaku_results/BVs_t.csv", write_csv(&[record]).unwrap())
            .await;
        storage
            .put(
                "subtitles/BVs_subtitle.json",
                write_json(&vec![SubtitleCue::new(0.0, 2.0, "你好")]).unwrap(),
            )
            .await;

        // 不下載停用詞
        let mut config = EtlConfig::default();
        config.topics.stopword_urls.clear();
        let outputs = run_stages(
            &[Stage::Match, Stage::Questions, Stage::Topics],
            &storage,
            &config,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outputs.len(), 3);
        assert!(storage.exists("lda_analysis/combined_texts.csv").await);

        // 沒有索引時 danmaku 失敗，後面的 match 不會執行
        let empty = MockStorage::new();
        let err = run_stages(&[Stage::Danmaku, Stage::Match], &empty, &config, None).await;
        assert!(err.is_err());
        assert!(!empty.exists("matched_results/match_summary.csv").await);
    }
}
