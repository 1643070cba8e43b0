pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use crate::app::Stage;
#[cfg(feature = "cli")]
use toml_config::EtlConfig;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "danmaku-etl")]
#[command(about = "Collect danmaku and subtitles, then locate audience-question moments")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "etl-config.toml")]
    pub config: String,

    /// Override paths.workdir
    #[arg(long)]
    pub workdir: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: StageCommand,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum StageCommand {
    /// 搜尋影片並建立 video_index.csv
    Search {
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long)]
        min_views: Option<u64>,
        #[arg(long)]
        max_videos: Option<usize>,
    },
    /// 爬取索引中每支影片的彈幕
    Danmaku {
        /// Only process this BV id
        #[arg(long)]
        only: Option<String>,
    },
    /// 下載官方字幕
    Subtitles {
        #[arg(long)]
        only: Option<String>,
    },
    /// 沒有字幕的影片改用語音轉文字
    Transcribe {
        #[arg(long)]
        only: Option<String>,
    },
    /// 彈幕與字幕時間對應
    Match,
    /// 篩選問號彈幕並擷取前後文
    Questions {
        /// Context window in seconds on each side
        #[arg(long)]
        window: Option<f64>,
    },
    /// 產生 LDA 用的斷詞文件
    Topics,
    /// 依序執行全部階段
    All,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 命令列參數覆蓋 TOML 設定
    pub fn apply_overrides(&self, config: &mut EtlConfig) {
        if let Some(workdir) = &self.workdir {
            config.paths.workdir = workdir.clone();
        }
        if self.monitor {
            config.monitoring.enabled = true;
        }

        match &self.command {
            StageCommand::Search {
                keyword,
                min_views,
                max_videos,
            } => {
                if let Some(keyword) = keyword {
                    config.search.keyword = keyword.clone();
                }
                if let Some(min_views) = min_views {
                    config.search.min_views = *min_views;
                }
                if let Some(max_videos) = max_videos {
                    config.search.max_videos = *max_videos;
                }
            }
            StageCommand::Questions {
                window: Some(window),
            } => {
                config.analysis.question_window_seconds = *window;
            }
            _ => {}
        }
    }

    /// 子命令對應要執行的階段
    pub fn stages(&self) -> Vec<Stage> {
        match &self.command {
            StageCommand::Search { .. } => vec![Stage::Search],
            StageCommand::Danmaku { .. } => vec![Stage::Danmaku],
            StageCommand::Subtitles { .. } => vec![Stage::Subtitles],
            StageCommand::Transcribe { .. } => vec![Stage::Transcribe],
            StageCommand::Match => vec![Stage::Match],
            StageCommand::Questions { .. } => vec![Stage::Questions],
            StageCommand::Topics => vec![Stage::Topics],
            StageCommand::All => Stage::ALL.to_vec(),
        }
    }

    pub fn only_bvid(&self) -> Option<&str> {
        match &self.command {
            StageCommand::Danmaku { only }
            | StageCommand::Subtitles { only }
            | StageCommand::Transcribe { only } => only.as_deref(),
            _ => None,
        }
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_search_overrides() {
        let cli = CliConfig::parse_from([
            "danmaku-etl",
            "--workdir",
            "/tmp/run",
            "search",
            "--keyword",
            "留学",
            "--min-views",
            "10",
        ]);
        let mut config = EtlConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.paths.workdir, "/tmp/run");
        assert_eq!(config.search.keyword, "留学");
        assert_eq!(config.search.min_views, 10);
        assert_eq!(config.search.max_videos, 1000);
    }

    #[test]
    fn test_questions_window_override_and_only() {
        let cli = CliConfig::parse_from(["danmaku-etl", "questions", "--window", "15"]);
        let mut config = EtlConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.analysis.question_window_seconds, 15.0);
        assert_eq!(cli.only_bvid(), None);

        let cli = CliConfig::parse_from(["danmaku-etl", "danmaku", "--only", "BV1abc"]);
        assert_eq!(cli.only_bvid(), Some("BV1abc"));
        assert_eq!(cli.stages(), vec![Stage::Danmaku]);
    }

    #[test]
    fn test_all_runs_every_stage() {
        let cli = CliConfig::parse_from(["danmaku-etl", "--monitor", "all"]);
        let mut config = EtlConfig::default();
        cli.apply_overrides(&mut config);
        assert!(config.monitoring_enabled());
        assert_eq!(cli.stages().len(), 7);
        assert_eq!(cli.stages()[3], Stage::Transcribe);
    }
}
