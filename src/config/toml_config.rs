use crate::utils::error::{EtlError, Result};
use crate::utils::pacing::{Pacer, RetryPolicy};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub platform: PlatformConfig,
    pub search: SearchConfig,
    pub crawl: CrawlConfig,
    pub subtitles: SubtitleConfig,
    pub transcribe: TranscribeConfig,
    pub analysis: AnalysisConfig,
    pub topics: TopicConfig,
    pub paths: PathsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub api_base: String,
    pub web_base: String,
    /// 瀏覽器 Cookie，建議以 ${BILIBILI_COOKIE} 注入
    pub cookie: Option<String>,
    pub user_agents: Vec<String>,
    pub timeout_seconds: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            web_base: "https://www.bilibili.com".to_string(),
            cookie: None,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub keyword: String,
    pub min_views: u64,
    pub max_videos: usize,
    /// click / pubdate / dm / stow / totalrank
    pub order: String,
    pub duration: u8,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub require_login: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword: "K签证".to_string(),
            min_views: 5000,
            max_videos: 1000,
            order: "click".to_string(),
            duration: 0,
            page_size: 30,
            page_delay_ms: 1500,
            require_login: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub min_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub retry_attempts: u32,
    pub retry_base_delay_seconds: u64,
    pub save_individual: bool,
    pub save_merged: bool,
    pub continue_from_last: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            min_delay_seconds: 8.0,
            max_delay_seconds: 15.0,
            retry_attempts: 5,
            retry_base_delay_seconds: 30,
            save_individual: true,
            save_merged: true,
            continue_from_last: true,
        }
    }
}

impl CrawlConfig {
    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.min_delay_seconds, self.max_delay_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_base_delay_seconds),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub min_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub checkpoint_every: usize,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            min_delay_seconds: 1.0,
            max_delay_seconds: 2.0,
            checkpoint_every: 10,
        }
    }
}

impl SubtitleConfig {
    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.min_delay_seconds, self.max_delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeConfig {
    pub downloader: String,
    pub whisper_command: String,
    /// tiny | base | small | medium | large
    pub model: String,
    pub language: String,
    pub initial_prompt: String,
    pub retry_attempts: u32,
    pub min_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub delete_audio: bool,
    pub timeout_seconds: u64,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            downloader: "yt-dlp".to_string(),
            whisper_command: "whisper".to_string(),
            model: "medium".to_string(),
            language: "zh".to_string(),
            initial_prompt: "以下是一段中文视频的逐字转录。".to_string(),
            retry_attempts: 3,
            min_delay_seconds: 3.0,
            max_delay_seconds: 7.0,
            delete_audio: true,
            timeout_seconds: 3600,
        }
    }
}

impl TranscribeConfig {
    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.min_delay_seconds, self.max_delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub engagement_window_seconds: f64,
    pub question_window_seconds: f64,
    pub question_markers: Vec<String>,
    pub top_subtitles: usize,
    pub export_contexts: bool,
    pub archive: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            engagement_window_seconds: 5.0,
            question_window_seconds: 10.0,
            question_markers: vec!["？".to_string()],
            top_subtitles: 10,
            export_contexts: true,
            archive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub stopwords_file: String,
    pub stopword_urls: Vec<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        let base = "https://raw.githubusercontent.com/goto456/stopwords/master";
        Self {
            stopwords_file: "stopwords_zh_combined.txt".to_string(),
            stopword_urls: ["cn", "hit", "baidu", "scu"]
                .iter()
                .map(|name| format!("{}/{}_stopwords.txt", base, name))
                .collect(),
        }
    }
}

/// 所有路徑皆相對於 workdir
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub workdir: String,
    pub video_index: String,
    pub danmaku_dir: String,
    pub subtitle_dir: String,
    pub audio_dir: String,
    pub matched_dir: String,
    pub question_dir: String,
    pub topic_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workdir: "./data".to_string(),
            video_index: "video_index.csv".to_string(),
            danmaku_dir: "danmaku_results".to_string(),
            subtitle_dir: "subtitles".to_string(),
            audio_dir: "audio".to_string(),
            matched_dir: "matched_results".to_string(),
            question_dir: "question_analysis".to_string(),
            topic_dir: "lda_analysis".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn subtitle_json(&self, bvid: &str) -> String {
        format!("{}/{}_subtitle.json", self.subtitle_dir, bvid)
    }

    pub fn subtitle_text(&self, bvid: &str) -> String {
        format!("{}/{}_subtitle.txt", self.subtitle_dir, bvid)
    }

    pub fn matched_csv(&self, bvid: &str) -> String {
        format!("{}/{}_matched.csv", self.matched_dir, bvid)
    }

    pub fn audio_path(&self) -> std::path::PathBuf {
        Path::new(&self.workdir).join(&self.audio_dir)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl EtlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 檔案不存在時使用預設值
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(
                "⚠️ Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        let mut config: Self =
            toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
                field: "toml_parsing".to_string(),
                message: format!("TOML parsing error: {}", e),
            })?;

        // 未設定的環境變數會原樣保留為 ${VAR}，視同沒有 cookie
        if config
            .platform
            .cookie
            .as_deref()
            .map(|c| c.trim().is_empty() || c.starts_with("${"))
            .unwrap_or(false)
        {
            config.platform.cookie = None;
        }

        Ok(config)
    }

    /// 替換環境變數 (例如 ${BILIBILI_COOKIE})
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("platform.api_base", &self.platform.api_base)?;
        validation::validate_url("platform.web_base", &self.platform.web_base)?;
        validation::validate_positive_number(
            "platform.user_agents",
            self.platform.user_agents.len(),
            1,
        )?;

        validation::validate_non_empty_string("search.keyword", &self.search.keyword)?;
        validation::validate_range("search.page_size", self.search.page_size, 1, 50)?;
        validation::validate_positive_number("search.max_videos", self.search.max_videos, 1)?;

        validation::validate_delay_window(
            "crawl.delay_seconds",
            self.crawl.min_delay_seconds,
            self.crawl.max_delay_seconds,
        )?;
        validation::validate_positive_number(
            "crawl.retry_attempts",
            self.crawl.retry_attempts as usize,
            1,
        )?;
        validation::validate_delay_window(
            "subtitles.delay_seconds",
            self.subtitles.min_delay_seconds,
            self.subtitles.max_delay_seconds,
        )?;
        validation::validate_positive_number(
            "subtitles.checkpoint_every",
            self.subtitles.checkpoint_every,
            1,
        )?;

        validation::validate_non_empty_string("transcribe.downloader", &self.transcribe.downloader)?;
        validation::validate_non_empty_string(
            "transcribe.whisper_command",
            &self.transcribe.whisper_command,
        )?;
        validation::validate_delay_window(
            "transcribe.delay_seconds",
            self.transcribe.min_delay_seconds,
            self.transcribe.max_delay_seconds,
        )?;

        validation::validate_range(
            "analysis.engagement_window_seconds",
            self.analysis.engagement_window_seconds,
            0.1,
            3600.0,
        )?;
        validation::validate_range(
            "analysis.question_window_seconds",
            self.analysis.question_window_seconds,
            0.0,
            3600.0,
        )?;
        if self.analysis.question_markers.iter().all(|m| m.is_empty()) {
            return Err(EtlError::InvalidConfigValueError {
                field: "analysis.question_markers".to_string(),
                value: format!("{:?}", self.analysis.question_markers),
                reason: "At least one non-empty marker is required".to_string(),
            });
        }

        for url in &self.topics.stopword_urls {
            validation::validate_url("topics.stopword_urls", url)?;
        }

        validation::validate_path("paths.workdir", &self.paths.workdir)?;
        for (field, value) in [
            ("paths.video_index", &self.paths.video_index),
            ("paths.danmaku_dir", &self.paths.danmaku_dir),
            ("paths.subtitle_dir", &self.paths.subtitle_dir),
            ("paths.audio_dir", &self.paths.audio_dir),
            ("paths.matched_dir", &self.paths.matched_dir),
            ("paths.question_dir", &self.paths.question_dir),
            ("paths.topic_dir", &self.paths.topic_dir),
        ] {
            validation::validate_path(field, value)?;
        }

        Ok(())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

impl Validate for EtlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EtlConfig::from_toml_str("").unwrap();

        assert_eq!(config.platform.api_base, "https://api.bilibili.com");
        assert_eq!(config.search.page_size, 30);
        assert_eq!(config.crawl.retry_attempts, 5);
        assert_eq!(config.analysis.question_markers, vec!["？".to_string()]);
        assert_eq!(config.topics.stopword_urls.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml_content = r#"
[search]
keyword = "留学"
min_views = 100

[analysis]
question_window_seconds = 15
question_markers = ["？", "?"]

[paths]
workdir = "/tmp/research"
"#;

        let config = EtlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.search.keyword, "留学");
        assert_eq!(config.search.min_views, 100);
        assert_eq!(config.search.order, "click");
        assert_eq!(config.analysis.question_window_seconds, 15.0);
        assert_eq!(config.analysis.question_markers.len(), 2);
        assert_eq!(config.paths.workdir, "/tmp/research");
        assert_eq!(config.paths.matched_dir, "matched_results");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("DANMAKU_ETL_TEST_COOKIE", "SESSDATA=abc; bili_jct=def");

        let toml_content = r#"
[platform]
cookie = "${DANMAKU_ETL_TEST_COOKIE}"
"#;

        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(
            config.platform.cookie.as_deref(),
            Some("SESSDATA=abc; bili_jct=def")
        );

        std::env::remove_var("DANMAKU_ETL_TEST_COOKIE");
    }

    #[test]
    fn test_unset_cookie_variable_means_no_cookie() {
        let toml_content = r#"
[platform]
cookie = "${DANMAKU_ETL_SURELY_UNSET_VARIABLE}"
"#;

        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.platform.cookie.is_none());
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
[platform]
api_base = "invalid-url"
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let toml_content = r#"
[crawl]
min_delay_seconds = 10.0
max_delay_seconds = 2.0
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let toml_content = r#"
[analysis]
question_markers = [""]
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();

        let toml_content = r#"
[search]
keyword = "file-test"
"#;

        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = EtlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.search.keyword, "file-test");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EtlConfig::from_file_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(config.search.keyword, "K签证");
    }
}
