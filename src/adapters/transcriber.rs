use crate::config::toml_config::TranscribeConfig;
use crate::core::Transcriber;
use crate::domain::model::SubtitleCue;
use crate::utils::error::{EtlError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::Command;

/// openai-whisper `--output_format json` 的輸出
#[derive(Debug, Deserialize)]
pub struct WhisperOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<WhisperSegment>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WhisperSegment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub text: String,
}

impl WhisperOutput {
    /// 空白段落不輸出，時間軸與平台字幕格式相同
    pub fn into_cues(self) -> Vec<SubtitleCue> {
        self.segments
            .into_iter()
            .filter_map(|seg| {
                let text = seg.text.trim();
                (!text.is_empty()).then(|| SubtitleCue::new(seg.start, seg.end, text))
            })
            .collect()
    }
}

/// 以 yt-dlp 下載音訊、whisper CLI 轉文字
pub struct WhisperCli {
    config: TranscribeConfig,
}

impl WhisperCli {
    pub fn new(config: TranscribeConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    async fn run(&self, mut cmd: Command, name: &str) -> Result<()> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        tracing::debug!("Executing command: {:?}", cmd);

        let output = tokio::time::timeout(self.timeout(), cmd.output())
            .await
            .map_err(|_| EtlError::CommandError {
                command: name.to_string(),
                message: format!("timed out after {}s", self.config.timeout_seconds),
            })?
            .map_err(|e| EtlError::CommandError {
                command: name.to_string(),
                message: format!("failed to spawn: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.trim().chars().take(500).collect();
            return Err(EtlError::CommandError {
                command: name.to_string(),
                message: format!("exited with {}: {}", output.status, tail),
            });
        }

        Ok(())
    }
}

async fn command_available(name: &str, probe_arg: &str) -> bool {
    Command::new(name)
        .arg(probe_arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

impl Transcriber for WhisperCli {
    async fn check_dependencies(&self) -> Result<()> {
        let tools = [
            (self.config.downloader.as_str(), "--version", "pip install yt-dlp"),
            ("ffmpeg", "-version", "install ffmpeg and add it to PATH"),
            (self.config.whisper_command.as_str(), "--help", "pip install openai-whisper"),
        ];

        for (name, probe, hint) in tools {
            if !command_available(name, probe).await {
                tracing::error!("❌ {} not available", name);
                return Err(EtlError::DependencyError {
                    name: name.to_string(),
                    hint: hint.to_string(),
                });
            }
            tracing::debug!("✅ {} available", name);
        }
        Ok(())
    }

    async fn download_audio(&self, bvid: &str, url: &str, audio_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(audio_dir).await?;
        let template = audio_dir.join("%(id)s.%(ext)s");

        let mut cmd = Command::new(&self.config.downloader);
        cmd.arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("-o")
            .arg(&template)
            .arg(url);

        tracing::info!("🎧 Downloading audio for {}", bvid);
        self.run(cmd, &self.config.downloader).await?;

        locate_audio(audio_dir, bvid)?.ok_or_else(|| EtlError::ProcessingError {
            message: format!("audio file for {} not found in {}", bvid, audio_dir.display()),
        })
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<SubtitleCue>> {
        let output_dir = audio_path.parent().unwrap_or_else(|| Path::new("."));
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.config.whisper_command);
        cmd.arg(audio_path)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--language")
            .arg(&self.config.language)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("json")
            .arg("--verbose")
            .arg("False");
        if !self.config.initial_prompt.is_empty() {
            cmd.arg("--initial_prompt").arg(&self.config.initial_prompt);
        }

        tracing::info!(
            "🗣️ Transcribing {} with {} model",
            audio_path.display(),
            self.config.model
        );
        self.run(cmd, &self.config.whisper_command).await?;

        let json_path = output_dir.join(format!("{}.json", stem));
        let content = tokio::fs::read(&json_path).await?;
        let output: WhisperOutput = serde_json::from_slice(&content).map_err(|e| EtlError::ParseError {
            context: json_path.display().to_string(),
            message: e.to_string(),
        })?;

        if let Err(e) = tokio::fs::remove_file(&json_path).await {
            tracing::debug!("Could not remove {}: {}", json_path.display(), e);
        }

        Ok(output.into_cues())
    }
}

/// `{bvid}.*` 優先取 mp3，找不到時退回目錄中最新的 mp3
pub fn locate_audio(audio_dir: &Path, bvid: &str) -> Result<Option<PathBuf>> {
    let mut matches = Vec::new();
    let mut newest_mp3: Option<(SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(audio_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_mp3 = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("mp3"))
            .unwrap_or(false);

        if path.file_stem().map(|s| s == bvid).unwrap_or(false) {
            matches.push((is_mp3, path.clone()));
        }
        if is_mp3 {
            let modified = path
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest_mp3.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest_mp3 = Some((modified, path));
            }
        }
    }

    matches.sort_by_key(|(is_mp3, _)| !*is_mp3);
    Ok(matches
        .into_iter()
        .next()
        .map(|(_, path)| path)
        .or_else(|| newest_mp3.map(|(_, path)| path)))
}
