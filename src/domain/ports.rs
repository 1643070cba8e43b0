use crate::domain::model::SubtitleCue;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};

/// 以工作目錄為根的相對路徑檔案存取
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(&self, path: &str, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl Future<Output = bool> + Send;
    fn remove_file(&self, path: &str) -> impl Future<Output = Result<()>> + Send;
    /// 列出目錄下的檔名（不含子目錄），依名稱排序；目錄不存在時回傳空陣列
    fn list_files(&self, dir: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// 一個階段的 extract / transform / load
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;

    fn name(&self) -> &str;
    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    async fn load(&self, result: Self::Transformed) -> Result<String>;
}

/// 音訊下載與語音轉文字的外部工具
pub trait Transcriber: Send + Sync {
    fn check_dependencies(&self) -> impl Future<Output = Result<()>> + Send;
    fn download_audio(
        &self,
        bvid: &str,
        url: &str,
        audio_dir: &Path,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
    fn transcribe(&self, audio_path: &Path) -> impl Future<Output = Result<Vec<SubtitleCue>>> + Send;
}
