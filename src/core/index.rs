use crate::core::tabular::{read_csv, write_csv};
use crate::core::Storage;
use crate::domain::model::{CrawlStatus, SubtitleMethod, VideoEntry};
use crate::utils::error::{EtlError, Result};
use std::collections::{HashMap, HashSet};

/// video_index.csv 的記憶體內容，每個階段讀進來、更新進度後寫回
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoIndex {
    entries: Vec<VideoEntry>,
}

impl VideoIndex {
    pub fn new(entries: Vec<VideoEntry>) -> Self {
        Self { entries }
    }

    pub async fn load<S: Storage>(storage: &S, path: &str) -> Result<Self> {
        if !storage.exists(path).await {
            return Err(EtlError::MissingInputError {
                path: path.to_string(),
                stage: "search".to_string(),
            });
        }
        let data = storage.read_file(path).await?;
        Ok(Self::new(read_csv(&data)?))
    }

    pub async fn load_or_empty<S: Storage>(storage: &S, path: &str) -> Result<Self> {
        if storage.exists(path).await {
            Self::load(storage, path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn save<S: Storage>(&self, storage: &S, path: &str) -> Result<()> {
        let data = write_csv(&self.entries)?;
        storage.write_file(path, &data).await?;
        tracing::debug!("💾 Index saved: {} videos -> {}", self.entries.len(), path);
        Ok(())
    }

    pub fn entries(&self) -> &[VideoEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, bvid: &str) -> Option<&VideoEntry> {
        self.entries.iter().find(|e| e.bvid == bvid)
    }

    pub fn get_mut(&mut self, bvid: &str) -> Option<&mut VideoEntry> {
        self.entries.iter_mut().find(|e| e.bvid == bvid)
    }

    /// 新的搜尋結果排在前面並沿用既有進度；舊索引中不在本次結果的影片保留在後面
    pub fn merge_search_results(&mut self, fresh: Vec<VideoEntry>) -> usize {
        let previous: Vec<VideoEntry> = self.entries.drain(..).collect();
        let by_bvid: HashMap<&str, &VideoEntry> =
            previous.iter().map(|e| (e.bvid.as_str(), e)).collect();

        let mut seen = HashSet::new();
        let mut added = 0;
        for mut entry in fresh {
            if !seen.insert(entry.bvid.clone()) {
                continue;
            }
            match by_bvid.get(entry.bvid.as_str()) {
                Some(old) => entry.carry_progress_from(old),
                None => added += 1,
            }
            self.entries.push(entry);
        }

        for old in &previous {
            if seen.insert(old.bvid.clone()) {
                self.entries.push(old.clone());
            }
        }

        added
    }

    /// 彈幕階段的工作清單
    pub fn danmaku_work_list(&self, continue_from_last: bool, only: Option<&str>) -> Vec<VideoEntry> {
        self.entries
            .iter()
            .filter(|e| only.is_none_or(|bvid| e.bvid == bvid))
            .filter(|e| !continue_from_last || e.crawled != CrawlStatus::Done)
            .cloned()
            .collect()
    }

    pub fn subtitle_work_list(&self, only: Option<&str>) -> Vec<VideoEntry> {
        self.entries
            .iter()
            .filter(|e| only.is_none_or(|bvid| e.bvid == bvid))
            .filter(|e| e.has_subtitle != CrawlStatus::Done)
            .cloned()
            .collect()
    }

    /// 沒有官方字幕，或只有舊版無時間軸的純文字逐字稿
    pub fn needs_transcription(entry: &VideoEntry) -> bool {
        entry.has_subtitle != CrawlStatus::Done || entry.subtitle_method == SubtitleMethod::WhisperTxt
    }

    pub fn progress(&self) -> IndexProgress {
        let mut progress = IndexProgress {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.crawled {
                CrawlStatus::Done => progress.crawled += 1,
                CrawlStatus::Failed => progress.crawl_failed += 1,
                CrawlStatus::Pending => {}
            }
            if entry.has_subtitle == CrawlStatus::Done {
                progress.with_subtitles += 1;
            }
        }
        progress
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndexProgress {
    pub total: usize,
    pub crawled: usize,
    pub crawl_failed: usize,
    pub with_subtitles: usize,
}
