use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 影片索引的爬取狀態：0 待處理、1 完成、-1 失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "i8")]
pub enum CrawlStatus {
    #[default]
    Pending,
    Done,
    Failed,
}

impl From<CrawlStatus> for i8 {
    fn from(status: CrawlStatus) -> Self {
        match status {
            CrawlStatus::Pending => 0,
            CrawlStatus::Done => 1,
            CrawlStatus::Failed => -1,
        }
    }
}

impl TryFrom<i8> for CrawlStatus {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CrawlStatus::Pending),
            1 => Ok(CrawlStatus::Done),
            -1 => Ok(CrawlStatus::Failed),
            other => Err(format!("unknown status value {}", other)),
        }
    }
}

/// 舊版索引可能留下空白格或 pandas 寫出的 `1.0`，一律視為待處理
impl<'de> Deserialize<'de> for CrawlStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StatusVisitor;

        impl<'a> Visitor<'a> for StatusVisitor {
            type Value = CrawlStatus;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a status of 0, 1 or -1")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<CrawlStatus, E> {
                i8::try_from(v)
                    .map_err(|_| E::custom(format!("unknown status value {}", v)))
                    .and_then(|v| CrawlStatus::try_from(v).map_err(E::custom))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<CrawlStatus, E> {
                self.visit_i64(i64::try_from(v).unwrap_or(i64::MAX))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<CrawlStatus, E> {
                if v.is_nan() {
                    return Ok(CrawlStatus::Pending);
                }
                if v.fract() != 0.0 {
                    return Err(E::custom(format!("unknown status value {}", v)));
                }
                self.visit_i64(v as i64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<CrawlStatus, E> {
                let v = v.trim();
                if v.is_empty() || v.eq_ignore_ascii_case("nan") {
                    return Ok(CrawlStatus::Pending);
                }
                match v.parse::<i64>() {
                    Ok(n) => self.visit_i64(n),
                    Err(_) => v
                        .parse::<f64>()
                        .map_err(|_| E::custom(format!("unknown status value {}", v)))
                        .and_then(|n| self.visit_f64(n)),
                }
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<CrawlStatus, E> {
                Ok(CrawlStatus::Pending)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<CrawlStatus, E> {
                Ok(CrawlStatus::Pending)
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleMethod {
    #[default]
    None,
    Api,
    Whisper,
    /// 舊版流程只輸出純文字逐字稿，沒有時間軸
    WhisperTxt,
}

impl std::str::FromStr for SubtitleMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" | "nan" => Ok(SubtitleMethod::None),
            "api" => Ok(SubtitleMethod::Api),
            "whisper" => Ok(SubtitleMethod::Whisper),
            "whisper_txt" => Ok(SubtitleMethod::WhisperTxt),
            other => Err(format!("unknown subtitle method `{}`", other)),
        }
    }
}

impl<'de> Deserialize<'de> for SubtitleMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.as_deref().unwrap_or("").parse().map_err(de::Error::custom)
    }
}

/// video_index.csv 的一列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub danmaku_count: u64,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub pubdate: i64,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub crawled: CrawlStatus,
    #[serde(default)]
    pub cid: Option<u64>,
    #[serde(default)]
    pub has_subtitle: CrawlStatus,
    #[serde(default)]
    pub subtitle_method: SubtitleMethod,
    #[serde(default)]
    pub subtitle_count: usize,
}

impl VideoEntry {
    pub fn new(bvid: impl Into<String>, title: impl Into<String>) -> Self {
        let bvid = bvid.into();
        Self {
            url: format!("https://www.bilibili.com/video/{}", bvid),
            bvid,
            title: title.into(),
            author: String::new(),
            play_count: 0,
            danmaku_count: 0,
            duration: String::new(),
            pubdate: 0,
            published_at: String::new(),
            crawled: CrawlStatus::Pending,
            cid: None,
            has_subtitle: CrawlStatus::Pending,
            subtitle_method: SubtitleMethod::None,
            subtitle_count: 0,
        }
    }

    /// 搜尋結果覆蓋時保留既有的處理進度
    pub fn carry_progress_from(&mut self, previous: &VideoEntry) {
        self.crawled = previous.crawled;
        self.cid = self.cid.or(previous.cid);
        self.has_subtitle = previous.has_subtitle;
        self.subtitle_method = previous.subtitle_method;
        self.subtitle_count = previous.subtitle_count;
    }
}

/// 一則彈幕，欄位順序即輸出 CSV 的欄位順序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanmakuRecord {
    pub bvid: String,
    pub video_title: String,
    pub video_time_sec: f64,
    pub mode: String,
    pub mode_name: String,
    #[serde(default)]
    pub font_size: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub user_hash: String,
    #[serde(default)]
    pub dmid: String,
    pub text: String,
}

impl DanmakuRecord {
    /// mode 8（進階）與 9（BAS）在播放器中通常不可見
    pub fn is_hidden(&self) -> bool {
        matches!(self.mode.as_str(), "8" | "9")
    }
}

pub fn danmaku_mode_name(mode: &str) -> String {
    match mode {
        "1" => "Scroll".to_string(),
        "4" => "Bottom".to_string(),
        "5" => "Top".to_string(),
        "6" => "Reverse".to_string(),
        "7" => "Position".to_string(),
        "8" => "Advanced".to_string(),
        "9" => "BAS/Hidden".to_string(),
        other => format!("Unknown({})", other),
    }
}

/// 字幕一行，與平台字幕 JSON 的 body 元素相容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub from: f64,
    pub to: f64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<u8>,
}

impl SubtitleCue {
    pub fn new(from: f64, to: f64, content: impl Into<String>) -> Self {
        Self {
            from,
            to,
            content: content.into(),
            location: Some(2),
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.from <= time && time <= self.to
    }
}

/// 彈幕與其發送時刻對應的字幕
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedDanmaku {
    pub danmaku_time: f64,
    pub danmaku_content: String,
    pub subtitle_content: Option<String>,
    pub subtitle_from: Option<f64>,
    pub subtitle_to: Option<f64>,
    #[serde(default)]
    pub danmaku_bvid: String,
    #[serde(default)]
    pub danmaku_video_title: String,
    #[serde(default)]
    pub danmaku_mode: String,
    #[serde(default)]
    pub danmaku_mode_name: String,
    #[serde(default)]
    pub danmaku_font_size: String,
    #[serde(default)]
    pub danmaku_color: String,
    #[serde(default)]
    pub danmaku_timestamp: i64,
    #[serde(default)]
    pub danmaku_pool: String,
    #[serde(default)]
    pub danmaku_user_hash: String,
    #[serde(default)]
    pub danmaku_dmid: String,
}

impl MatchedDanmaku {
    pub fn new(danmaku: &DanmakuRecord, cue: Option<&SubtitleCue>) -> Self {
        Self {
            danmaku_time: danmaku.video_time_sec,
            danmaku_content: danmaku.text.clone(),
            subtitle_content: cue.map(|c| c.content.clone()),
            subtitle_from: cue.map(|c| c.from),
            subtitle_to: cue.map(|c| c.to),
            danmaku_bvid: danmaku.bvid.clone(),
            danmaku_video_title: danmaku.video_title.clone(),
            danmaku_mode: danmaku.mode.clone(),
            danmaku_mode_name: danmaku.mode_name.clone(),
            danmaku_font_size: danmaku.font_size.clone(),
            danmaku_color: danmaku.color.clone(),
            danmaku_timestamp: danmaku.timestamp,
            danmaku_pool: danmaku.pool.clone(),
            danmaku_user_hash: danmaku.user_hash.clone(),
            danmaku_dmid: danmaku.dmid.clone(),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.subtitle_content.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchStats {
    pub total: usize,
    pub matched: usize,
}

impl MatchStats {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64 * 100.0
        }
    }

    pub fn absorb(&mut self, other: MatchStats) {
        self.total += other.total;
        self.matched += other.matched;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummaryRow {
    pub bvid: String,
    pub danmaku_count: usize,
    pub matched_count: usize,
    pub match_rate: f64,
}

/// 固定寬度時間窗內的彈幕數量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementWindow {
    pub time_start: f64,
    pub time_end: f64,
    pub danmaku_count: usize,
    pub subtitles: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyDanmaku {
    pub danmaku_time: f64,
    pub danmaku_content: String,
    pub subtitle_content: Option<String>,
    pub danmaku_mode_name: String,
    pub danmaku_user_hash: String,
    pub time_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbySubtitle {
    pub from: f64,
    pub to: f64,
    pub content: String,
    pub time_diff: f64,
}

/// 一則問號彈幕與其前後時間窗的上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionContext {
    pub bvid: String,
    pub question_danmaku: String,
    pub question_time: f64,
    pub question_subtitle: Option<String>,
    pub nearby_danmaku_count: usize,
    pub nearby_subtitle_count: usize,
    pub nearby_danmaku: Vec<NearbyDanmaku>,
    pub nearby_subtitles: Vec<NearbySubtitle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSummary {
    pub bvid: String,
    pub question_danmaku: String,
    pub question_time: f64,
    pub question_subtitle: Option<String>,
    pub nearby_danmaku_count: usize,
    pub nearby_subtitle_count: usize,
}

impl From<&QuestionContext> for QuestionSummary {
    fn from(context: &QuestionContext) -> Self {
        Self {
            bvid: context.bvid.clone(),
            question_danmaku: context.question_danmaku.clone(),
            question_time: context.question_time,
            question_subtitle: context.question_subtitle.clone(),
            nearby_danmaku_count: context.nearby_danmaku_count,
            nearby_subtitle_count: context.nearby_subtitle_count,
        }
    }
}

/// LDA 用的一篇斷詞後文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDocument {
    pub doc_id: String,
    pub text: String,
    pub bvid: String,
    pub question_danmaku: String,
}
