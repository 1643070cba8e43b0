use crate::domain::model::{
    DanmakuRecord, EngagementWindow, MatchStats, MatchedDanmaku, NearbyDanmaku, NearbySubtitle,
    QuestionContext, SubtitleCue,
};
use std::collections::{BTreeMap, HashMap};

/// 一支影片的字幕時間軸
///
/// 一個時間點最多對應一行字幕：多行重疊時取排在最前面的那一行。
/// 平台字幕通常已依時間排序且互不重疊，此時以二分搜尋查找，否則退回線性掃描。
#[derive(Debug, Clone, Default)]
pub struct SubtitleTrack {
    cues: Vec<SubtitleCue>,
    sorted_disjoint: bool,
}

impl SubtitleTrack {
    pub fn new(cues: Vec<SubtitleCue>) -> Self {
        let well_formed = cues.iter().all(|c| c.from <= c.to);
        let ordered = cues.windows(2).all(|w| w[0].to <= w[1].from);
        Self {
            sorted_disjoint: well_formed && ordered,
            cues,
        }
    }

    pub fn cues(&self) -> &[SubtitleCue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// 包含時間點 `time`（兩端皆含）的第一行字幕
    pub fn cue_at(&self, time: f64) -> Option<&SubtitleCue> {
        if self.sorted_disjoint {
            let idx = self.cues.partition_point(|c| c.to < time);
            self.cues.get(idx).filter(|c| c.contains(time))
        } else {
            self.cues.iter().find(|c| c.contains(time))
        }
    }

    /// 與 `[center - window, center + window]` 有交集的字幕，`time_diff` 以字幕開始時間計
    pub fn in_window(&self, center: f64, window: f64) -> Vec<NearbySubtitle> {
        let start = center - window;
        let end = center + window;

        self.cues
            .iter()
            .filter(|c| {
                (c.from >= start && c.from <= end)
                    || (c.to >= start && c.to <= end)
                    || (c.from <= start && c.to >= end)
            })
            .map(|c| NearbySubtitle {
                from: c.from,
                to: c.to,
                content: c.content.clone(),
                time_diff: c.from - center,
            })
            .collect()
    }
}

/// 每則彈幕對上發送當下的字幕
pub fn match_danmaku(danmaku: &[DanmakuRecord], track: &SubtitleTrack) -> (Vec<MatchedDanmaku>, MatchStats) {
    let matched: Vec<MatchedDanmaku> = danmaku
        .iter()
        .map(|d| MatchedDanmaku::new(d, track.cue_at(d.video_time_sec)))
        .collect();

    let stats = MatchStats {
        total: matched.len(),
        matched: matched.iter().filter(|m| m.is_matched()).count(),
    };

    (matched, stats)
}

/// 被最多彈幕對到的字幕，同數量時以先出現者為先
pub fn top_subtitles(matched: &[MatchedDanmaku], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, row) in matched.iter().enumerate() {
        if let Some(content) = row.subtitle_content.as_deref() {
            counts.entry(content).or_insert((0, position)).0 += 1;
        }
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(content, (count, first))| (content, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(content, count, _)| (content.to_string(), count))
        .collect()
}

/// 以固定寬度切分時間軸，回傳有彈幕的時間窗，依彈幕數由多到少排序
pub fn engagement_windows(matched: &[MatchedDanmaku], window: f64) -> Vec<EngagementWindow> {
    if window <= 0.0 || !window.is_finite() {
        return Vec::new();
    }

    let mut buckets: BTreeMap<u64, Vec<&MatchedDanmaku>> = BTreeMap::new();
    for row in matched {
        if row.danmaku_time.is_finite() && row.danmaku_time >= 0.0 {
            let bucket = (row.danmaku_time / window).floor() as u64;
            buckets.entry(bucket).or_default().push(row);
        }
    }

    let mut windows: Vec<EngagementWindow> = buckets
        .into_iter()
        .map(|(bucket, mut rows)| {
            rows.sort_by(|a, b| a.danmaku_time.total_cmp(&b.danmaku_time));
            let mut subtitles: Vec<&str> = Vec::new();
            for content in rows.iter().filter_map(|r| r.subtitle_content.as_deref()) {
                if subtitles.len() == 2 {
                    break;
                }
                if !subtitles.contains(&content) {
                    subtitles.push(content);
                }
            }

            EngagementWindow {
                time_start: bucket as f64 * window,
                time_end: (bucket + 1) as f64 * window,
                danmaku_count: rows.len(),
                subtitles: subtitles.join(" | "),
            }
        })
        .collect();

    // sort_by 為穩定排序，同數量時維持時間先後
    windows.sort_by(|a, b| b.danmaku_count.cmp(&a.danmaku_count));
    windows
}

pub fn is_question(content: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|marker| !marker.is_empty() && content.contains(marker.as_str()))
}

/// `[center - window, center + window]` 內的彈幕（含問題彈幕本身）
pub fn danmaku_in_window(matched: &[MatchedDanmaku], center: f64, window: f64) -> Vec<NearbyDanmaku> {
    let start = center - window;
    let end = center + window;

    matched
        .iter()
        .filter(|m| m.danmaku_time >= start && m.danmaku_time <= end)
        .map(|m| NearbyDanmaku {
            danmaku_time: m.danmaku_time,
            danmaku_content: m.danmaku_content.clone(),
            subtitle_content: m.subtitle_content.clone(),
            danmaku_mode_name: m.danmaku_mode_name.clone(),
            danmaku_user_hash: m.danmaku_user_hash.clone(),
            time_diff: m.danmaku_time - center,
        })
        .collect()
}

/// 找出一支影片所有問題彈幕及其前後文
pub fn question_contexts(
    bvid: &str,
    matched: &[MatchedDanmaku],
    track: &SubtitleTrack,
    markers: &[String],
    window: f64,
) -> Vec<QuestionContext> {
    matched
        .iter()
        .filter(|m| is_question(&m.danmaku_content, markers))
        .map(|question| {
            let center = question.danmaku_time;
            let nearby_danmaku = danmaku_in_window(matched, center, window);
            let nearby_subtitles = track.in_window(center, window);

            QuestionContext {
                bvid: bvid.to_string(),
                question_danmaku: question.danmaku_content.clone(),
                question_time: center,
                question_subtitle: question.subtitle_content.clone(),
                nearby_danmaku_count: nearby_danmaku.len(),
                nearby_subtitle_count: nearby_subtitles.len(),
                nearby_danmaku,
                nearby_subtitles,
            }
        })
        .collect()
}
