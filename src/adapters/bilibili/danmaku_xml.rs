use crate::domain::model::{danmaku_mode_name, DanmakuRecord};
use crate::utils::error::{EtlError, Result};
use regex::Regex;

/// 解析 `x/v1/dm/list.so` 回傳的 `<i><d p="...">text</d>...</i>`
///
/// `p` 依序為：出現秒數、模式、字號、顏色、發送時間戳、彈幕池、用戶雜湊、dmid。
/// 時間欄位無法解析或內容為空的元素會略過。
pub fn parse_danmaku_xml(xml: &str, bvid: &str, video_title: &str) -> Result<Vec<DanmakuRecord>> {
    if !xml.contains("<i>") && !xml.contains("<i ") {
        return Err(EtlError::ParseError {
            context: format!("danmaku XML for {}", bvid),
            message: "missing <i> root element".to_string(),
        });
    }

    let d_element = Regex::new(r#"<d\s+p="([^"]*)"\s*>([^<]*)</d>"#).map_err(|e| EtlError::ProcessingError {
        message: format!("Invalid danmaku pattern: {}", e),
    })?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for caps in d_element.captures_iter(xml) {
        let text = decode_entities(&caps[2]);
        let fields: Vec<&str> = caps[1].split(',').collect();

        let Some(time) = fields.first().and_then(|t| t.trim().parse::<f64>().ok()) else {
            skipped += 1;
            continue;
        };
        if text.is_empty() {
            skipped += 1;
            continue;
        }

        let field = |i: usize| fields.get(i).map(|s| s.to_string()).unwrap_or_default();
        let mode = fields.get(1).map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());

        records.push(DanmakuRecord {
            bvid: bvid.to_string(),
            video_title: video_title.to_string(),
            video_time_sec: time,
            mode_name: danmaku_mode_name(&mode),
            mode,
            font_size: field(2),
            color: field(3),
            timestamp: fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
            pool: field(5),
            user_hash: field(6),
            dmid: field(7),
            text,
        });
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} malformed danmaku elements for {}", skipped, bvid);
    }

    Ok(records)
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
