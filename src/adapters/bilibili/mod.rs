pub mod danmaku_xml;
pub mod wbi;

use crate::config::toml_config::PlatformConfig;
use crate::domain::model::{SubtitleCue, VideoEntry};
use crate::utils::error::{EtlError, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use danmaku_xml::parse_danmaku_xml;
pub use wbi::WbiKeys;

const BROWSER_ORIGIN: &str = "https://www.bilibili.com";

/// 平台 JSON 介面的共同外層
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavInfo {
    pub is_login: bool,
    pub uname: Option<String>,
    pub mid: Option<u64>,
    pub wbi_keys: Option<WbiKeys>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    #[serde(default, rename = "isLogin")]
    is_login: bool,
    uname: Option<String>,
    mid: Option<u64>,
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keyword: String,
    pub order: String,
    pub duration: u8,
    pub page_size: usize,
}

/// 搜尋結果的一筆影片
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub play: serde_json::Value,
    #[serde(default)]
    pub video_review: serde_json::Value,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub pubdate: i64,
}

impl SearchHit {
    pub fn play_count(&self) -> u64 {
        parse_play_count(&self.play)
    }

    pub fn into_entry(self) -> VideoEntry {
        let mut entry = VideoEntry::new(self.bvid.clone(), strip_markup(&self.title));
        entry.author = self.author;
        entry.play_count = parse_play_count(&self.play);
        entry.danmaku_count = parse_play_count(&self.video_review);
        entry.duration = self.duration;
        entry.pubdate = self.pubdate;
        entry.published_at = chrono::DateTime::from_timestamp(self.pubdate, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        entry
    }
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    cid: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleTrackInfo {
    #[serde(default)]
    pub lan: String,
    #[serde(default)]
    pub lan_doc: String,
    #[serde(default)]
    pub subtitle_url: String,
}

impl SubtitleTrackInfo {
    /// 平台常回傳 `//aisubtitle.hdslb.com/...` 形式的網址
    pub fn absolute_url(&self) -> String {
        if self.subtitle_url.starts_with("http") {
            self.subtitle_url.clone()
        } else {
            format!("https:{}", self.subtitle_url)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    subtitle: Option<PlayerSubtitle>,
}

#[derive(Debug, Deserialize)]
struct PlayerSubtitle {
    #[serde(default)]
    subtitles: Vec<SubtitleTrackInfo>,
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    #[serde(default)]
    body: Vec<SubtitleCue>,
}

pub struct BiliClient {
    client: Client,
    api_base: String,
    web_base: String,
    cookie: Option<String>,
    user_agents: Vec<String>,
    ua_cursor: AtomicUsize,
}

impl BiliClient {
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            web_base: config.web_base.trim_end_matches('/').to_string(),
            cookie: config.cookie.clone(),
            user_agents: config.user_agents.clone(),
            ua_cursor: AtomicUsize::new(0),
        })
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }

    /// 每個請求輪替 User-Agent，並帶上瀏覽器的 Referer / Origin
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if !self.user_agents.is_empty() {
            let idx = self.ua_cursor.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
            if let Ok(value) = HeaderValue::from_str(&self.user_agents[idx]) {
                headers.insert(USER_AGENT, value);
            }
        }
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static(BROWSER_ORIGIN));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));

        if let Some(cookie) = &self.cookie {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(e) => tracing::warn!("⚠️ Cookie contains invalid header characters, skipped: {}", e),
            }
        }

        headers
    }

    async fn get_text(&self, url: &str, query: &[(String, String)]) -> Result<String> {
        tracing::debug!("🌐 GET {}", url);
        let response = self
            .client
            .get(url)
            .headers(self.headers())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            return Err(EtlError::RateLimitedError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(EtlError::HttpStatusError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }

    async fn get_envelope<T: DeserializeOwned>(&self, url: &str, query: &[(String, String)]) -> Result<Envelope<T>> {
        let body = self.get_text(url, query).await?;
        serde_json::from_str(&body).map_err(|e| EtlError::ParseError {
            context: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_data<T: DeserializeOwned>(&self, url: &str, query: &[(String, String)]) -> Result<T> {
        let envelope: Envelope<T> = self.get_envelope(url, query).await?;
        if envelope.code != 0 {
            return Err(EtlError::PlatformError {
                code: envelope.code,
                message: envelope.message,
            });
        }
        envelope.data.ok_or_else(|| EtlError::ParseError {
            context: url.to_string(),
            message: "response has no data field".to_string(),
        })
    }

    /// 登入狀態與 WBI 金鑰；未登入時平台回傳 -101 但仍附金鑰
    pub async fn nav(&self) -> Result<NavInfo> {
        let url = format!("{}/x/web-interface/nav", self.api_base);
        let envelope: Envelope<NavData> = self.get_envelope(&url, &[]).await?;

        let Some(data) = envelope.data else {
            return Ok(NavInfo {
                is_login: false,
                uname: None,
                mid: None,
                wbi_keys: None,
            });
        };

        Ok(NavInfo {
            is_login: envelope.code == 0 && data.is_login,
            uname: data.uname,
            mid: data.mid,
            wbi_keys: data
                .wbi_img
                .and_then(|img| WbiKeys::from_urls(&img.img_url, &img.sub_url)),
        })
    }

    pub async fn search_page(&self, query: &SearchQuery, page: u32, keys: Option<&WbiKeys>) -> Result<Vec<SearchHit>> {
        let url = format!("{}/x/web-interface/wbi/search/type", self.api_base);
        let params = [
            ("search_type", "video".to_string()),
            ("keyword", query.keyword.clone()),
            ("order", query.order.clone()),
            ("duration", query.duration.to_string()),
            ("page", page.to_string()),
            ("page_size", query.page_size.to_string()),
        ];

        let signed = match keys {
            Some(keys) => keys.sign(&params, chrono::Utc::now().timestamp()),
            None => params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        };

        let data: SearchData = self.get_data(&url, &signed).await?;
        Ok(data.result)
    }

    /// 先從影片頁面擷取 cid，失敗再查 view 介面
    pub async fn resolve_cid(&self, bvid: &str) -> Result<u64> {
        let page_url = format!("{}/video/{}", self.web_base, bvid);
        match self.get_text(&page_url, &[]).await {
            Ok(html) => {
                if let Some(cid) = extract_cid(&html)? {
                    return Ok(cid);
                }
                tracing::debug!("No cid in page HTML for {}, trying view API", bvid);
            }
            Err(e) => tracing::debug!("Video page request failed for {}: {}", bvid, e),
        }

        let view_url = format!("{}/x/web-interface/view", self.api_base);
        let data: ViewData = self
            .get_data(&view_url, &[("bvid".to_string(), bvid.to_string())])
            .await?;
        data.cid.ok_or_else(|| EtlError::ProcessingError {
            message: format!("no_cid: unable to resolve cid for {}", bvid),
        })
    }

    /// 原始 XML；412 表示觸發限流
    pub async fn fetch_danmaku_xml(&self, cid: u64) -> Result<String> {
        let url = format!("{}/x/v1/dm/list.so", self.api_base);
        self.get_text(&url, &[("oid".to_string(), cid.to_string())]).await
    }

    pub async fn player_subtitles(&self, bvid: &str, cid: u64) -> Result<Vec<SubtitleTrackInfo>> {
        let url = format!("{}/x/player/v2", self.api_base);
        let data: PlayerData = self
            .get_data(
                &url,
                &[
                    ("bvid".to_string(), bvid.to_string()),
                    ("cid".to_string(), cid.to_string()),
                ],
            )
            .await?;
        Ok(data.subtitle.map(|s| s.subtitles).unwrap_or_default())
    }

    pub async fn fetch_subtitle_body(&self, track: &SubtitleTrackInfo) -> Result<Vec<SubtitleCue>> {
        let url = track.absolute_url();
        let body = self.get_text(&url, &[]).await?;
        let parsed: SubtitleBody = serde_json::from_str(&body).map_err(|e| EtlError::ParseError {
            context: url.clone(),
            message: e.to_string(),
        })?;
        Ok(parsed.body)
    }
}

fn extract_cid(html: &str) -> Result<Option<u64>> {
    let re = Regex::new(r#""cid":(\d+)"#).map_err(|e| EtlError::ProcessingError {
        message: format!("Invalid cid pattern: {}", e),
    })?;
    Ok(re.captures(html).and_then(|caps| caps[1].parse().ok()))
}

/// 去掉搜尋結果標題中的 `<em class="keyword">` 等標記
pub fn strip_markup(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_tag = false;
    for c in title.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// 播放數可能是整數，或 `"1,234"`、`"1.2万"`、`"--"` 這類字串
pub fn parse_play_count(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => {
            let s = s.trim().replace(',', "");
            let (number, multiplier) = if let Some(n) = s.strip_suffix('万') {
                (n, 10_000.0)
            } else if let Some(n) = s.strip_suffix('亿') {
                (n, 100_000_000.0)
            } else {
                (s.as_str(), 1.0)
            };
            number
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| (f * multiplier).round() as u64)
                .unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> BiliClient {
        let config = PlatformConfig {
            api_base: server.base_url(),
            web_base: server.base_url(),
            cookie: Some("SESSDATA=abc".to_string()),
            ..Default::default()
        };
        BiliClient::new(&config).unwrap()
    }

    #[test]
    fn test_parse_play_count_variants() {
        assert_eq!(parse_play_count(&json!(12345)), 12345);
        assert_eq!(parse_play_count(&json!("1,234")), 1234);
        assert_eq!(parse_play_count(&json!("1.2万")), 12000);
        assert_eq!(parse_play_count(&json!("3亿")), 300_000_000);
        assert_eq!(parse_play_count(&json!("--")), 0);
        assert_eq!(parse_play_count(&json!(null)), 0);
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(
            strip_markup(r#"<em class="keyword">K签证</em>最新解读"#),
            "K签证最新解读"
        );
        assert_eq!(strip_markup("a > b"), "a > b");
    }

    #[test]
    fn test_search_hit_into_entry() {
        let hit: SearchHit = serde_json::from_value(json!({
            "bvid": "BV1xx",
            "title": "<em class=\"keyword\">K签证</em>",
            "author": "UP",
            "play": "2.5万",
            "video_review": 321,
            "duration": "10:01",
            "pubdate": 1700000000
        }))
        .unwrap();

        let entry = hit.into_entry();
        assert_eq!(entry.title, "K签证");
        assert_eq!(entry.play_count, 25000);
        assert_eq!(entry.danmaku_count, 321);
        assert_eq!(entry.published_at, "2023-11-14 22:13:20");
        assert_eq!(entry.url, "https://www.bilibili.com/video/BV1xx");
    }

    #[test]
    fn test_subtitle_url_made_absolute() {
        let track = SubtitleTrackInfo {
            lan: "ai-zh".to_string(),
            lan_doc: "中文".to_string(),
            subtitle_url: "//aisubtitle.hdslb.com/bfs/x.json".to_string(),
        };
        assert_eq!(track.absolute_url(), "https://aisubtitle.hdslb.com/bfs/x.json");
    }

    #[tokio::test]
    async fn test_nav_not_logged_in_still_returns_keys() {
        let server = MockServer::start();
        let nav = server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/nav")
                .header("cookie", "SESSDATA=abc")
                .header("referer", "https://www.bilibili.com/");
            then.status(200).json_body(json!({
                "code": -101,
                "message": "账号未登录",
                "data": {
                    "isLogin": false,
                    "wbi_img": {
                        "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                        "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
                    }
                }
            }));
        });

        let info = client_for(&server).nav().await.unwrap();
        nav.assert();
        assert!(!info.is_login);
        assert_eq!(info.wbi_keys.unwrap().img_key, "7cd084941338484aae1ad9425b84077c");
    }

    #[tokio::test]
    async fn test_search_page_is_signed() {
        let server = MockServer::start();
        let search = server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/wbi/search/type")
                .query_param("keyword", "K签证")
                .query_param("page", "2")
                .query_param_exists("wts")
                .query_param_exists("w_rid");
            then.status(200).json_body(json!({
                "code": 0,
                "data": {"result": [{"bvid": "BV1", "title": "t", "play": 10}]}
            }));
        });

        let keys = WbiKeys {
            img_key: "7cd084941338484aae1ad9425b84077c".to_string(),
            sub_key: "4932caff0ff746eab6f01bf08b70ac45".to_string(),
        };
        let query = SearchQuery {
            keyword: "K签证".to_string(),
            order: "click".to_string(),
            duration: 0,
            page_size: 30,
        };

        let hits = client_for(&server).search_page(&query, 2, Some(&keys)).await.unwrap();
        search.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].play_count(), 10);
    }

    #[tokio::test]
    async fn test_platform_error_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/x/web-interface/wbi/search/type");
            then.status(200)
                .json_body(json!({"code": -412, "message": "请求被拦截", "data": null}));
        });

        let query = SearchQuery {
            keyword: "x".to_string(),
            order: "click".to_string(),
            duration: 0,
            page_size: 30,
        };
        let err = client_for(&server).search_page(&query, 1, None).await.unwrap_err();
        assert!(matches!(err, EtlError::PlatformError { code: -412, .. }));
    }

    #[tokio::test]
    async fn test_resolve_cid_from_page_then_view_api() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/video/BVpage");
            then.status(200)
                .body(r#"<script>window.__INITIAL_STATE__={"aid":1,"cid":778899,"bvid":"BVpage"}</script>"#);
        });
        server.mock(|when, then| {
            when.method(GET).path("/video/BVview");
            then.status(200).body("<html>no state</html>");
        });
        let view = server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/view")
                .query_param("bvid", "BVview");
            then.status(200).json_body(json!({"code": 0, "data": {"cid": 112233}}));
        });

        let client = client_for(&server);
        assert_eq!(client.resolve_cid("BVpage").await.unwrap(), 778899);
        assert_eq!(client.resolve_cid("BVview").await.unwrap(), 112233);
        view.assert();
    }

    #[tokio::test]
    async fn test_danmaku_rate_limit_maps_to_retryable_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/x/v1/dm/list.so").query_param("oid", "42");
            then.status(412);
        });

        let err = client_for(&server).fetch_danmaku_xml(42).await.unwrap_err();
        assert!(matches!(err, EtlError::RateLimitedError { status: 412 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_player_subtitles_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/x/player/v2")
                .query_param("bvid", "BV1")
                .query_param("cid", "7");
            then.status(200).json_body(json!({
                "code": 0,
                "data": {"subtitle": {"subtitles": [
                    {"lan": "ai-zh", "lan_doc": "中文", "subtitle_url": server.url("/sub/BV1.json")}
                ]}}
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/sub/BV1.json");
            then.status(200).json_body(json!({
                "body": [
                    {"from": 0.5, "to": 2.3, "location": 2, "content": "大家好"},
                    {"from": 2.3, "to": 4.0, "location": 2, "content": "今天聊签证"}
                ]
            }));
        });

        let client = client_for(&server);
        let tracks = client.player_subtitles("BV1", 7).await.unwrap();
        assert_eq!(tracks[0].lan, "ai-zh");

        let cues = client.fetch_subtitle_body(&tracks[0]).await.unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1].content, "今天聊签证");
    }
}
