use crate::adapters::bilibili::{BiliClient, SearchQuery, WbiKeys};
use crate::config::toml_config::EtlConfig;
use crate::core::index::VideoIndex;
use crate::core::{Pipeline, Storage};
use crate::domain::model::VideoEntry;
use crate::utils::error::{EtlError, Result};
use crate::utils::pacing::Pacer;
use std::collections::HashSet;

pub struct SearchPipeline<S: Storage> {
    storage: S,
    config: EtlConfig,
    client: BiliClient,
}

impl<S: Storage> SearchPipeline<S> {
    pub fn new(storage: S, config: EtlConfig) -> Result<Self> {
        let client = BiliClient::new(&config.platform)?;
        Ok(Self {
            storage,
            config,
            client,
        })
    }

    /// 驗證登入狀態並取得 WBI 金鑰
    async fn prepare_session(&self) -> Result<Option<WbiKeys>> {
        if !self.client.has_cookie() {
            tracing::warn!("⚠️ No cookie configured (set BILIBILI_COOKIE), search results may be limited");
        }

        let nav = match self.client.nav().await {
            Ok(nav) => nav,
            Err(e) if !self.config.search.require_login => {
                tracing::warn!("⚠️ Session check failed, searching unsigned: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if nav.is_login {
            tracing::info!(
                "🔐 Logged in as {} (UID: {})",
                nav.uname.as_deref().unwrap_or("N/A"),
                nav.mid.map(|m| m.to_string()).unwrap_or_else(|| "N/A".to_string())
            );
        } else if self.config.search.require_login {
            return Err(EtlError::AuthError {
                message: "cookie is missing or expired".to_string(),
            });
        } else {
            tracing::warn!("⚠️ Not logged in, continuing anonymously");
        }

        if nav.wbi_keys.is_none() {
            tracing::warn!("⚠️ Could not get WBI keys, search may fail");
        }
        Ok(nav.wbi_keys)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for SearchPipeline<S> {
    type Extracted = Vec<VideoEntry>;
    type Transformed = (VideoIndex, usize);

    fn name(&self) -> &str {
        "search"
    }

    async fn extract(&self) -> Result<Vec<VideoEntry>> {
        let search = &self.config.search;
        tracing::info!(
            "🔍 Keyword: '{}', min views: {}, max results: {}, order: {}",
            search.keyword,
            search.min_views,
            search.max_videos,
            search.order
        );

        let keys = self.prepare_session().await?;
        let query = SearchQuery {
            keyword: search.keyword.clone(),
            order: search.order.clone(),
            duration: search.duration,
            page_size: search.page_size,
        };
        let page_delay = search.page_delay_ms as f64 / 1000.0;
        let pacer = Pacer::new(page_delay, page_delay);

        let mut videos = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1u32;

        while videos.len() < search.max_videos {
            tracing::info!("📄 Page {}", page);
            let hits = match self.client.search_page(&query, page, keys.as_ref()).await {
                Ok(hits) => hits,
                Err(e) if videos.is_empty() && page == 1 => return Err(e),
                Err(e) => {
                    tracing::error!("❌ Search stopped on page {}: {}", page, e);
                    break;
                }
            };

            if hits.is_empty() {
                tracing::info!("No more results");
                break;
            }

            for hit in hits {
                if hit.bvid.is_empty() || hit.play_count() < search.min_views {
                    continue;
                }
                if !seen.insert(hit.bvid.clone()) {
                    continue;
                }

                let entry = hit.into_entry();
                tracing::debug!(
                    "  [{:3}] {} | views {} | {}",
                    videos.len() + 1,
                    entry.title,
                    entry.play_count,
                    entry.bvid
                );
                videos.push(entry);

                if videos.len() >= search.max_videos {
                    break;
                }
            }

            page += 1;
            pacer.pause().await;
        }

        tracing::info!("🎬 Found {} videos with at least {} views", videos.len(), search.min_views);
        Ok(videos)
    }

    async fn transform(&self, data: Vec<VideoEntry>) -> Result<(VideoIndex, usize)> {
        let mut index = VideoIndex::load_or_empty(&self.storage, &self.config.paths.video_index).await?;
        let previous = index.len();
        let added = index.merge_search_results(data);
        tracing::info!(
            "🗂️ Index: {} existing, {} new, {} total",
            previous,
            added,
            index.len()
        );
        Ok((index, added))
    }

    async fn load(&self, result: (VideoIndex, usize)) -> Result<String> {
        let (index, _) = result;
        let path = &self.config.paths.video_index;
        index.save(&self.storage, path).await?;
        Ok(path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_storage::MockStorage;
    use crate::core::tabular::read_csv;
    use crate::domain::model::CrawlStatus;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_config(server: &MockServer) -> EtlConfig {
        let mut config = EtlConfig::default();
        config.platform.api_base = server.base_url();
        config.platform.web_base = server.base_url();
        config.platform.cookie = Some("SESSDATA=abc".to_string());
        config.search.page_delay_ms = 0;
        config.search.min_views = 1000;
        config.search.max_videos = 3;
        config
    }

    fn mock_nav(server: &MockServer, logged_in: bool) {
        let code = if logged_in { 0 } else { -101 };
        server.mock(|when, then| {
            when.method(GET).path("/x/web-interface/nav");
            then.status(200).json_body(json!({
                "code": code,
                "message": "0",
                "data": {
                    "isLogin": logged_in,
                    "uname": "tester",
                    "mid": 42,
                    "wbi_img": {
                        "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                        "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
                    }
                }
            }));
        });
    }

    #[tokio::test]
    async fn test_search_filters_dedupes_and_caps() {
        let server = MockServer::start();
        mock_nav(&server, true);
        server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/wbi/search/type")
                .query_param("page", "1");
            then.status(200).json_body(json!({"code": 0, "data": {"result": [
                {"bvid": "BV1", "title": "<em class=\"keyword\">K签证</em>一", "play": 5000},
                {"bvid": "BV2", "title": "low", "play": 10},
                {"bvid": "BV1", "title": "dup", "play": 9000}
            ]}}));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/wbi/search/type")
                .query_param("page", "2");
            then.status(200).json_body(json!({"code": 0, "data": {"result": [
                {"bvid": "BV3", "title": "三", "play": "1.5万"},
                {"bvid": "BV4", "title": "四", "play": "2,000"},
                {"bvid": "BV5", "title": "五", "play": 99999}
            ]}}));
        });

        let pipeline = SearchPipeline::new(MockStorage::new(), test_config(&server)).unwrap();
        let videos = pipeline.extract().await.unwrap();

        let bvids: Vec<&str> = videos.iter().map(|v| v.bvid.as_str()).collect();
        assert_eq!(bvids, vec!["BV1", "BV3", "BV4"]);
        assert_eq!(videos[0].title, "K签证一");
        assert_eq!(videos[1].play_count, 15000);
    }

    #[tokio::test]
    async fn test_search_requires_login() {
        let server = MockServer::start();
        mock_nav(&server, false);

        let pipeline = SearchPipeline::new(MockStorage::new(), test_config(&server)).unwrap();
        let err = pipeline.extract().await.unwrap_err();
        assert!(matches!(err, EtlError::AuthError { .. }));
    }

    #[tokio::test]
    async fn test_search_stops_on_empty_page_and_merges_index() {
        let server = MockServer::start();
        mock_nav(&server, false);
        server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/wbi/search/type")
                .query_param("page", "1");
            then.status(200).json_body(json!({"code": 0, "data": {"result": [
                {"bvid": "BVold", "title": "again", "play": 3000}
            ]}}));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/x/web-interface/wbi/search/type")
                .query_param("page", "2");
            then.status(200).json_body(json!({"code": 0, "data": {"result": []}}));
        });

        let storage = MockStorage::new();
        let mut existing = VideoEntry::new("BVold", "old title");
        existing.crawled = CrawlStatus::Done;
        VideoIndex::new(vec![existing])
            .save(&storage, "video_index.csv")
            .await
            .unwrap();

        let mut config = test_config(&server);
        config.search.require_login = false;
        let pipeline = SearchPipeline::new(storage.clone(), config).unwrap();

        let videos = pipeline.extract().await.unwrap();
        assert_eq!(videos.len(), 1);
        let transformed = pipeline.transform(videos).await.unwrap();
        assert_eq!(transformed.1, 0);
        let path = pipeline.load(transformed).await.unwrap();
        assert_eq!(path, "video_index.csv");

        let saved: Vec<VideoEntry> = read_csv(&storage.get_file("video_index.csv").await.unwrap()).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].title, "again");
        assert_eq!(saved[0].crawled, CrawlStatus::Done);
    }
}
