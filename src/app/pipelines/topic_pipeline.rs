use crate::app::pipelines::question_pipeline::ANALYSIS_FILE;
use crate::config::toml_config::EtlConfig;
use crate::core::tabular::{read_json, write_csv};
use crate::core::{Pipeline, Storage};
use crate::domain::model::{QuestionContext, TopicDocument};
use crate::utils::error::{EtlError, Result};
use jieba_rs::Jieba;
use reqwest::Client;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

/// 將問題彈幕的上下文轉成 LDA 可用的斷詞文件
pub struct TopicPipeline<S: Storage> {
    storage: S,
    config: EtlConfig,
    jieba: Jieba,
    client: Client,
}

#[derive(Debug, Default)]
pub struct TopicCorpus {
    pub subtitles: Vec<TopicDocument>,
    pub danmaku: Vec<TopicDocument>,
    pub combined: Vec<TopicDocument>,
}

/// 斷詞後去掉空白與停用詞，以空白連接
pub fn segment_text(jieba: &Jieba, text: &str, stopwords: &HashSet<String>) -> String {
    jieba
        .cut(text, true)
        .into_iter()
        .filter(|word| !word.trim().is_empty() && !stopwords.contains(*word))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_stopwords(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl<S: Storage> TopicPipeline<S> {
    pub fn new(storage: S, config: EtlConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.platform.timeout_seconds))
            .build()?;
        Ok(Self {
            storage,
            config,
            jieba: Jieba::new(),
            client,
        })
    }

    /// 優先使用本地停用詞檔，沒有時下載各來源合併後存檔
    async fn stopwords(&self) -> Result<HashSet<String>> {
        let path = &self.config.topics.stopwords_file;
        if self.storage.exists(path).await {
            let data = self.storage.read_file(path).await?;
            let stopwords = parse_stopwords(&String::from_utf8_lossy(&data));
            tracing::info!("📖 Loaded {} stopwords from {}", stopwords.len(), path);
            return Ok(stopwords);
        }

        let mut merged = BTreeSet::new();
        for url in &self.config.topics.stopword_urls {
            match self.download(url).await {
                Ok(content) => {
                    let words = parse_stopwords(&content);
                    tracing::debug!("⬇️ {} stopwords from {}", words.len(), url);
                    merged.extend(words);
                }
                Err(e) => tracing::warn!("⚠️ Could not download stopwords from {}: {}", url, e),
            }
        }

        let joined = merged.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        self.storage.write_file(path, joined.as_bytes()).await?;
        tracing::info!("💾 Saved {} merged stopwords to {}", merged.len(), path);

        Ok(merged.into_iter().collect())
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::HttpStatusError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }

    fn document(&self, context: &QuestionContext, text: String) -> TopicDocument {
        TopicDocument {
            doc_id: format!("{}_{:.0}", context.bvid, context.question_time),
            text,
            bvid: context.bvid.clone(),
            question_danmaku: context.question_danmaku.clone(),
        }
    }

    fn push_segmented(
        &self,
        docs: &mut Vec<TopicDocument>,
        context: &QuestionContext,
        raw: &str,
        stopwords: &HashSet<String>,
    ) {
        if raw.trim().is_empty() {
            return;
        }
        let segmented = segment_text(&self.jieba, raw, stopwords);
        if !segmented.trim().is_empty() {
            docs.push(self.document(context, segmented));
        }
    }

    fn output(&self, name: &str) -> String {
        format!("{}/{}", self.config.paths.topic_dir, name)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for TopicPipeline<S> {
    type Extracted = (Vec<QuestionContext>, HashSet<String>);
    type Transformed = TopicCorpus;

    fn name(&self) -> &str {
        "topics"
    }

    async fn extract(&self) -> Result<(Vec<QuestionContext>, HashSet<String>)> {
        let path = format!("{}/{}", self.config.paths.question_dir, ANALYSIS_FILE);
        if !self.storage.exists(&path).await {
            return Err(EtlError::MissingInputError {
                path,
                stage: "questions".to_string(),
            });
        }
        let contexts: Vec<QuestionContext> = read_json(&self.storage.read_file(&path).await?)?;
        tracing::info!("📂 Loaded {} question records", contexts.len());

        let stopwords = self.stopwords().await?;
        Ok((contexts, stopwords))
    }

    async fn transform(&self, data: (Vec<QuestionContext>, HashSet<String>)) -> Result<TopicCorpus> {
        let (contexts, stopwords) = data;
        let mut corpus = TopicCorpus::default();

        for context in &contexts {
            let subtitle_text = context
                .nearby_subtitles
                .iter()
                .map(|s| s.content.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let danmaku_text = context
                .nearby_danmaku
                .iter()
                .map(|d| d.danmaku_content.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let combined_text = format!("{} {}", subtitle_text, danmaku_text);

            self.push_segmented(&mut corpus.subtitles, context, &subtitle_text, &stopwords);
            self.push_segmented(&mut corpus.danmaku, context, &danmaku_text, &stopwords);
            self.push_segmented(&mut corpus.combined, context, &combined_text, &stopwords);
        }

        Ok(corpus)
    }

    async fn load(&self, result: TopicCorpus) -> Result<String> {
        for (name, docs) in [
            ("subtitle_texts.csv", &result.subtitles),
            ("danmaku_texts.csv", &result.danmaku),
            ("combined_texts.csv", &result.combined),
        ] {
            self.storage
                .write_file(&self.output(name), &write_csv(docs)?)
                .await?;
            tracing::info!("💾 {} documents -> {}", docs.len(), name);
        }
        Ok(self.config.paths.topic_dir.clone())
    }
}
