pub mod danmaku_pipeline;
pub mod match_pipeline;
pub mod question_pipeline;
pub mod search_pipeline;
pub mod subtitle_pipeline;
pub mod topic_pipeline;
pub mod transcribe_pipeline;

pub use danmaku_pipeline::DanmakuPipeline;
pub use match_pipeline::MatchPipeline;
pub use question_pipeline::QuestionPipeline;
pub use search_pipeline::SearchPipeline;
pub use subtitle_pipeline::SubtitlePipeline;
pub use topic_pipeline::TopicPipeline;
pub use transcribe_pipeline::TranscribePipeline;
