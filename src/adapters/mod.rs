// 對外部系統的實作：影音平台 HTTP 介面與語音轉文字工具

pub mod bilibili;
pub mod transcriber;

pub use bilibili::BiliClient;
pub use transcriber::WhisperCli;
