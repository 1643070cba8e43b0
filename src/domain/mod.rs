// Domain layer: 資料模型與對外介面 (ports)，不依賴 HTTP 或檔案系統實作

pub mod model;
pub mod ports;
