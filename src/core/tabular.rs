use crate::utils::error::{EtlError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Excel 需要 BOM 才會以 UTF-8 開啟
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

pub fn read_csv<T: DeserializeOwned>(data: &[u8]) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(strip_bom(data));

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn write_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| EtlError::ProcessingError {
        message: format!("Failed to flush CSV writer: {}", e),
    })
}

pub fn read_json<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(strip_bom(data))?)
}

pub fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

/// 標題前 40 字轉成檔名，只保留英數字、空白、`-` 與 `_`
pub fn safe_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .take(40)
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim().to_string()
}

/// `BV1xx_標題.csv` → `BV1xx`
pub fn bvid_from_file_name(name: &str) -> &str {
    let stem = name.strip_suffix(".csv").unwrap_or(name);
    stem.split('_').next().unwrap_or(stem)
}
