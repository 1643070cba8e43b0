use crate::utils::error::{EtlError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(EtlError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 延遲區間：min <= max 且皆非負
pub fn validate_delay_window(field_name: &str, min: f64, max: f64) -> Result<()> {
    if min < 0.0 || max < min {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: format!("{}..{}", min, max),
            reason: "Expected 0 <= min <= max".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("platform.api_base", "https://api.bilibili.com").is_ok());
        assert!(validate_url("platform.api_base", "http://127.0.0.1:8080").is_ok());
        assert!(validate_url("platform.api_base", "").is_err());
        assert!(validate_url("platform.api_base", "invalid-url").is_err());
        assert!(validate_url("platform.api_base", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("search.page_size", 30, 1).is_ok());
        assert!(validate_positive_number("search.page_size", 0, 1).is_err());
    }

    #[test]
    fn test_validate_delay_window() {
        assert!(validate_delay_window("crawl.delay", 8.0, 15.0).is_ok());
        assert!(validate_delay_window("crawl.delay", 0.0, 0.0).is_ok());
        assert!(validate_delay_window("crawl.delay", 5.0, 1.0).is_err());
        assert!(validate_delay_window("crawl.delay", -1.0, 1.0).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("analysis.question_window_seconds", 10.0, 0.1, 600.0).is_ok());
        assert!(validate_range("analysis.question_window_seconds", 0.0, 0.1, 600.0).is_err());
    }
}
