use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Platform returned code {code}: {message}")]
    PlatformError { code: i64, message: String },

    #[error("Rate limited by platform (HTTP {status})")]
    RateLimitedError { status: u16 },

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatusError { status: u16, url: String },

    #[error("Authentication error: {message}")]
    AuthError { message: String },

    #[error("External command `{command}` failed: {message}")]
    CommandError { command: String, message: String },

    #[error("Missing external dependency: {name}")]
    DependencyError { name: String, hint: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Input file not found: {path}")]
    MissingInputError { path: String, stage: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Parse error in {context}: {message}")]
    ParseError { context: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Platform,
    Data,
    Io,
    Configuration,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ApiError(_)
            | EtlError::RateLimitedError { .. }
            | EtlError::HttpStatusError { .. } => ErrorCategory::Network,
            EtlError::PlatformError { .. } | EtlError::AuthError { .. } => ErrorCategory::Platform,
            EtlError::CsvError(_)
            | EtlError::SerializationError(_)
            | EtlError::ProcessingError { .. }
            | EtlError::MissingInputError { .. }
            | EtlError::ParseError { .. }
            | EtlError::ValidationError { .. } => ErrorCategory::Data,
            EtlError::IoError(_) | EtlError::ZipError(_) => ErrorCategory::Io,
            EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => ErrorCategory::Configuration,
            EtlError::CommandError { .. } | EtlError::DependencyError { .. } => {
                ErrorCategory::Environment
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Platform | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Io | ErrorCategory::Environment => ErrorSeverity::Critical,
            ErrorCategory::Configuration => ErrorSeverity::High,
        }
    }

    /// 可重試的錯誤（限流、暫時性網路問題）
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::RateLimitedError { .. } | EtlError::HttpStatusError { .. } => true,
            EtlError::ApiError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            EtlError::ParseError { .. } => true,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::RateLimitedError { .. } => {
                "Increase crawl delays or retry later; the platform is throttling requests".to_string()
            }
            EtlError::AuthError { .. } => {
                "Refresh the session cookie and export it as BILIBILI_COOKIE".to_string()
            }
            EtlError::DependencyError { hint, .. } => hint.clone(),
            EtlError::MissingInputError { stage, .. } => {
                format!("Run the {} stage first to produce this file", stage)
            }
            EtlError::CommandError { command, .. } => {
                format!("Check that `{}` runs correctly from a shell", command)
            }
            EtlError::PlatformError { .. } => {
                "Check the search parameters and whether the cookie is still valid".to_string()
            }
            _ => match self.category() {
                ErrorCategory::Network => "Check network connectivity and retry".to_string(),
                ErrorCategory::Configuration => {
                    "Review etl-config.toml and command line overrides".to_string()
                }
                ErrorCategory::Io => {
                    "Check that the working directory exists and is writable".to_string()
                }
                ErrorCategory::Data => {
                    "Inspect the input files produced by the previous stage".to_string()
                }
                _ => "Re-run with --verbose for more details".to_string(),
            },
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("網路請求失敗: {}", self),
            ErrorCategory::Platform => format!("平台回應錯誤: {}", self),
            ErrorCategory::Data => format!("資料處理失敗: {}", self),
            ErrorCategory::Io => format!("檔案讀寫失敗: {}", self),
            ErrorCategory::Configuration => format!("配置錯誤: {}", self),
            ErrorCategory::Environment => format!("外部工具錯誤: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
