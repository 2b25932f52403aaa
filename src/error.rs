use thiserror::Error;

#[derive(Error, Debug)]
pub enum CubescopeError {
    #[error("无效的响应: {0}")]
    InvalidResponse(String),

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("设置错误: {0}")]
    Settings(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL 解析错误: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

// Add conversion from anyhow::Error
impl From<anyhow::Error> for CubescopeError {
    fn from(err: anyhow::Error) -> Self {
        CubescopeError::Other(err.to_string())
    }
}

/// Result type for cubescope crate
pub type Result<T> = std::result::Result<T, CubescopeError>;
