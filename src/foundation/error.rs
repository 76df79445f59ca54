pub type AlertcastResult<T> = Result<T, AlertcastError>;

#[derive(thiserror::Error, Debug)]
pub enum AlertcastError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AlertcastError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
