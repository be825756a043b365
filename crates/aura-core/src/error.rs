use thiserror::Error;

/// 会话层错误类型, 每个变体对应一种带类型的 error 回复
#[derive(Error, Debug)]
pub enum AuraError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("invalid user key: {0}")]
    InvalidUserKey(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("focus rate limit exceeded")]
    FocusRateLimited,

    #[error("internal error")]
    Internal,
}
