// 同步错误类型
// 冲突不是错误：它是需要用户决策的一等状态，由 SyncOutcome 携带

use std::fmt;

#[derive(Debug)]
pub enum SyncError {
    /// 传输层失败，下个同步周期重试，不阻塞本地使用
    Network(String),
    /// 会话缺失或过期
    Unauthorized,
    /// 已登录但无云端同步权限（普通用户）
    Forbidden,
    /// 本地数据解析失败（迁移旧格式时回退到默认进度）
    MalformedData(String),
    /// 本地 SQLite 存储错误
    Storage(String),
    /// 目标不存在（题目、主题等）
    NotFound(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Network(msg) => write!(f, "network error: {}", msg),
            SyncError::Unauthorized => write!(f, "unauthorized: no valid session"),
            SyncError::Forbidden => write!(f, "forbidden: sync permission required"),
            SyncError::MalformedData(msg) => write!(f, "malformed data: {}", msg),
            SyncError::Storage(msg) => write!(f, "storage error: {}", msg),
            SyncError::NotFound(what) => write!(f, "not found: {}", what),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::MalformedData(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
