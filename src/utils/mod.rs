use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::SyncError;

/// 当前时间的 ISO-8601 字符串（毫秒精度，Z 后缀），与前端 toISOString 格式一致
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 解析 ISO-8601 时间戳
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::MalformedData(format!("invalid timestamp {:?}: {}", value, e)))
}

/// 应用数据目录：优先 TRACKER_DATA_DIR，否则落到用户目录
pub fn get_app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TRACKER_DATA_DIR") {
        return PathBuf::from(dir);
    }

    let mut path = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    path.push(".local/share/leetcode-tracker");
    path
}

/// 本地进度存储数据库路径
pub fn get_progress_db_path() -> PathBuf {
    let mut path = get_app_data_dir();
    path.push("progress.db");
    path
}

/// 自托管云端记录库路径（未配置远端 TRACKER_SYNC_URL 时使用）
pub fn get_sync_db_path() -> PathBuf {
    let mut path = get_app_data_dir();
    path.push("sync.db");
    path
}
