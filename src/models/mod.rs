// 数据模型模块
// 定义题目、章节、主题进度等核心结构，以及云端同步接口的传输对象

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 当前应用数据格式版本，数据结构升级时更新
pub const DATA_VERSION: &str = "3.1.0";

/// 单道题目
///
/// `completed_at` 仅在 `completed == true` 时有意义；旧数据可能缺失时间戳，
/// 由本地存储在加载时补齐。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub topic_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsection_id: Option<String>,
    /// 题号，字符串类型以兼容非数字编号
    pub number: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<i32>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// 小节：章节内按插入顺序排列的题目分组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subsection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub problems: Vec<Problem>,
}

/// 章节：主题内的小节集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subsections: Vec<Subsection>,
}

/// 主题进度：同步的基本单位
///
/// `chapters` 是权威的结构化表示；`problems` 是旧版扁平列表，
/// 读写时必须原样保留，新代码路径只读 `chapters`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    pub topic_id: i64,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub problems: Vec<Problem>,
}

/// 云端进度记录：每个 (userId, topicId) 一行
///
/// 服务端将 topicId 存为字符串；version 为写入时的数据格式版本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub user_id: String,
    pub topic_id: String,
    pub progress: TopicProgress,
    pub version: String,
    pub last_sync_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==================== 同步接口传输对象 ====================

/// GET /api/sync 返回的单个主题记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudTopicRecord {
    pub topic_id: String,
    pub data: TopicProgress,
    pub last_sync_at: DateTime<Utc>,
    pub version: String,
}

/// GET /api/sync 响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchProgressResponse {
    pub progress: Vec<CloudTopicRecord>,
}

/// POST /api/sync 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUploadRequest {
    pub topic_progress: Vec<TopicProgress>,
    #[serde(default)]
    pub force_overwrite: bool,
}

/// POST /api/sync 响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUploadResponse {
    pub results: Vec<TopicSyncResult>,
}

/// 单个主题的同步结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicSyncStatus {
    Success,
    Conflict,
    Error,
}

/// 单个主题的同步结果
///
/// conflict 状态携带云端数据供解决冲突；error 状态只影响该主题，
/// 批量上传中其余主题照常处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSyncResult {
    pub topic_id: i64,
    pub status: TopicSyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_data: Option<TopicProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// DELETE /api/sync 响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteProgressResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_wire_format_is_camel_case() {
        let json = r#"{
            "id": "two-sum",
            "topicId": 1,
            "chapterId": "ch-1",
            "number": "1",
            "title": "Two Sum",
            "url": "https://leetcode.com/problems/two-sum/",
            "difficulty": 1200,
            "completed": true,
            "completedAt": "2024-06-01T08:30:00.000Z"
        }"#;

        let p: Problem = serde_json::from_str(json).unwrap();
        assert_eq!(p.topic_id, 1);
        assert_eq!(p.number, "1");
        assert!(p.completed);
        assert!(p.completed_at.is_some());

        let out = serde_json::to_value(&p).unwrap();
        assert!(out.get("topicId").is_some());
        assert!(out.get("completedAt").is_some());
        // 未设置的可选字段不应出现在输出中
        assert!(out.get("subsectionId").is_none());
    }

    #[test]
    fn test_topic_progress_tolerates_missing_fields() {
        // 旧版数据没有 chapters 字段，只有扁平 problems
        let json = r#"{"topicId": 3, "problems": []}"#;
        let tp: TopicProgress = serde_json::from_str(json).unwrap();
        assert_eq!(tp.topic_id, 3);
        assert!(tp.chapters.is_empty());

        // 完全缺失两个列表也不报错
        let tp: TopicProgress = serde_json::from_str(r#"{"topicId": 5}"#).unwrap();
        assert!(tp.chapters.is_empty());
        assert!(tp.problems.is_empty());
    }

    #[test]
    fn test_upload_request_round_trip() {
        let req = SyncUploadRequest {
            topic_progress: vec![TopicProgress {
                topic_id: 1,
                chapters: vec![],
                problems: vec![],
            }],
            force_overwrite: true,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"topicProgress\""));
        assert!(json.contains("\"forceOverwrite\":true"));

        let back: SyncUploadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic_progress.len(), 1);
        assert!(back.force_overwrite);
    }

    #[test]
    fn test_topic_sync_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TopicSyncStatus::Conflict).unwrap(),
            "\"conflict\""
        );
        let s: TopicSyncStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(s, TopicSyncStatus::Success);
    }
}
