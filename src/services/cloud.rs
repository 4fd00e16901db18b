// 云端进度服务
// 每个 (userId, topicId) 持久化一条进度记录，带乐观冲突检测。
// 两个实现：SqliteCloudStore 承载记录库语义（自托管/测试），
// HttpCloudClient 按 /api/sync 协议访问远端。

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SyncError};
use crate::models::{
    CloudTopicRecord, DeleteProgressResponse, FetchProgressResponse, SyncRecord,
    SyncUploadRequest, SyncUploadResponse, TopicProgress, TopicSyncResult, TopicSyncStatus,
    DATA_VERSION,
};
use crate::services::fingerprint::Fingerprint;
use crate::services::policy::UserContext;
use crate::utils::{now_rfc3339, parse_rfc3339};

/// 云端进度服务接口
///
/// fetch / upsert / delete 各自幂等：相同数据重复 upsert（非强制）
/// 走 skipped 分支，不改动 updatedAt。
#[async_trait]
pub trait CloudProgress: Send + Sync {
    /// 拉取用户全部主题的云端进度，按更新时间倒序
    async fn fetch_all(&self, user: &UserContext) -> Result<Vec<CloudTopicRecord>>;

    /// 批量上传进度。单个主题失败不影响其余主题，逐条返回状态。
    async fn upsert(
        &self,
        user: &UserContext,
        progress: &[TopicProgress],
        force_overwrite: bool,
    ) -> Result<Vec<TopicSyncResult>>;

    /// 删除单个主题的记录；topic_id 为 None 时删除该用户全部记录
    async fn delete(&self, user: &UserContext, topic_id: Option<i64>) -> Result<()>;

    /// 页面关闭时的尽力而为上传：不等待、不检测冲突、不保证送达
    fn send_beacon(&self, user: &UserContext, progress: Vec<TopicProgress>);
}

// ==================== SQLite 记录库实现 ====================

/// 本地 SQLite 承载的云端记录库
pub struct SqliteCloudStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCloudStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| SyncError::Storage(e.to_string()))?;
            }
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_records (
                user_id TEXT NOT NULL,
                topic_id TEXT NOT NULL,
                progress_data TEXT NOT NULL,
                version TEXT NOT NULL,
                last_sync_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, topic_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sync_records_updated_at
             ON sync_records(user_id, updated_at)",
            [],
        )?;

        Ok(())
    }

    fn check_session(user: &UserContext) -> Result<()> {
        if user.user_id.is_empty() {
            return Err(SyncError::Unauthorized);
        }
        if !user.permissions.can_sync_to_cloud {
            return Err(SyncError::Forbidden);
        }
        Ok(())
    }

    fn fetch_all_inner(&self, user: &UserContext) -> Result<Vec<CloudTopicRecord>> {
        Self::check_session(user)?;

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT topic_id, progress_data, last_sync_at, version
             FROM sync_records WHERE user_id = ? ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map(rusqlite::params![user.user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (topic_id, raw, last_sync_at, version) = row?;
            records.push(CloudTopicRecord {
                topic_id,
                data: serde_json::from_str(&raw)?,
                last_sync_at: parse_rfc3339(&last_sync_at)?,
                version,
            });
        }
        Ok(records)
    }

    fn upsert_inner(
        &self,
        user: &UserContext,
        progress: &[TopicProgress],
        force_overwrite: bool,
    ) -> Result<Vec<TopicSyncResult>> {
        Self::check_session(user)?;

        let mut results = Vec::with_capacity(progress.len());
        for topic in progress {
            match self.upsert_topic(user, topic, force_overwrite) {
                Ok(result) => results.push(result),
                Err(e) => {
                    // 单个主题失败不中断批量同步
                    log::error!(
                        "[CloudStore] 主题 {} 同步失败: {}",
                        topic.topic_id,
                        e
                    );
                    results.push(TopicSyncResult {
                        topic_id: topic.topic_id,
                        status: TopicSyncStatus::Error,
                        updated_at: None,
                        skipped: None,
                        cloud_data: None,
                        cloud_updated_at: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(results)
    }

    /// 读取单条云端记录
    fn get_record(&self, user: &UserContext, topic_key: &str) -> Result<Option<SyncRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT progress_data, version, last_sync_at, updated_at FROM sync_records
             WHERE user_id = ? AND topic_id = ?",
        )?;
        let mut rows = stmt.query(rusqlite::params![user.user_id, topic_key])?;

        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                let version: String = row.get(1)?;
                let last_sync_at: String = row.get(2)?;
                let updated_at: String = row.get(3)?;
                Ok(Some(SyncRecord {
                    user_id: user.user_id.clone(),
                    topic_id: topic_key.to_string(),
                    progress: serde_json::from_str(&raw)?,
                    version,
                    last_sync_at: parse_rfc3339(&last_sync_at)?,
                    updated_at: parse_rfc3339(&updated_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn upsert_topic(
        &self,
        user: &UserContext,
        topic: &TopicProgress,
        force_overwrite: bool,
    ) -> Result<TopicSyncResult> {
        let topic_key = topic.topic_id.to_string();

        if !force_overwrite {
            if let Some(record) = self.get_record(user, &topic_key)? {
                let stored_fp = Fingerprint::compute(std::slice::from_ref(&record.progress));
                let incoming_fp = Fingerprint::compute(std::slice::from_ref(topic));

                if stored_fp.matches(&incoming_fp) {
                    // 内容一致：跳过写入，updatedAt 保持不变
                    return Ok(TopicSyncResult {
                        topic_id: topic.topic_id,
                        status: TopicSyncStatus::Success,
                        updated_at: Some(record.updated_at),
                        skipped: Some(true),
                        cloud_data: None,
                        cloud_updated_at: None,
                        error: None,
                    });
                }

                // 内容不同且未强制覆盖：返回冲突信息，不写入
                return Ok(TopicSyncResult {
                    topic_id: topic.topic_id,
                    status: TopicSyncStatus::Conflict,
                    updated_at: None,
                    skipped: None,
                    cloud_data: Some(record.progress),
                    cloud_updated_at: Some(record.updated_at),
                    error: None,
                });
            }
        }

        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_records
             (user_id, topic_id, progress_data, version, last_sync_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                user.user_id,
                topic_key,
                serde_json::to_string(topic)?,
                DATA_VERSION,
                now,
                now,
            ],
        )?;

        Ok(TopicSyncResult {
            topic_id: topic.topic_id,
            status: TopicSyncStatus::Success,
            updated_at: Some(parse_rfc3339(&now)?),
            skipped: None,
            cloud_data: None,
            cloud_updated_at: None,
            error: None,
        })
    }

    fn delete_inner(&self, user: &UserContext, topic_id: Option<i64>) -> Result<()> {
        Self::check_session(user)?;

        let conn = self.conn.lock().unwrap();
        match topic_id {
            Some(id) => {
                conn.execute(
                    "DELETE FROM sync_records WHERE user_id = ? AND topic_id = ?",
                    rusqlite::params![user.user_id, id.to_string()],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM sync_records WHERE user_id = ?",
                    rusqlite::params![user.user_id],
                )?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProgress for SqliteCloudStore {
    async fn fetch_all(&self, user: &UserContext) -> Result<Vec<CloudTopicRecord>> {
        self.fetch_all_inner(user)
    }

    async fn upsert(
        &self,
        user: &UserContext,
        progress: &[TopicProgress],
        force_overwrite: bool,
    ) -> Result<Vec<TopicSyncResult>> {
        self.upsert_inner(user, progress, force_overwrite)
    }

    async fn delete(&self, user: &UserContext, topic_id: Option<i64>) -> Result<()> {
        self.delete_inner(user, topic_id)
    }

    fn send_beacon(&self, user: &UserContext, progress: Vec<TopicProgress>) {
        if let Err(e) = self.upsert_inner(user, &progress, false) {
            log::debug!("[CloudStore] beacon 上传失败（忽略）: {}", e);
        }
    }
}

// ==================== HTTP 客户端实现 ====================

/// 按 /api/sync 协议访问远端云服务的客户端
pub struct HttpCloudClient {
    base_url: String,
    session_token: Option<String>,
    client: reqwest::Client,
}

impl HttpCloudClient {
    pub fn new(base_url: impl Into<String>, session_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_token,
            client: reqwest::Client::new(),
        }
    }

    fn sync_url(&self) -> String {
        format!("{}/api/sync", self.base_url.trim_end_matches('/'))
    }

    fn with_session(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => builder.header(
                reqwest::header::COOKIE,
                format!("next-auth.session-token={}", token),
            ),
            None => builder,
        }
    }

    fn check_status(status: reqwest::StatusCode) -> Result<()> {
        match status.as_u16() {
            401 => Err(SyncError::Unauthorized),
            403 => Err(SyncError::Forbidden),
            _ if status.is_success() => Ok(()),
            code => Err(SyncError::Network(format!("unexpected status {}", code))),
        }
    }

    /// 本地权限短路：普通用户不发起任何云端请求
    fn check_permission(user: &UserContext) -> Result<()> {
        if !user.permissions.can_sync_to_cloud {
            return Err(SyncError::Forbidden);
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProgress for HttpCloudClient {
    async fn fetch_all(&self, user: &UserContext) -> Result<Vec<CloudTopicRecord>> {
        Self::check_permission(user)?;

        let response = self.with_session(self.client.get(self.sync_url())).send().await?;
        Self::check_status(response.status())?;

        let body: FetchProgressResponse = response.json().await?;
        Ok(body.progress)
    }

    async fn upsert(
        &self,
        user: &UserContext,
        progress: &[TopicProgress],
        force_overwrite: bool,
    ) -> Result<Vec<TopicSyncResult>> {
        Self::check_permission(user)?;

        let request = SyncUploadRequest {
            topic_progress: progress.to_vec(),
            force_overwrite,
        };

        let response = self
            .with_session(self.client.post(self.sync_url()))
            .json(&request)
            .send()
            .await?;
        Self::check_status(response.status())?;

        let body: SyncUploadResponse = response.json().await?;
        Ok(body.results)
    }

    async fn delete(&self, user: &UserContext, topic_id: Option<i64>) -> Result<()> {
        Self::check_permission(user)?;

        let mut builder = self.with_session(self.client.delete(self.sync_url()));
        if let Some(id) = topic_id {
            builder = builder.query(&[("topicId", id.to_string())]);
        }

        let response = builder.send().await?;
        Self::check_status(response.status())?;

        let _body: DeleteProgressResponse = response.json().await?;
        Ok(())
    }

    fn send_beacon(&self, user: &UserContext, progress: Vec<TopicProgress>) {
        if !user.permissions.can_sync_to_cloud || progress.is_empty() {
            return;
        }

        let request = SyncUploadRequest {
            topic_progress: progress,
            force_overwrite: false,
        };
        let builder = self.with_session(self.client.post(self.sync_url())).json(&request);

        // 页面/进程即将退出：发出后不等待响应
        tokio::spawn(async move {
            if let Err(e) = builder.send().await {
                log::debug!("[CloudClient] beacon 上传失败（忽略）: {}", e);
            }
        });
    }
}
