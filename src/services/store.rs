// 本地进度存储
// 提供带版本号的命名空间 KV 持久化，保存所有主题的嵌套进度结构。
// 读写均为同步操作；旧版数据在打开时迁移，删除前先写入带日期的备份。

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{TopicProgress, DATA_VERSION};

/// 数据格式版本号存储键
pub const VERSION_KEY: &str = "leetcode-tracker-version";
/// 当前进度数据存储键
pub const PROGRESS_KEY: &str = "leetcode-tracker-progress-v3";
/// 旧版进度数据存储键，迁移后删除
pub const LEGACY_PROGRESS_KEY: &str = "leetcode-tracker-progress";

/// 本地进度存储服务
pub struct ProgressStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressStore {
    /// 打开（或创建）本地进度库，并执行旧数据迁移与版本校验
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| crate::error::SyncError::Storage(e.to_string()))?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// 内存库，测试用
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        store.migrate_legacy()?;
        store.ensure_version()?;
        Ok(store)
    }

    /// 初始化表结构
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        // journal_mode 查询会返回一行，用 query_row 消费
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    // ==================== KV 基础操作 ====================

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?")?;
        let mut rows = stmt.query(rusqlite::params![key])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_value(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv_store WHERE key = ?", rusqlite::params![key])?;
        Ok(())
    }

    /// 按前缀列出存储键（备份键检查等）
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key FROM kv_store WHERE key LIKE ? ORDER BY key")?;
        let pattern = format!("{}%", prefix);
        let rows = stmt.query_map(rusqlite::params![pattern], |row| row.get(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    // ==================== 进度读写 ====================

    /// 读取进度；键不存在或解析失败时回退到调用方提供的初始进度。
    /// 返回前统一做归一化（补齐/清除 completedAt）。
    pub fn load_or_default(&self, defaults: Vec<TopicProgress>) -> Result<Vec<TopicProgress>> {
        let mut progress = match self.get_value(PROGRESS_KEY)? {
            Some(raw) => match serde_json::from_str::<Vec<TopicProgress>>(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::error!("[ProgressStore] 进度数据解析失败，回退到初始进度: {}", e);
                    defaults
                }
            },
            None => defaults,
        };

        normalize(&mut progress);
        Ok(progress)
    }

    /// 归一化后写入进度。旧版扁平列表原样保留。
    pub fn save(&self, progress: &[TopicProgress]) -> Result<()> {
        let mut normalized = progress.to_vec();
        normalize(&mut normalized);
        self.set_value(PROGRESS_KEY, &serde_json::to_string(&normalized)?)
    }

    // ==================== 迁移与版本 ====================

    /// 旧版键只读一次：先写备份，再尝试迁入 v3 键，最后删除旧键。
    /// 解析失败只记录日志，后续加载回退到初始进度。
    fn migrate_legacy(&self) -> Result<()> {
        let raw = match self.get_value(LEGACY_PROGRESS_KEY)? {
            Some(raw) => raw,
            None => return Ok(()),
        };

        let backup_key = make_backup_key();
        self.set_value(&backup_key, &raw)?;
        log::info!("[ProgressStore] 旧版进度已备份到 {}", backup_key);

        match serde_json::from_str::<Vec<TopicProgress>>(&raw) {
            Ok(legacy) => {
                if self.get_value(PROGRESS_KEY)?.is_none() {
                    self.set_value(PROGRESS_KEY, &serde_json::to_string(&legacy)?)?;
                    self.set_value(VERSION_KEY, DATA_VERSION)?;
                    log::info!(
                        "[ProgressStore] 旧版进度迁移完成，共 {} 个主题",
                        legacy.len()
                    );
                }
            }
            Err(e) => {
                log::warn!("[ProgressStore] 旧版进度解析失败，保留备份后丢弃: {}", e);
            }
        }

        self.remove_value(LEGACY_PROGRESS_KEY)
    }

    /// 版本号不匹配时备份并清空旧进度，重新写入当前版本号
    fn ensure_version(&self) -> Result<()> {
        match self.get_value(VERSION_KEY)? {
            Some(version) if version == DATA_VERSION => Ok(()),
            Some(version) => {
                log::warn!(
                    "[ProgressStore] 数据格式版本 {} != {}，清除本地进度",
                    version,
                    DATA_VERSION
                );
                if let Some(raw) = self.get_value(PROGRESS_KEY)? {
                    let backup_key = make_backup_key();
                    self.set_value(&backup_key, &raw)?;
                    log::info!("[ProgressStore] 旧进度已备份到 {}", backup_key);
                }
                self.remove_value(PROGRESS_KEY)?;
                self.set_value(VERSION_KEY, DATA_VERSION)
            }
            None => self.set_value(VERSION_KEY, DATA_VERSION),
        }
    }
}

/// 归一化：未完成的题目不应携带时间戳；已完成但缺时间戳的补为当前时间
fn normalize(progress: &mut [TopicProgress]) {
    let now = chrono::Utc::now();

    for topic in progress.iter_mut() {
        for chapter in topic.chapters.iter_mut() {
            for subsection in chapter.subsections.iter_mut() {
                for problem in subsection.problems.iter_mut() {
                    normalize_problem(problem, now);
                }
            }
        }
        for problem in topic.problems.iter_mut() {
            normalize_problem(problem, now);
        }
    }
}

fn normalize_problem(problem: &mut crate::models::Problem, now: chrono::DateTime<chrono::Utc>) {
    if !problem.completed {
        problem.completed_at = None;
    } else if problem.completed_at.is_none() {
        problem.completed_at = Some(now);
    }
}

/// 带日期的备份键，短 uuid 后缀避免同日多次迁移冲突
fn make_backup_key() -> String {
    let date = chrono::Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-backup-{}-{}", LEGACY_PROGRESS_KEY, date, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, Problem, Subsection};

    fn sample_progress() -> Vec<TopicProgress> {
        vec![TopicProgress {
            topic_id: 1,
            chapters: vec![Chapter {
                id: "ch-1".to_string(),
                title: "定长滑动窗口".to_string(),
                subsections: vec![Subsection {
                    id: "ss-1".to_string(),
                    title: "基础".to_string(),
                    problems: vec![Problem {
                        id: "p-1".to_string(),
                        topic_id: 1,
                        chapter_id: Some("ch-1".to_string()),
                        subsection_id: Some("ss-1".to_string()),
                        number: "1456".to_string(),
                        title: "定长子串中元音的最大数目".to_string(),
                        url: "https://leetcode.com/problems/x/".to_string(),
                        difficulty: Some(1263),
                        completed: true,
                        completed_at: None,
                    }],
                }],
            }],
            problems: vec![Problem {
                id: "legacy-1".to_string(),
                topic_id: 1,
                chapter_id: None,
                subsection_id: None,
                number: "3".to_string(),
                title: "无重复字符的最长子串".to_string(),
                url: "https://leetcode.com/problems/y/".to_string(),
                difficulty: None,
                completed: false,
                completed_at: Some(chrono::Utc::now()),
            }],
        }]
    }

    #[test]
    fn test_fresh_store_stamps_version() {
        let store = ProgressStore::open_in_memory().unwrap();
        assert_eq!(
            store.get_value(VERSION_KEY).unwrap().as_deref(),
            Some(DATA_VERSION)
        );
    }

    #[test]
    fn test_save_load_round_trip_preserves_legacy_list() {
        let store = ProgressStore::open_in_memory().unwrap();
        store.save(&sample_progress()).unwrap();

        let loaded = store.load_or_default(vec![]).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].problems.len(), 1, "旧版扁平列表必须保留");
        assert_eq!(loaded[0].chapters[0].subsections[0].problems.len(), 1);
    }

    #[test]
    fn test_normalization_backfills_and_clears_completed_at() {
        let store = ProgressStore::open_in_memory().unwrap();
        store.save(&sample_progress()).unwrap();

        let loaded = store.load_or_default(vec![]).unwrap();
        let structured = &loaded[0].chapters[0].subsections[0].problems[0];
        assert!(structured.completed);
        assert!(structured.completed_at.is_some(), "已完成题目补齐时间戳");

        let legacy = &loaded[0].problems[0];
        assert!(!legacy.completed);
        assert!(legacy.completed_at.is_none(), "未完成题目清除时间戳");
    }

    #[test]
    fn test_load_missing_key_returns_defaults() {
        let store = ProgressStore::open_in_memory().unwrap();
        let defaults = sample_progress();
        let loaded = store.load_or_default(defaults.clone()).unwrap();
        assert_eq!(loaded[0].topic_id, defaults[0].topic_id);
    }

    #[test]
    fn test_malformed_progress_falls_back_to_defaults() {
        let store = ProgressStore::open_in_memory().unwrap();
        store.set_value(PROGRESS_KEY, "not-json{{{").unwrap();

        let loaded = store.load_or_default(sample_progress()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].topic_id, 1);
    }

    #[test]
    fn test_legacy_migration_writes_backup_before_removal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("progress.db");

        {
            let store = ProgressStore::open(&db_path).unwrap();
            // 构造旧版状态：只有旧键，没有 v3 键和版本号
            let legacy_json = r#"[{"topicId": 2, "problems": [
                {"id": "p", "topicId": 2, "number": "704", "title": "二分查找",
                 "url": "https://leetcode.com/problems/binary-search/",
                 "completed": true}
            ]}]"#;
            store.set_value(LEGACY_PROGRESS_KEY, legacy_json).unwrap();
            store.remove_value(PROGRESS_KEY).unwrap();
            store.remove_value(VERSION_KEY).unwrap();
        }

        let store = ProgressStore::open(&db_path).unwrap();

        assert!(store.get_value(LEGACY_PROGRESS_KEY).unwrap().is_none());
        assert!(store.get_value(PROGRESS_KEY).unwrap().is_some());
        assert_eq!(
            store.get_value(VERSION_KEY).unwrap().as_deref(),
            Some(DATA_VERSION)
        );

        let backups = store
            .keys_with_prefix(&format!("{}-backup-", LEGACY_PROGRESS_KEY))
            .unwrap();
        assert_eq!(backups.len(), 1, "删除旧键前必须写入备份");

        let migrated = store.load_or_default(vec![]).unwrap();
        assert_eq!(migrated[0].topic_id, 2);
        assert!(migrated[0].problems[0].completed);
    }

    #[test]
    fn test_malformed_legacy_keeps_backup_and_drops_key() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("progress.db");

        {
            let store = ProgressStore::open(&db_path).unwrap();
            store.set_value(LEGACY_PROGRESS_KEY, "corrupted[[[").unwrap();
            store.remove_value(PROGRESS_KEY).unwrap();
        }

        let store = ProgressStore::open(&db_path).unwrap();
        assert!(store.get_value(LEGACY_PROGRESS_KEY).unwrap().is_none());
        assert!(store.get_value(PROGRESS_KEY).unwrap().is_none());

        let backups = store
            .keys_with_prefix(&format!("{}-backup-", LEGACY_PROGRESS_KEY))
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].len(), LEGACY_PROGRESS_KEY.len() + "-backup-".len() + 8 + 9);

        // 回退到初始进度，不崩溃
        let loaded = store.load_or_default(sample_progress()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_version_mismatch_resets_progress_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("progress.db");

        {
            let store = ProgressStore::open(&db_path).unwrap();
            store.save(&sample_progress()).unwrap();
            store.set_value(VERSION_KEY, "2.0.0").unwrap();
        }

        let store = ProgressStore::open(&db_path).unwrap();
        assert!(store.get_value(PROGRESS_KEY).unwrap().is_none());
        assert_eq!(
            store.get_value(VERSION_KEY).unwrap().as_deref(),
            Some(DATA_VERSION)
        );
        assert!(!store
            .keys_with_prefix(&format!("{}-backup-", LEGACY_PROGRESS_KEY))
            .unwrap()
            .is_empty());
    }
}
