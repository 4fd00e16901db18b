// 后台同步调度器
// 把「本地变更防抖、定时、关闭前尽力上传」三类触发统一成显式消息队列，
// 由单个工作循环消费。稳态同步只在会话引导对账完成、且无未决冲突时执行；
// 失败只记录日志，等下一个触发点重试，绝不阻塞本地使用。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::models::TopicSyncStatus;
use crate::services::cloud::CloudProgress;
use crate::services::policy::UserContext;
use crate::services::store::ProgressStore;
use crate::services::sync::SyncSession;

/// 同步触发事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// 本地进度被修改（防抖后上传）
    Change,
    /// 定时触发
    Periodic,
    /// 进程/页面即将退出（尽力而为 beacon，不等待结果）
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub periodic: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            periodic: Duration::from_secs(300),
        }
    }
}

/// 调度器句柄：供修改进度的代码路径投递触发事件
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SyncTrigger>,
}

impl SchedulerHandle {
    /// 本地进度变更通知。非阻塞：队列已满说明同步已在路上，直接丢弃。
    pub fn notify_change(&self) {
        let _ = self.tx.try_send(SyncTrigger::Change);
    }

    /// 请求关闭前的尽力上传
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SyncTrigger::Shutdown).await;
    }
}

/// 后台同步工作循环
pub struct SyncScheduler {
    store: Arc<ProgressStore>,
    cloud: Arc<dyn CloudProgress>,
    session: Arc<Mutex<SyncSession>>,
    user: UserContext,
    config: SchedulerConfig,
    rx: mpsc::Receiver<SyncTrigger>,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<ProgressStore>,
        cloud: Arc<dyn CloudProgress>,
        session: Arc<Mutex<SyncSession>>,
        user: UserContext,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(32);
        (
            Self {
                store,
                cloud,
                session,
                user,
                config,
                rx,
            },
            SchedulerHandle { tx },
        )
    }

    /// 消费触发队列直到收到 Shutdown（或所有句柄被丢弃）
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.periodic);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval 的第一次 tick 立即完成，先消费掉
        interval.tick().await;

        loop {
            tokio::select! {
                trigger = self.rx.recv() => match trigger {
                    Some(SyncTrigger::Change) => {
                        if self.wait_for_quiet().await {
                            self.send_shutdown_beacon();
                            return;
                        }
                        self.steady_state_sync().await;
                    }
                    Some(SyncTrigger::Periodic) => self.steady_state_sync().await,
                    Some(SyncTrigger::Shutdown) | None => {
                        self.send_shutdown_beacon();
                        return;
                    }
                },
                _ = interval.tick() => self.steady_state_sync().await,
            }
        }
    }

    /// 防抖：吸收一个窗口内的后续变更事件。返回 true 表示期间收到了关闭请求。
    async fn wait_for_quiet(&mut self) -> bool {
        loop {
            match tokio::time::timeout(self.config.debounce, self.rx.recv()).await {
                Ok(Some(SyncTrigger::Change)) | Ok(Some(SyncTrigger::Periodic)) => continue,
                Ok(Some(SyncTrigger::Shutdown)) | Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    /// 稳态同步：非强制上传当前本地快照。
    /// 引导对账未完成或有未决冲突时跳过；冲突行只记录，留给下次引导处理。
    async fn steady_state_sync(&self) {
        {
            let session = self.session.lock().await;
            if !session.has_reconciled() {
                log::debug!("[Scheduler] 引导对账未完成，跳过稳态同步");
                return;
            }
            if session.conflict_pending() {
                log::debug!("[Scheduler] 存在未决冲突，跳过稳态同步");
                return;
            }
        }

        let progress = match self.store.load_or_default(vec![]) {
            Ok(progress) => progress,
            Err(e) => {
                log::error!("[Scheduler] 读取本地进度失败: {}", e);
                return;
            }
        };
        if progress.is_empty() {
            return;
        }

        match self.cloud.upsert(&self.user, &progress, false).await {
            Ok(results) => {
                for result in &results {
                    match result.status {
                        TopicSyncStatus::Success => {}
                        TopicSyncStatus::Conflict => log::warn!(
                            "[Scheduler] 主题 {} 稳态同步遇到冲突，留待下次引导对账",
                            result.topic_id
                        ),
                        TopicSyncStatus::Error => log::warn!(
                            "[Scheduler] 主题 {} 同步失败: {}",
                            result.topic_id,
                            result.error.as_deref().unwrap_or("unknown")
                        ),
                    }
                }
                log::debug!("[Scheduler] 稳态同步完成，共 {} 个主题", results.len());
            }
            Err(e) => {
                log::warn!("[Scheduler] 稳态同步失败，下个触发点重试: {}", e);
            }
        }
    }

    /// 关闭前的尽力上传：发出即返回，不检测冲突，不保证送达
    fn send_shutdown_beacon(&self) {
        let progress = match self.store.load_or_default(vec![]) {
            Ok(progress) => progress,
            Err(_) => return,
        };
        if progress.is_empty() {
            return;
        }

        log::info!("[Scheduler] 关闭前尽力上传本地进度");
        self.cloud.send_beacon(&self.user, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, Problem, Subsection, TopicProgress};
    use crate::services::cloud::SqliteCloudStore;
    use crate::services::policy::AuthorizedEmails;

    fn user() -> UserContext {
        let auth = AuthorizedEmails {
            admin: String::new(),
            certificates: vec!["alice@example.com".to_string()],
        };
        UserContext::new("user-1", Some("alice@example.com".to_string()), &auth)
    }

    fn sample_progress() -> Vec<TopicProgress> {
        vec![TopicProgress {
            topic_id: 1,
            chapters: vec![Chapter {
                id: "ch-1".to_string(),
                title: "第一章".to_string(),
                subsections: vec![Subsection {
                    id: "ss-1".to_string(),
                    title: "基础".to_string(),
                    problems: vec![Problem {
                        id: "p-1".to_string(),
                        topic_id: 1,
                        chapter_id: None,
                        subsection_id: None,
                        number: "1".to_string(),
                        title: "两数之和".to_string(),
                        url: "https://leetcode.com/problems/two-sum/".to_string(),
                        difficulty: None,
                        completed: true,
                        completed_at: None,
                    }],
                }],
            }],
            problems: vec![],
        }]
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(30),
            periodic: Duration::from_secs(3600),
        }
    }

    fn reconciled_session() -> Arc<Mutex<SyncSession>> {
        let mut session = SyncSession::new();
        session.finish_for_test();
        Arc::new(Mutex::new(session))
    }

    #[tokio::test]
    async fn test_change_trigger_debounces_and_uploads() {
        let store = Arc::new(ProgressStore::open_in_memory().unwrap());
        store.save(&sample_progress()).unwrap();
        let cloud = Arc::new(SqliteCloudStore::open_in_memory().unwrap());
        let session = reconciled_session();
        let user = user();

        let (scheduler, handle) = SyncScheduler::new(
            store,
            cloud.clone(),
            session,
            user.clone(),
            test_config(),
        );
        let worker = tokio::spawn(scheduler.run());

        // 连续三次变更只应触发一次上传
        handle.notify_change();
        handle.notify_change();
        handle.notify_change();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let records = cloud.fetch_all(&user).await.unwrap();
        assert_eq!(records.len(), 1);

        handle.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_steady_sync_before_bootstrap_done() {
        let store = Arc::new(ProgressStore::open_in_memory().unwrap());
        store.save(&sample_progress()).unwrap();
        let cloud = Arc::new(SqliteCloudStore::open_in_memory().unwrap());
        let session = Arc::new(Mutex::new(SyncSession::new()));
        let user = user();

        let (scheduler, handle) =
            SyncScheduler::new(store, cloud.clone(), session, user.clone(), test_config());
        let worker = tokio::spawn(scheduler.run());

        handle.notify_change();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(
            cloud.fetch_all(&user).await.unwrap().is_empty(),
            "引导对账完成前不应有稳态同步"
        );

        handle.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_conflict_pauses_steady_sync() {
        let store = Arc::new(ProgressStore::open_in_memory().unwrap());
        store.save(&sample_progress()).unwrap();
        let cloud = Arc::new(SqliteCloudStore::open_in_memory().unwrap());
        let session = reconciled_session();
        session.lock().await.set_conflict_pending(true);
        let user = user();

        let (scheduler, handle) =
            SyncScheduler::new(store, cloud.clone(), session, user.clone(), test_config());
        let worker = tokio::spawn(scheduler.run());

        handle.notify_change();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cloud.fetch_all(&user).await.unwrap().is_empty());

        handle.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sends_best_effort_beacon() {
        let store = Arc::new(ProgressStore::open_in_memory().unwrap());
        store.save(&sample_progress()).unwrap();
        let cloud = Arc::new(SqliteCloudStore::open_in_memory().unwrap());
        let session = Arc::new(Mutex::new(SyncSession::new()));
        let user = user();

        let (scheduler, handle) =
            SyncScheduler::new(store, cloud.clone(), session, user.clone(), test_config());
        let worker = tokio::spawn(scheduler.run());

        // 未经引导也会尽力上传（beacon 不做冲突检测）
        handle.shutdown().await;
        worker.await.unwrap();

        let records = cloud.fetch_all(&user).await.unwrap();
        assert_eq!(records.len(), 1);
    }
}
