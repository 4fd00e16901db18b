// 应用命令模块
// 供界面层调用的操作封装：本地进度操作与云端同步流程

pub mod progress;
pub mod sync;

pub use progress::{
    completed_count,
    recent_completions,
    toggle_problem,
    topic_summaries,
    RecentCompletionDto,
    TopicSummaryDto,
};

pub use sync::{
    bootstrap_sync,
    delete_cloud_progress,
    resolve_conflict,
    BootstrapOutcome,
};

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::services::cloud::{CloudProgress, SqliteCloudStore};
use crate::services::policy::{AuthorizedEmails, UserContext};
use crate::services::scheduler::SchedulerHandle;
use crate::services::store::ProgressStore;
use crate::services::sync::SyncSession;

/// 应用共享状态，每个认证会话构造一次
pub struct AppState {
    pub store: Arc<ProgressStore>,
    pub cloud: Arc<dyn CloudProgress>,
    pub session: Arc<Mutex<SyncSession>>,
    pub user: UserContext,
    pub scheduler: Option<SchedulerHandle>,
}

impl AppState {
    pub fn new(
        store: Arc<ProgressStore>,
        cloud: Arc<dyn CloudProgress>,
        session: Arc<Mutex<SyncSession>>,
        user: UserContext,
        scheduler: Option<SchedulerHandle>,
    ) -> Self {
        Self {
            store,
            cloud,
            session,
            user,
            scheduler,
        }
    }

    /// 纯本地模式：未登录场景，普通角色（无云端权限）
    pub fn local_only(store: Arc<ProgressStore>) -> Result<Self> {
        let auth = AuthorizedEmails::default();
        Ok(Self {
            store,
            cloud: Arc::new(SqliteCloudStore::open_in_memory()?),
            session: Arc::new(Mutex::new(SyncSession::new())),
            user: UserContext::new("local", None, &auth),
            scheduler: None,
        })
    }
}
