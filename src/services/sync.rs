// 同步协调器
// 认证会话建立后执行一次本地/云端对账：拉取云端进度，对比指纹，
// 在 {采用云端, 上传本地, 跳过, 冲突} 中做出决策。
// 引导守卫在首次网络请求之前同步置位，防止并发重复对账。

use std::sync::Arc;

use crate::error::SyncError;
use crate::models::{TopicProgress, DATA_VERSION};
use crate::services::cloud::CloudProgress;
use crate::services::fingerprint::Fingerprint;
use crate::services::policy::UserContext;

/// 对账决策
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// 上传整份本地快照；force 为 true 时绕过乐观冲突检测
    UploadLocal { force: bool },
    /// 采用云端副本，写回本地存储
    AdoptCloud(Vec<TopicProgress>),
    /// 双方都有完成记录且不一致，需要用户决策
    Conflict {
        local: Vec<TopicProgress>,
        cloud: Vec<TopicProgress>,
    },
    /// 本周期无动作（已对账过 / 云端不可用 / 暂时性失败待重试）
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapState {
    /// 尚未对账（或暂时性失败后等待重试）
    Pending,
    /// 对账进行中，阻止并发引导
    InFlight,
    /// 本会话已对账完成（或云端已判定不可用）
    Done,
}

/// 会话级同步状态，每个认证会话构造一次并显式传递
pub struct SyncSession {
    state: BootstrapState,
    conflict_pending: bool,
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            state: BootstrapState::Pending,
            conflict_pending: false,
        }
    }

    /// 本会话是否已完成对账
    pub fn has_reconciled(&self) -> bool {
        self.state == BootstrapState::Done
    }

    /// 是否有未解决的冲突（稳态同步在此期间暂停）
    pub fn conflict_pending(&self) -> bool {
        self.conflict_pending
    }

    pub fn set_conflict_pending(&mut self, pending: bool) {
        self.conflict_pending = pending;
    }

    fn try_begin(&mut self) -> bool {
        if self.state == BootstrapState::Pending {
            self.state = BootstrapState::InFlight;
            true
        } else {
            false
        }
    }

    fn finish(&mut self) {
        self.state = BootstrapState::Done;
    }

    fn retry_later(&mut self) {
        self.state = BootstrapState::Pending;
    }

    #[cfg(test)]
    pub(crate) fn finish_for_test(&mut self) {
        self.state = BootstrapState::Done;
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

/// 同步协调器
pub struct SyncOrchestrator {
    cloud: Arc<dyn CloudProgress>,
}

impl SyncOrchestrator {
    pub fn new(cloud: Arc<dyn CloudProgress>) -> Self {
        Self { cloud }
    }

    /// 会话引导对账，按固定顺序求值：
    /// 1. 云端无记录 → 上传本地
    /// 2. 云端数据格式版本过旧 → 强制覆盖上传（旧格式只替换不合并）
    /// 3. 本地零完成 → 采用云端
    /// 4. 云端零完成 → 上传本地
    /// 5. 指纹一致 → 采用云端（双方一致后以云端为规范副本收敛）
    /// 6. 其余 → 冲突，交给用户决策
    pub async fn bootstrap(
        &self,
        session: &mut SyncSession,
        user: &UserContext,
        local: &[TopicProgress],
    ) -> SyncOutcome {
        // 守卫先于任何 await 置位
        if !session.try_begin() {
            log::debug!("[Sync] 本会话已对账，跳过");
            return SyncOutcome::Skipped;
        }

        let records = match self.cloud.fetch_all(user).await {
            Ok(records) => records,
            Err(SyncError::Unauthorized) | Err(SyncError::Forbidden) => {
                // 云端对本会话不可用：仅本地模式，不再重试
                log::info!("[Sync] 无云端同步权限，本会话仅使用本地进度");
                session.finish();
                return SyncOutcome::Skipped;
            }
            Err(e) => {
                // 暂时性失败：本周期跳过，下个触发点重试
                log::warn!("[Sync] 拉取云端进度失败，本周期跳过: {}", e);
                session.retry_later();
                return SyncOutcome::Skipped;
            }
        };

        session.finish();

        if records.is_empty() {
            log::info!("[Sync] 云端无进度记录，上传本地快照");
            return SyncOutcome::UploadLocal { force: false };
        }

        if let Some(stale) = records.iter().find(|r| r.version != DATA_VERSION) {
            // 旧格式数据不参与合并，直接整体替换
            log::warn!(
                "[Sync] 云端主题 {} 数据格式版本 {} != {}，强制覆盖",
                stale.topic_id,
                stale.version,
                DATA_VERSION
            );
            return SyncOutcome::UploadLocal { force: true };
        }

        let cloud_progress: Vec<TopicProgress> =
            records.into_iter().map(|record| record.data).collect();

        let local_fp = Fingerprint::compute(local);
        let cloud_fp = Fingerprint::compute(&cloud_progress);

        if local_fp.is_empty() {
            log::info!(
                "[Sync] 本地无完成记录，采用云端进度（{} 题已完成）",
                cloud_fp.len()
            );
            return SyncOutcome::AdoptCloud(cloud_progress);
        }

        if cloud_fp.is_empty() {
            log::info!(
                "[Sync] 云端无完成记录，上传本地进度（{} 题已完成）",
                local_fp.len()
            );
            return SyncOutcome::UploadLocal { force: false };
        }

        if local_fp.matches(&cloud_fp) {
            log::info!("[Sync] 本地与云端一致（{} 题已完成），采用云端副本", local_fp.len());
            return SyncOutcome::AdoptCloud(cloud_progress);
        }

        log::info!(
            "[Sync] 检测到进度冲突：本地 {} 题 / 云端 {} 题，等待用户选择",
            local_fp.len(),
            cloud_fp.len()
        );
        SyncOutcome::Conflict {
            local: local.to_vec(),
            cloud: cloud_progress,
        }
    }
}
