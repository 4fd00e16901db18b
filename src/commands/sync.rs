// 云端同步命令
// 会话引导对账、冲突解决应用、云端记录删除

use crate::commands::AppState;
use crate::error::Result;
use crate::models::{TopicProgress, TopicSyncResult, TopicSyncStatus};
use crate::services::cloud::CloudProgress;
use crate::services::resolver::{self, ResolveStrategy};
use crate::services::sync::{SyncOrchestrator, SyncOutcome};

/// 引导对账的应用结果
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// 本地快照已上传（逐主题结果）
    Uploaded(Vec<TopicSyncResult>),
    /// 已采用云端副本并写入本地存储
    AdoptedCloud,
    /// 需要用户决策的冲突，双方快照原样带出供弹窗展示
    Conflict {
        local: Vec<TopicProgress>,
        cloud: Vec<TopicProgress>,
    },
    /// 本周期无动作
    Skipped,
}

/// 会话引导对账：执行决策并落实 上传/采用 两类结果；
/// 冲突只标记待决并带出快照，等待 resolve_conflict。
pub async fn bootstrap_sync(
    state: &AppState,
    defaults: Vec<TopicProgress>,
) -> Result<BootstrapOutcome> {
    let local = state.store.load_or_default(defaults)?;
    let orchestrator = SyncOrchestrator::new(state.cloud.clone());

    let outcome = {
        let mut session = state.session.lock().await;
        orchestrator
            .bootstrap(&mut session, &state.user, &local)
            .await
    };

    match outcome {
        SyncOutcome::UploadLocal { force } => {
            let results = state.cloud.upsert(&state.user, &local, force).await?;
            for result in &results {
                if result.status != TopicSyncStatus::Success {
                    log::warn!(
                        "[Sync] 主题 {} 上传未成功: {:?}",
                        result.topic_id,
                        result.status
                    );
                }
            }
            Ok(BootstrapOutcome::Uploaded(results))
        }
        SyncOutcome::AdoptCloud(cloud_progress) => {
            state.store.save(&cloud_progress)?;
            Ok(BootstrapOutcome::AdoptedCloud)
        }
        SyncOutcome::Conflict { local, cloud } => {
            state.session.lock().await.set_conflict_pending(true);
            Ok(BootstrapOutcome::Conflict { local, cloud })
        }
        SyncOutcome::Skipped => Ok(BootstrapOutcome::Skipped),
    }
}

/// 应用用户选择的冲突解决策略。
/// 结果先写入本地存储；保留本地 / 合并两种策略随后强制上传
/// （合并可能新增云端没有的完成记录）。保留云端无需上传。
pub async fn resolve_conflict(
    state: &AppState,
    strategy: ResolveStrategy,
    local: Vec<TopicProgress>,
    cloud: Vec<TopicProgress>,
) -> Result<Vec<TopicSyncResult>> {
    let resolution = resolver::resolve(strategy, local, cloud);
    state.store.save(&resolution.progress)?;
    state.session.lock().await.set_conflict_pending(false);

    if resolution.needs_upload {
        state
            .cloud
            .upsert(&state.user, &resolution.progress, true)
            .await
    } else {
        Ok(vec![])
    }
}

/// 删除云端进度：指定主题或全部
pub async fn delete_cloud_progress(state: &AppState, topic_id: Option<i64>) -> Result<()> {
    state.cloud.delete(&state.user, topic_id).await
}
