// tracker-syncd：同步守护进程入口
// 初始化日志与本地存储，按环境变量选择云端实现，执行会话引导对账，
// 随后由后台调度器接管稳态同步，Ctrl-C 退出前做尽力上传。

use std::sync::Arc;

use tokio::sync::Mutex;

use leetcode_tracker_sync::commands::{self, AppState, BootstrapOutcome};
use leetcode_tracker_sync::services::{
    AuthorizedEmails, CloudProgress, HttpCloudClient, ProgressStore, SchedulerConfig,
    SqliteCloudStore, SyncScheduler, SyncSession, UserContext,
};
use leetcode_tracker_sync::utils;

fn setup_logger() -> Result<(), fern::InitError> {
    let level = match std::env::var("TRACKER_LOG").as_deref() {
        Ok("debug") => log::LevelFilter::Debug,
        Ok("warn") => log::LevelFilter::Warn,
        _ => log::LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logger()?;

    let auth = AuthorizedEmails::from_env();
    let user_id = std::env::var("TRACKER_USER_ID").unwrap_or_else(|_| "local-user".to_string());
    let email = std::env::var("TRACKER_USER_EMAIL").ok();
    let user = UserContext::new(user_id, email, &auth);
    log::info!("用户角色: {:?}", user.permissions.role);

    let store = Arc::new(ProgressStore::open(&utils::get_progress_db_path())?);

    let cloud: Arc<dyn CloudProgress> = match std::env::var("TRACKER_SYNC_URL") {
        Ok(url) => {
            log::info!("使用远端同步服务: {}", url);
            let token = std::env::var("TRACKER_SESSION_TOKEN").ok();
            Arc::new(HttpCloudClient::new(url, token))
        }
        Err(_) => {
            log::info!("未配置 TRACKER_SYNC_URL，使用本地记录库");
            Arc::new(SqliteCloudStore::open(&utils::get_sync_db_path())?)
        }
    };

    let session = Arc::new(Mutex::new(SyncSession::new()));
    let (scheduler, handle) = SyncScheduler::new(
        store.clone(),
        cloud.clone(),
        session.clone(),
        user.clone(),
        SchedulerConfig::default(),
    );
    let worker = tokio::spawn(scheduler.run());

    let state = AppState::new(store, cloud, session, user, Some(handle.clone()));

    // 会话引导对账，每个认证会话只执行一次
    match commands::sync::bootstrap_sync(&state, vec![]).await {
        Ok(BootstrapOutcome::Uploaded(results)) => {
            log::info!("引导对账完成：已上传 {} 个主题", results.len());
        }
        Ok(BootstrapOutcome::AdoptedCloud) => {
            log::info!("引导对账完成：已采用云端进度");
        }
        Ok(BootstrapOutcome::Conflict { local, cloud }) => {
            // 无界面环境只能报告冲突；解决需在界面会话中选择策略
            log::warn!(
                "检测到进度冲突：本地 {} 题 / 云端 {} 题，等待用户决策",
                commands::completed_count(&local),
                commands::completed_count(&cloud)
            );
        }
        Ok(BootstrapOutcome::Skipped) => {
            log::info!("引导对账跳过（云端不可用或已对账）");
        }
        Err(e) => {
            // 同步失败不阻塞本地使用
            log::error!("引导对账失败，继续以本地模式运行: {}", e);
        }
    }

    log::info!("同步守护进程已启动，Ctrl-C 退出");
    tokio::signal::ctrl_c().await?;

    log::info!("收到退出信号，执行关闭前尽力上传");
    handle.shutdown().await;
    worker.await?;

    Ok(())
}
