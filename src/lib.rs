// LeetCode 刷题进度追踪 - 云端/本地同步核心
//
// 本地进度存储与云端记录之间的对账协议：拉取云端状态，指纹对比，
// 在 {采用云端, 上传本地, 无操作, 用户决策} 中选择，并持久化结果。

pub mod commands;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{Result, SyncError};
pub use models::{
    Chapter, CloudTopicRecord, Problem, Subsection, TopicProgress, TopicSyncResult,
    TopicSyncStatus, DATA_VERSION,
};
pub use services::{
    AuthorizedEmails, CloudProgress, Fingerprint, HttpCloudClient, ProgressStore,
    ResolveStrategy, SchedulerConfig, SchedulerHandle, SqliteCloudStore, SyncOrchestrator,
    SyncOutcome, SyncScheduler, SyncSession, UserContext,
};
