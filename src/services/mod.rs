// 服务模块
// 同步核心的业务逻辑服务

pub mod cloud;
pub mod fingerprint;
pub mod policy;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use cloud::{CloudProgress, HttpCloudClient, SqliteCloudStore};
pub use fingerprint::Fingerprint;
pub use policy::{AuthorizedEmails, UserContext, UserPermissions, UserRole};
pub use resolver::{resolve, Resolution, ResolveStrategy};
pub use scheduler::{SchedulerConfig, SchedulerHandle, SyncScheduler, SyncTrigger};
pub use store::ProgressStore;
pub use sync::{SyncOrchestrator, SyncOutcome, SyncSession};
