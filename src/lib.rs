use std::io::Write;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, Transport, TransportKind};
pub use crate::core::{is_newer, SyncEngine, SyncReport};
pub use error::SyncError;
pub use storage::{create_backend, Backend};

/// 按配置连接后端并执行一次完整同步
///
/// 连接失败时直接返回，不会开始遍历，也不会输出任何进度行。
pub async fn run<W: Write>(config: &AppConfig, progress: W) -> Result<SyncReport, SyncError> {
    let mut backend = create_backend(config).await.map_err(|e| {
        tracing::error!("连接后端失败: {:#}", e);
        SyncError::connection(config.transport.kind().to_string(), e)
    })?;

    SyncEngine::new(&config.local_dir, progress)
        .run(backend.as_mut())
        .await
}
