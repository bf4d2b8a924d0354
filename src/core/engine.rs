use crate::core::comparator::is_newer;
use crate::error::SyncError;
use crate::storage::{to_rel_path, Backend};
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 完成时输出的标记行
pub const COMPLETE_MARKER: &str = "sync complete";

/// 同步报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_scanned: u64,
    pub files_uploaded: u64,
    pub files_skipped: u64,
    pub bytes_uploaded: u64,
    pub duration_ms: u64,
}

/// 同步引擎
///
/// 逐个遍历本地文件，按修改时间决定是否上传。同一时刻只处理一个文件，
/// 进度行（`uploaded: <相对路径>`）写入 `progress`。
pub struct SyncEngine<W> {
    local_root: PathBuf,
    progress: W,
}

impl<W: Write> SyncEngine<W> {
    pub fn new(local_root: impl Into<PathBuf>, progress: W) -> Self {
        Self {
            local_root: local_root.into(),
            progress,
        }
    }

    pub fn into_progress(self) -> W {
        self.progress
    }

    /// 运行同步。无论成功与否，结束前都会关闭后端且只关闭一次。
    pub async fn run(&mut self, backend: &mut dyn Backend) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        info!(
            "开始同步: {} -> {}",
            self.local_root.display(),
            backend.name()
        );

        let result = self.walk(backend).await;

        if let Err(e) = backend.close().await {
            warn!("关闭后端失败（忽略）: {}: {:#}", backend.name(), e);
        }

        let mut report = result?;
        report.duration_ms = start.elapsed().as_millis() as u64;

        writeln!(self.progress, "{}", COMPLETE_MARKER).map_err(SyncError::Output)?;
        self.progress.flush().map_err(SyncError::Output)?;

        info!(
            "同步完成: 扫描 {} 个文件, 上传 {} 个 ({} 字节), 跳过 {} 个, 耗时 {}ms",
            report.files_scanned,
            report.files_uploaded,
            report.bytes_uploaded,
            report.files_skipped,
            report.duration_ms
        );
        Ok(report)
    }

    async fn walk(&mut self, backend: &dyn Backend) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        for entry in WalkDir::new(&self.local_root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_not_found(e.io_error()) => {
                    // 遍历中路径消失（例如根目录被删除），结束遍历但不算失败
                    warn!("路径已不存在，停止遍历: {}", e);
                    break;
                }
                Err(e) => return Err(SyncError::Walk(e)),
            };

            // 只同步普通文件，目录随文件路径隐式创建
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_path = match path.strip_prefix(&self.local_root) {
                Ok(rel) => to_rel_path(rel),
                Err(_) => {
                    warn!("路径不在同步根目录下，跳过: {}", path.display());
                    continue;
                }
            };
            report.files_scanned += 1;

            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // 列出后被删除的单个文件只跳过，继续遍历其余文件
                    warn!("文件已不存在，跳过: {}", path.display());
                    continue;
                }
                Err(source) => {
                    return Err(SyncError::LocalMetadata {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            };
            let local_time: DateTime<Utc> = metadata
                .modified()
                .map_err(|source| SyncError::LocalMetadata {
                    path: path.to_path_buf(),
                    source,
                })?
                .into();

            // 查询失败按远端不存在处理，宁可重复上传也不漏传
            let remote_time = match backend.remote_mod_time(&rel_path).await {
                Ok(time) => time,
                Err(e) => {
                    debug!("获取远端时间失败，按不存在处理: {} - {:#}", rel_path, e);
                    None
                }
            };

            if !is_newer(local_time, remote_time) {
                debug!("远端已是最新，跳过: {}", rel_path);
                report.files_skipped += 1;
                continue;
            }

            self.upload(backend, path, &rel_path).await?;
            report.files_uploaded += 1;
            report.bytes_uploaded += metadata.len();
        }

        Ok(report)
    }

    async fn upload(
        &mut self,
        backend: &dyn Backend,
        local_path: &Path,
        rel_path: &str,
    ) -> Result<(), SyncError> {
        writeln!(self.progress, "uploaded: {}", rel_path).map_err(SyncError::Output)?;
        self.progress.flush().map_err(SyncError::Output)?;

        backend
            .upload(local_path, rel_path)
            .await
            .map_err(|e| SyncError::upload(local_path, rel_path, e))
    }
}

fn is_not_found(err: Option<&io::Error>) -> bool {
    err.map(|e| e.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RemoteTime;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 记录调用的后端，远端始终为空
    #[derive(Default)]
    struct RecordingBackend {
        lookups: Mutex<Vec<String>>,
        uploads: Mutex<Vec<String>>,
        closes: usize,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn remote_mod_time(&self, rel_path: &str) -> anyhow::Result<RemoteTime> {
            self.lookups.lock().unwrap().push(rel_path.to_string());
            anyhow::bail!("listing failed")
        }

        async fn upload(&self, _local_path: &Path, rel_path: &str) -> anyhow::Result<()> {
            self.uploads.lock().unwrap().push(rel_path.to_string());
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.closes += 1;
            anyhow::bail!("close failed")
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_means_upload() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("n.txt"), b"n").unwrap();
        std::fs::write(tmp.path().join("top.txt"), b"top").unwrap();

        let mut backend = RecordingBackend::default();
        let mut engine = SyncEngine::new(tmp.path(), Vec::new());
        let report = engine.run(&mut backend).await.unwrap();

        assert_eq!(
            *backend.lookups.lock().unwrap(),
            vec!["nested/n.txt".to_string(), "top.txt".to_string()]
        );
        assert_eq!(*backend.uploads.lock().unwrap(), *backend.lookups.lock().unwrap());
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.bytes_uploaded, 4);
        // 关闭失败不影响结果
        assert_eq!(backend.closes, 1);
    }

    #[tokio::test]
    async fn test_vanished_root_is_not_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::default();
        let mut engine = SyncEngine::new(tmp.path().join("gone"), Vec::new());

        let report = engine.run(&mut backend).await.unwrap();
        assert_eq!(report.files_scanned, 0);
        assert_eq!(backend.closes, 1);
        assert_eq!(
            String::from_utf8(engine.into_progress()).unwrap(),
            "sync complete\n"
        );
    }

    #[test]
    fn test_is_not_found() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert!(is_not_found(Some(&err)));
        assert!(!is_not_found(Some(&io::Error::from(io::ErrorKind::PermissionDenied))));
        assert!(!is_not_found(None));
    }

    /// 查询第一个文件时删除指定的本地文件
    struct DeletingBackend {
        victim: PathBuf,
        lookups: Mutex<Vec<String>>,
        closes: usize,
    }

    #[async_trait]
    impl Backend for DeletingBackend {
        async fn remote_mod_time(&self, rel_path: &str) -> anyhow::Result<RemoteTime> {
            let mut lookups = self.lookups.lock().unwrap();
            if lookups.is_empty() {
                std::fs::remove_file(&self.victim)?;
            }
            lookups.push(rel_path.to_string());
            Ok(None)
        }

        async fn upload(&self, _local_path: &Path, _rel_path: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.closes += 1;
            Ok(())
        }

        fn name(&self) -> &str {
            "deleting"
        }
    }

    #[tokio::test]
    async fn test_vanished_file_is_skipped_and_walk_continues() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(tmp.path().join(name), name).unwrap();
        }

        let mut backend = DeletingBackend {
            victim: tmp.path().join("b.txt"),
            lookups: Mutex::new(Vec::new()),
            closes: 0,
        };
        let mut engine = SyncEngine::new(tmp.path(), Vec::new());
        let report = engine.run(&mut backend).await.unwrap();

        assert_eq!(*backend.lookups.lock().unwrap(), vec!["a.txt", "c.txt"]);
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(
            String::from_utf8(engine.into_progress()).unwrap(),
            "uploaded: a.txt\nuploaded: c.txt\nsync complete\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_directory_is_fatal_and_still_closes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let locked = tmp.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("inner.txt"), b"x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // 以 root 运行时权限不生效，跳过
        if std::fs::read_dir(&locked).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let mut backend = RecordingBackend::default();
        let mut engine = SyncEngine::new(tmp.path(), Vec::new());
        let result = engine.run(&mut backend).await;

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(SyncError::Walk(_))));
        assert_eq!(backend.closes, 1);
        assert!(!String::from_utf8(engine.into_progress())
            .unwrap()
            .contains(COMPLETE_MARKER));
    }
}
