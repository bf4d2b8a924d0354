use super::{join_remote, Backend, RemoteTime};
use crate::config::SmbConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

/// 临时文件后缀，写完后重命名为目标文件
pub const TEMP_SUFFIX: &str = ".tmp";

/// 当前持有的挂载
#[derive(Debug)]
struct Mount {
    target: String,
    unc: String,
}

/// SMB 后端
///
/// 通过系统命令把共享挂载到本地（Windows 为 `net use`，其他系统为
/// `mount -t cifs`），之后按普通文件系统读写。上传先写临时文件再重命名，
/// 读取方不会看到写了一半的目标文件。
pub struct SmbBackend {
    root: PathBuf,
    base_path: String,
    mount: Option<Mount>,
    name: String,
}

impl SmbBackend {
    /// 挂载共享（非持久），失败时错误中带上命令输出
    pub async fn connect(config: &SmbConfig) -> Result<Self> {
        // 共享按名称访问，忽略端口
        let host = config.host.split(':').next().unwrap_or_default();
        let unc = if cfg!(windows) {
            format!(r"\\{}\{}", host, config.share)
        } else {
            format!("//{}/{}", host, config.share)
        };
        let target = config.mount_point.clone();

        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("net");
            cmd.arg("use")
                .arg(&target)
                .arg(&unc)
                .arg(&config.pass)
                .arg(format!("/user:{}", config.user))
                .arg("/persistent:no");
            cmd
        } else {
            fs::create_dir_all(&target)
                .await
                .with_context(|| format!("create mount point {}", target))?;
            let mut cmd = Command::new("mount");
            cmd.args(["-t", "cifs"])
                .arg(&unc)
                .arg(&target)
                .arg("-o")
                .arg(format!("username={},password={}", config.user, config.pass));
            cmd
        };

        let output = cmd
            .output()
            .await
            .with_context(|| format!("run mount command for {}", unc))?;
        if !output.status.success() {
            bail!(
                "mount {} on {} failed ({}): {}{}",
                unc,
                target,
                output.status,
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!("已挂载 {} -> {}", unc, target);

        let root = if cfg!(windows) && target.ends_with(':') {
            PathBuf::from(format!(r"{}\", target))
        } else {
            PathBuf::from(&target)
        };

        let mut backend = Self::with_mounted_root(root, &config.remote_path);
        backend.name = format!("smb:{}", unc);
        backend.mount = Some(Mount { target, unc });
        Ok(backend)
    }

    /// 使用已可访问的目录作为共享根（不执行挂载，关闭时也不卸载）
    pub fn with_mounted_root(root: impl Into<PathBuf>, base_path: &str) -> Self {
        let root = root.into();
        let name = format!("smb:{}", root.display());
        Self {
            root,
            base_path: base_path.to_string(),
            mount: None,
            name,
        }
    }

    /// 相对路径映射到挂载后的本地路径
    fn resolve_path(&self, rel_path: &str) -> Result<PathBuf> {
        let remote = join_remote(&self.base_path, rel_path)?;
        Ok(remote
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

/// 目标文件同目录下的临时文件路径
pub fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(TEMP_SUFFIX);
    dest.with_file_name(name)
}

#[async_trait]
impl Backend for SmbBackend {
    async fn remote_mod_time(&self, rel_path: &str) -> Result<RemoteTime> {
        let full_path = self.resolve_path(rel_path)?;

        match fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_dir() => Ok(None),
            Ok(metadata) => Ok(Some(metadata.modified()?.into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, local_path: &Path, rel_path: &str) -> Result<()> {
        let dest = self.resolve_path(rel_path)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }

        let mut src = fs::File::open(local_path)
            .await
            .with_context(|| format!("open {}", local_path.display()))?;

        // 使用临时文件写入，然后原子重命名
        let tmp = temp_path(&dest);
        let mut out = fs::File::create(&tmp)
            .await
            .with_context(|| format!("create {}", tmp.display()))?;
        tokio::io::copy(&mut src, &mut out)
            .await
            .with_context(|| format!("copy {} to {}", local_path.display(), tmp.display()))?;
        out.sync_all()
            .await
            .with_context(|| format!("flush {}", tmp.display()))?;
        drop(out);

        fs::rename(&tmp, &dest)
            .await
            .with_context(|| format!("rename {} to {}", tmp.display(), dest.display()))?;

        debug!("已上传: {} -> {}", local_path.display(), dest.display());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mount) = self.mount.take() else {
            return Ok(());
        };

        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("net");
            cmd.arg("use").arg(&mount.target).args(["/delete", "/y"]);
            cmd
        } else {
            let mut cmd = Command::new("umount");
            cmd.arg(&mount.target);
            cmd
        };

        let output = cmd
            .output()
            .await
            .with_context(|| format!("run unmount command for {}", mount.target))?;
        if !output.status.success() {
            bail!(
                "unmount {} failed ({}): {}",
                mount.target,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!("已卸载 {} ({})", mount.target, mount.unc);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[tokio::test]
    async fn test_upload_creates_chain_and_leaves_no_temp() {
        let local = tempfile::tempdir().unwrap();
        let share = tempfile::tempdir().unwrap();
        let src = local.path().join("c.txt");
        std::fs::write(&src, b"hello").unwrap();

        let backend = SmbBackend::with_mounted_root(share.path(), "daily");
        backend.upload(&src, "sub/deeper/c.txt").await.unwrap();

        let dest = share.path().join("daily").join("sub").join("deeper").join("c.txt");
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!temp_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_existing_destination() {
        let local = tempfile::tempdir().unwrap();
        let share = tempfile::tempdir().unwrap();
        // 目录可以打开但读取会失败，模拟写到一半出错
        let unreadable = local.path().join("not_a_file");
        std::fs::create_dir(&unreadable).unwrap();

        let dest = share.path().join("a.txt");
        std::fs::write(&dest, b"previous").unwrap();

        let backend = SmbBackend::with_mounted_root(share.path(), "");
        assert!(backend.upload(&unreadable, "a.txt").await.is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_destination_absent() {
        let local = tempfile::tempdir().unwrap();
        let share = tempfile::tempdir().unwrap();
        let unreadable = local.path().join("not_a_file");
        std::fs::create_dir(&unreadable).unwrap();

        let backend = SmbBackend::with_mounted_root(share.path(), "");
        assert!(backend.upload(&unreadable, "new/b.txt").await.is_err());
        assert!(!share.path().join("new").join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_remote_mod_time() {
        let share = tempfile::tempdir().unwrap();
        let path = share.path().join("x.bin");
        std::fs::write(&path, b"x").unwrap();
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let backend = SmbBackend::with_mounted_root(share.path(), "");
        let found = backend.remote_mod_time("x.bin").await.unwrap().unwrap();
        assert_eq!(found.timestamp(), 1_700_000_000);
        assert_eq!(backend.remote_mod_time("missing.bin").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_without_mount_is_noop() {
        let share = tempfile::tempdir().unwrap();
        let mut backend = SmbBackend::with_mounted_root(share.path(), "");
        backend.close().await.unwrap();
        backend.close().await.unwrap();
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        let dest = Path::new("share").join("report.csv");
        assert_eq!(temp_path(&dest), Path::new("share").join("report.csv.tmp"));
    }
}
