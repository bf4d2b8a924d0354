pub mod ftp;
pub mod smb;

use crate::config::{AppConfig, Transport};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

pub use ftp::FtpBackend;
pub use smb::SmbBackend;

/// 远端修改时间；`None` 表示远端文件不存在或无法获取
pub type RemoteTime = Option<DateTime<Utc>>;

/// 远端后端抽象接口
///
/// 连接在构造时建立（各实现的 `connect`），一次运行只持有一个后端实例，
/// 运行结束时由同步引擎调用且仅调用一次 [`Backend::close`]。
#[async_trait]
pub trait Backend: Send + Sync {
    /// 获取远端文件的修改时间，文件不存在时返回 `Ok(None)`
    async fn remote_mod_time(&self, rel_path: &str) -> Result<RemoteTime>;

    /// 上传本地文件到远端相对路径，自动创建所需的父目录
    async fn upload(&self, local_path: &Path, rel_path: &str) -> Result<()>;

    /// 释放会话资源，重复调用无副作用
    async fn close(&mut self) -> Result<()>;

    /// 获取后端名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置连接后端
pub async fn create_backend(config: &AppConfig) -> Result<Box<dyn Backend>> {
    match &config.transport {
        Transport::Ftp(ftp) => {
            tracing::info!("连接 FTP: host={}, user={}", ftp.host, ftp.user);
            Ok(Box::new(FtpBackend::connect(ftp).await?) as Box<dyn Backend>)
        }
        Transport::Smb(smb) => {
            tracing::info!(
                "挂载 SMB 共享: host={}, share={}, mount_point={}",
                smb.host,
                smb.share,
                smb.mount_point
            );
            Ok(Box::new(SmbBackend::connect(smb).await?) as Box<dyn Backend>)
        }
    }
}

/// 规范化路径分隔符（统一使用 /）
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// 将本地相对路径转换为后端使用的 `/` 分隔形式
pub fn to_rel_path(path: &Path) -> String {
    let joined = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    normalize_path(&joined)
}

/// 拼接远端基础路径与相对路径，结果不含首尾 `/`
///
/// 拒绝空路径和包含 `..` 的路径，避免写到基础路径之外。
pub fn join_remote(base: &str, rel_path: &str) -> Result<String> {
    let rel = normalize_path(rel_path);
    let rel_segments: Vec<&str> = rel
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if rel_segments.is_empty() {
        bail!("empty relative path {:?}", rel_path);
    }
    if rel_segments.iter().any(|s| *s == "..") {
        bail!("relative path {:?} escapes the remote base", rel_path);
    }

    let base = normalize_path(base);
    let segments: Vec<&str> = base
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .chain(rel_segments)
        .collect();

    Ok(segments.join("/"))
}

/// 拆分为 (父目录, 文件名)，父目录为空表示位于根下
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}
