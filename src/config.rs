//! 同步配置模块

use crate::error::SyncError;
use crate::logging::LogConfig;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "dataxfer.conf";

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ftp,
    Smb,
}

impl FromStr for TransportKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ftp" => Ok(TransportKind::Ftp),
            "smb" => Ok(TransportKind::Smb),
            _ => Err(SyncError::Config(format!(
                "unknown type: {:?} (use 'ftp' or 'smb')",
                s
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ftp => write!(f, "ftp"),
            TransportKind::Smb => write!(f, "smb"),
        }
    }
}

/// FTP 连接参数
#[derive(Clone, Default, Deserialize)]
pub struct FtpConfig {
    #[serde(default, alias = "Host")]
    pub host: String,
    #[serde(default, alias = "User")]
    pub user: String,
    #[serde(default, alias = "Pass")]
    pub pass: String,
    #[serde(default, alias = "RemotePath", alias = "remotePath")]
    pub remote_path: String,
}

impl fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("pass", &"***")
            .field("remote_path", &self.remote_path)
            .finish()
    }
}

/// SMB 共享参数
#[derive(Clone, Default, Deserialize)]
pub struct SmbConfig {
    #[serde(default, alias = "Host")]
    pub host: String,
    #[serde(default, alias = "User")]
    pub user: String,
    #[serde(default, alias = "Pass")]
    pub pass: String,
    #[serde(default, alias = "Share")]
    pub share: String,
    #[serde(default, alias = "RemotePath", alias = "remotePath")]
    pub remote_path: String,
    /// 挂载点：Windows 下为盘符，其他系统为目录
    #[serde(default = "default_mount_point", alias = "MountPoint", alias = "mountPoint")]
    pub mount_point: String,
}

fn default_mount_point() -> String {
    if cfg!(windows) {
        "Z:".to_string()
    } else {
        "/mnt/datasync".to_string()
    }
}

impl fmt::Debug for SmbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("pass", &"***")
            .field("share", &self.share)
            .field("remote_path", &self.remote_path)
            .field("mount_point", &self.mount_point)
            .finish()
    }
}

/// 选定的传输及其参数，整个运行期间不变
#[derive(Debug, Clone)]
pub enum Transport {
    Ftp(FtpConfig),
    Smb(SmbConfig),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Ftp(_) => TransportKind::Ftp,
            Transport::Smb(_) => TransportKind::Smb,
        }
    }
}

/// 配置文件原始结构
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default, alias = "LocalDir", alias = "localDir")]
    local_dir: String,
    #[serde(default, rename = "type", alias = "Type")]
    typ: String,
    #[serde(default, alias = "FTP")]
    ftp: Option<FtpConfig>,
    #[serde(default, alias = "SMB")]
    smb: Option<SmbConfig>,
    #[serde(default)]
    log: LogConfig,
}

/// 解析并校验后的配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub local_dir: PathBuf,
    pub transport: Transport,
    pub log: LogConfig,
}

impl AppConfig {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            serde_json::from_str(&content).map_err(|source| SyncError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::resolve(file)?;
        tracing::debug!("已加载配置: {:?}", config);
        Ok(config)
    }

    /// 从 JSON 文本解析
    pub fn from_json(content: &str) -> Result<Self, SyncError> {
        let file: ConfigFile =
            serde_json::from_str(content).map_err(|source| SyncError::ConfigParse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        Self::resolve(file)
    }

    fn resolve(file: ConfigFile) -> Result<Self, SyncError> {
        if file.local_dir.trim().is_empty() {
            return Err(SyncError::Config("local_dir is required".to_string()));
        }
        let local_dir = PathBuf::from(&file.local_dir);
        if !local_dir.is_dir() {
            return Err(SyncError::Config(format!(
                "local_dir {} is not an existing directory",
                local_dir.display()
            )));
        }

        let transport = match file.typ.parse::<TransportKind>()? {
            TransportKind::Ftp => {
                let ftp = file
                    .ftp
                    .ok_or_else(|| SyncError::Config("type is ftp but ftp section is missing".to_string()))?;
                if ftp.host.trim().is_empty() {
                    return Err(SyncError::Config("ftp.host is required".to_string()));
                }
                Transport::Ftp(ftp)
            }
            TransportKind::Smb => {
                let smb = file
                    .smb
                    .ok_or_else(|| SyncError::Config("type is smb but smb section is missing".to_string()))?;
                if smb.host.trim().is_empty() {
                    return Err(SyncError::Config("smb.host is required".to_string()));
                }
                if smb.share.trim().is_empty() {
                    return Err(SyncError::Config("smb.share is required".to_string()));
                }
                Transport::Smb(smb)
            }
        };

        Ok(Self {
            local_dir,
            transport,
            log: file.log,
        })
    }
}
