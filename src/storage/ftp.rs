use super::{join_remote, split_parent, Backend, RemoteTime};
use crate::config::FtpConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use opendal::{ErrorKind, Metakey, Operator};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use suppaftp::AsyncFtpStream;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 建立连接并登录的超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// FTP 后端
///
/// 登录会话由 suppaftp 直接持有，关闭时发送 QUIT；目录列表和文件传输
/// 走 opendal 的 FTP 服务。opendal 先写入 `<目标>.<uuid>` 再重命名，
/// 传输中途失败时目标文件不变，但会在同目录留下这个临时文件，不会清理。
pub struct FtpBackend {
    session: Mutex<Option<AsyncFtpStream>>,
    operator: Option<Operator>,
    base_path: String,
    name: String,
}

impl FtpBackend {
    /// 连接并登录，超时、拒绝连接或认证失败都直接返回错误
    pub async fn connect(config: &FtpConfig) -> Result<Self> {
        use opendal::services::Ftp;

        let address = ftp_address(&config.host);
        let session = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            open_session(&address, &config.user, &config.pass),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "FTP handshake with {} timed out after {}s",
                address,
                CONNECT_TIMEOUT_SECS
            )
        })??;
        info!("FTP 登录成功: {}@{}", config.user, address);

        let endpoint = format!("ftp://{}", address);
        let builder = Ftp::default()
            .endpoint(&endpoint)
            .user(&config.user)
            .password(&config.pass)
            .root("/");
        let operator = Operator::new(builder)?.finish();

        let mut backend = Self::with_operator(operator, &config.remote_path);
        backend.session = Mutex::new(Some(session));
        backend.name = format!("{}/{}", endpoint, backend.base_path);
        Ok(backend)
    }

    /// 使用已构建的 operator（测试中使用内存服务）
    pub fn with_operator(operator: Operator, base_path: &str) -> Self {
        let base_path = base_path.trim_matches(|c| c == '/' || c == '\\').replace('\\', "/");
        let name = format!("ftp:/{}", base_path);
        Self {
            session: Mutex::new(None),
            operator: Some(operator),
            base_path,
            name,
        }
    }

    fn operator(&self) -> Result<&Operator> {
        self.operator
            .as_ref()
            .ok_or_else(|| anyhow!("FTP session already closed"))
    }

    /// 逐级创建父目录，忽略创建失败（目录可能已存在）
    async fn create_parent_dirs(&self, remote: &str) -> Result<()> {
        let operator = self.operator()?;
        let (parent, _) = split_parent(remote);
        if parent.is_empty() {
            return Ok(());
        }

        let mut current = String::new();
        for segment in parent.split('/') {
            current.push_str(segment);
            current.push('/');
            if let Err(e) = operator.create_dir(&current).await {
                debug!("创建目录失败（可能已存在）: {} - {}", current, e);
            }
        }
        Ok(())
    }
}

/// 建立控制连接并登录，服务器的拒绝应答原样保留在错误中
async fn open_session(address: &str, user: &str, pass: &str) -> Result<AsyncFtpStream> {
    let addr: SocketAddr = tokio::net::lookup_host(address)
        .await
        .with_context(|| format!("resolve {}", address))?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no address", address))?;

    let mut session = AsyncFtpStream::connect_timeout(addr, Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .await
        .with_context(|| format!("connect to {}", address))?;
    session
        .login(user, pass)
        .await
        .with_context(|| format!("FTP login as {:?} rejected", user))?;
    Ok(session)
}

/// 去掉 `ftp://` 前缀并补全默认端口
fn ftp_address(host: &str) -> String {
    let host = host.trim();
    let rest = host.strip_prefix("ftp://").unwrap_or(host);
    let rest = rest.trim_end_matches('/');
    if rest.contains(':') {
        rest.to_string()
    } else {
        format!("{}:21", rest)
    }
}

/// opendal 中目录路径以 `/` 结尾，根目录为 `/`
fn dir_path(dir: &str) -> String {
    if dir.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", dir)
    }
}

#[async_trait]
impl Backend for FtpBackend {
    async fn remote_mod_time(&self, rel_path: &str) -> Result<RemoteTime> {
        let remote = join_remote(&self.base_path, rel_path)?;
        let (dir, file_name) = split_parent(&remote);

        // 列出所在目录，按文件名精确匹配
        let entries = match self
            .operator()?
            .list_with(&dir_path(dir))
            .metakey(Metakey::Mode | Metakey::LastModified)
            .await
        {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(entries
            .iter()
            .filter(|entry| !entry.metadata().is_dir())
            .find(|entry| entry.name() == file_name)
            .and_then(|entry| entry.metadata().last_modified()))
    }

    async fn upload(&self, local_path: &Path, rel_path: &str) -> Result<()> {
        let remote = join_remote(&self.base_path, rel_path)?;
        self.create_parent_dirs(&remote).await?;

        let file = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("open {}", local_path.display()))?;

        let mut writer = self.operator()?.writer(&remote).await?;
        let mut chunks = ReaderStream::new(file);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.with_context(|| format!("read {}", local_path.display()))?;
            writer.write(chunk).await?;
        }
        writer.close().await?;

        debug!("已上传: {} -> {}", local_path.display(), remote);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.get_mut().take() {
            match session.quit().await {
                Ok(()) => debug!("FTP 会话已退出: {}", self.name),
                Err(e) => warn!("FTP QUIT 失败（忽略）: {} - {}", self.name, e),
            }
        }
        // 丢弃 operator 即关闭 opendal 连接池
        self.operator.take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
