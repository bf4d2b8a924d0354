use clap::Parser;
use datasync_lib::config::DEFAULT_CONFIG_FILE;
use datasync_lib::logging::{LogConfig, SizeRotatingWriter};
use datasync_lib::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// Mirror a local directory to an FTP server or SMB share, uploading only
/// files newer than their remote copy.
#[derive(Parser)]
#[command(name = "datasync", version, about, long_about = None)]
struct Cli {
    /// Path to the JSON config document
    #[arg(short = 'c', long = "conf", default_value = DEFAULT_CONFIG_FILE)]
    conf: PathBuf,

    /// Log at debug level regardless of the config
    #[arg(short, long)]
    verbose: bool,
}

/// 初始化日志系统，返回的 guard 需持有到进程结束
fn init_logging(config: &LogConfig, verbose: bool) -> Option<WorkerGuard> {
    if !config.enabled && !verbose {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("opendal=warn".parse().expect("static directive"))
        .add_directive("suppaftp=warn".parse().expect("static directive"));

    // 进度行占用 stdout，日志只写 stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let mut guard = None;
    let file_layer = config.file.as_ref().and_then(|path| {
        match SizeRotatingWriter::new(path, config.max_size_mb) {
            Ok(writer) => {
                let (writer, g) = tracing_appender::non_blocking(writer);
                guard = Some(g);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            Err(e) => {
                // 文件日志创建失败，只输出到控制台
                eprintln!("cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&LogConfig::load(&cli.conf), cli.verbose);

    let result = match AppConfig::load(&cli.conf) {
        Ok(config) => datasync_lib::run(&config, std::io::stdout()).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("同步失败: {}", e);
            eprintln!("error: {:#}", anyhow::Error::from(e));
            ExitCode::FAILURE
        }
    }
}
