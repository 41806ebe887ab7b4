//! 日志初始化：标准输出，配置了 `LOG_DIR` 时另写按天滚动的文件

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "shuati-sync.log";

/// 只给出全局级别时追加的指令，压低连接池与 HTTP 底层的日志
const QUIET_DEPENDENCIES: [&str; 2] = ["sqlx=warn", "hyper=warn"];

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// `RUST_LOG` 形式的过滤串；已经按模块指定时原样使用
pub fn filter_directives(log_level: &str) -> String {
    let level = log_level.trim();
    let level = if level.is_empty() { "info" } else { level };
    if level.contains('=') {
        return level.to_string();
    }
    std::iter::once(level)
        .chain(QUIET_DEPENDENCIES)
        .collect::<Vec<_>>()
        .join(",")
}

/// 初始化日志；返回的 guard 必须存活到进程结束
pub fn init_tracing(config: &Config) -> Option<FileLogGuard> {
    let directives = filter_directives(&config.log_level);
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    let file = config.log_dir.as_deref().and_then(file_writer);
    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
                .init();
            Some(FileLogGuard { _guard: guard })
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}

fn file_writer(dir: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}
