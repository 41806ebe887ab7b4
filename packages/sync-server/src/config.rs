use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// 设置后额外写入按天滚动的日志文件
    pub log_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub ledger_db: PathBuf,
    /// 旧版 `uuid.csv` 台账，启动时导入一次
    pub legacy_ledger_csv: Option<PathBuf>,
    pub admin_key: Option<String>,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let data_dir = env_path("DATA_DIR").unwrap_or_else(|| PathBuf::from("./data"));
        let mut config = Self::with_data_dir(&data_dir);
        config.host = host;
        config.port = port;
        config.log_level = log_level;
        config.log_dir = env_path("LOG_DIR");

        if let Some(dir) = env_path("UPLOAD_DIR") {
            config.upload_dir = dir;
        }
        if let Some(path) = env_path("LEDGER_DB") {
            config.ledger_db = path;
        }
        config.legacy_ledger_csv = env_path("LEGACY_LEDGER_CSV");
        config.admin_key = std::env::var("ADMIN_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        config.max_upload_bytes = std::env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        config
    }

    /// 以数据目录为根的默认配置
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3000,
            log_level: "info".to_string(),
            log_dir: None,
            data_dir: data_dir.to_path_buf(),
            upload_dir: data_dir.join("uploads"),
            ledger_db: data_dir.join("ledger.db"),
            legacy_ledger_csv: None,
            admin_key: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_data_dir() {
        let config = Config::with_data_dir(Path::new("/srv/shuati"));
        assert_eq!(config.upload_dir, PathBuf::from("/srv/shuati/uploads"));
        assert_eq!(config.ledger_db, PathBuf::from("/srv/shuati/ledger.db"));
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert!(config.admin_key.is_none());
        assert!(config.log_dir.is_none());
        assert_eq!(config.bind_addr().port(), 3000);
    }
}
