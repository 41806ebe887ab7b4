//! 云端备份
//!
//! 把完整备份上传到同步服务器，或从服务器下载最近一次备份并导入。
//! 服务器地址与 API 密钥保存在设置中（`cloudSyncUploadUrl` / `cloudSyncApiKey`）。

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::archive::{self, CompleteImportReport, ExportOptions};
use crate::registry::BankRegistry;
use crate::settings::{SettingsRepository, CLOUD_SYNC_API_KEY, CLOUD_SYNC_URL_KEY};
use crate::{Storage, StorageError, StorageResult};

const UPLOAD_PATH: &str = "/api/sync/upload";
const DOWNLOAD_PATH: &str = "/api/sync/download";

/// 云同步配置
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSyncConfig {
    /// 服务器根地址（不含路径）
    pub base_url: String,
    pub api_key: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl CloudSyncConfig {
    /// 校验并创建配置
    ///
    /// 地址必须以 http 开头；填写完整上传地址时自动去掉 `/api/sync/upload` 后缀。
    pub fn new(url: &str, api_key: &str) -> StorageResult<Self> {
        let url = url.trim();
        let api_key = api_key.trim();
        if url.is_empty() || api_key.is_empty() {
            return Err(StorageError::InvalidCredential(
                "请填写服务器地址和 API 密钥".to_string(),
            ));
        }
        if !url.starts_with("http") {
            return Err(StorageError::InvalidCredential(
                "服务器地址必须以 http 开头".to_string(),
            ));
        }

        let base = url.trim_end_matches('/');
        let base = base.strip_suffix(UPLOAD_PATH).unwrap_or(base);

        Ok(Self {
            base_url: base.to_string(),
            api_key: api_key.to_string(),
            timeout_secs: 120,
        })
    }

    /// 从设置读取，未配置时返回 None
    pub fn from_settings(settings: &SettingsRepository) -> StorageResult<Option<Self>> {
        let url: String = settings.get_or(CLOUD_SYNC_URL_KEY, String::new())?;
        let key: String = settings.get_or(CLOUD_SYNC_API_KEY, String::new())?;
        if url.trim().is_empty() || key.trim().is_empty() {
            return Ok(None);
        }
        Self::new(&url, &key).map(Some)
    }

    /// 保存到设置
    pub fn save(&self, settings: &SettingsRepository) -> StorageResult<()> {
        settings.set(CLOUD_SYNC_URL_KEY, &self.base_url)?;
        settings.set(CLOUD_SYNC_API_KEY, &self.api_key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// 服务器的统一响应格式
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl Envelope {
    fn into_error(self) -> StorageError {
        match self.error_code.as_deref() {
            Some("INVALID_API_KEY") | Some("INACTIVE_API_KEY") | Some("UNAUTHORIZED") => {
                StorageError::InvalidCredential(self.message)
            }
            Some("FILE_NOT_FOUND") => StorageError::NotFound(self.message),
            Some(code) => StorageError::Sync(format!("{} ({})", self.message, code)),
            None => StorageError::Sync(self.message),
        }
    }
}

/// 上传结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub message: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub timestamp: Option<String>,
}

/// 云同步客户端
pub struct CloudSyncClient {
    config: CloudSyncConfig,
    client: Client,
}

impl CloudSyncClient {
    pub fn new(config: CloudSyncConfig) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StorageError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &CloudSyncConfig {
        &self.config
    }

    /// 上传备份文件
    pub async fn upload(&self, bytes: Vec<u8>) -> StorageResult<UploadReceipt> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name("quiz_data.zip")
            .mime_str("application/zip")
            .map_err(|e| StorageError::Network(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.config.endpoint(UPLOAD_PATH))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        let envelope: Envelope = response.json().await.map_err(|e| {
            StorageError::Sync(format!("上传失败: HTTP {} ({})", status, e))
        })?;

        if !envelope.success {
            return Err(envelope.into_error());
        }

        log::info!("云端备份上传成功: {} 字节", size);
        Ok(UploadReceipt {
            message: envelope.message,
            filename: envelope.filename,
            size: envelope.size,
            timestamp: envelope.timestamp,
        })
    }

    /// 下载最近一次备份
    pub async fn download(&self) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get(self.config.endpoint(DOWNLOAD_PATH))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        // 服务器以 JSON 返回错误
        if is_json {
            let envelope: Envelope = response.json().await.map_err(|e| {
                StorageError::Sync(format!("下载失败: HTTP {} ({})", status, e))
            })?;
            return Err(envelope.into_error());
        }
        if !status.is_success() {
            return Err(StorageError::Sync(format!("下载失败: HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(StorageError::Sync("下载的文件为空".to_string()));
        }

        log::info!("云端备份下载成功: {} 字节", bytes.len());
        Ok(bytes.to_vec())
    }

    /// 导出完整备份并上传
    pub async fn push(&self, storage: &Storage) -> StorageResult<UploadReceipt> {
        let bytes = archive::export_complete(storage, ExportOptions::default())?;
        self.upload(bytes).await
    }

    /// 下载备份并导入（覆盖本地数据前调用 `confirm`）
    pub async fn pull<F>(
        &self,
        storage: &Storage,
        registry: &mut BankRegistry,
        confirm: F,
    ) -> StorageResult<CompleteImportReport>
    where
        F: FnOnce() -> bool,
    {
        let bytes = self.download().await?;
        archive::import_complete(storage, registry, &bytes, confirm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            CloudSyncConfig::new("", "key"),
            Err(StorageError::InvalidCredential(_))
        ));
        assert!(matches!(
            CloudSyncConfig::new("ftp://example.com", "key"),
            Err(StorageError::InvalidCredential(_))
        ));
        assert!(CloudSyncConfig::new("https://example.com", "key").is_ok());
    }

    #[test]
    fn test_config_strips_upload_path() {
        let config = CloudSyncConfig::new("https://sync.example.com/api/sync/upload/", "k").unwrap();
        assert_eq!(config.base_url, "https://sync.example.com");
        assert_eq!(
            config.endpoint(DOWNLOAD_PATH),
            "https://sync.example.com/api/sync/download"
        );
    }

    #[test]
    fn test_config_settings_round_trip() {
        let storage = Storage::in_memory().unwrap();
        let settings = storage.settings();
        assert_eq!(CloudSyncConfig::from_settings(&settings).unwrap(), None);

        let config = CloudSyncConfig::new("http://localhost:3000", "token-1").unwrap();
        config.save(&settings).unwrap();

        let loaded = CloudSyncConfig::from_settings(&settings).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_envelope_error_mapping() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"success":false,"message":"API密钥无效","error_code":"INVALID_API_KEY"}"#,
        )
        .unwrap();
        assert!(matches!(envelope.into_error(), StorageError::InvalidCredential(_)));

        let envelope: Envelope = serde_json::from_str(
            r#"{"success":false,"message":"没有找到","error_code":"FILE_NOT_FOUND"}"#,
        )
        .unwrap();
        assert!(matches!(envelope.into_error(), StorageError::NotFound(_)));
    }
}
