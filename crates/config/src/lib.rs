//! 统一配置中心
//!
//! 客户端的全部配置：
//! - REST / WebSocket 服务地址
//! - 登录身份与令牌
//! - 传输通道（重连、订阅主题）
//! - 历史分页、提醒、已读回执重试
//!
//! 加载顺序：默认值 → `MOONCHAT_CONFIG_FILE` 指定的文件 → `MOONCHAT_*` 环境变量。

use std::fmt;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

pub const ENV_PREFIX: &str = "MOONCHAT_";
pub const CONFIG_FILE_ENV: &str = "MOONCHAT_CONFIG_FILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置加载失败: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("配置校验失败: {0}")]
    Validation(#[from] ValidationErrors),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}

/// 令牌，`Debug` 输出时隐藏
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential([REDACTED])")
        }
    }
}

fn validate_credential(credential: &Credential) -> Result<(), ValidationError> {
    if credential.is_empty() {
        return Err(ValidationError::new("empty_credential"));
    }
    Ok(())
}

fn validate_destination(value: &str) -> Result<(), ValidationError> {
    if !value.starts_with('/') {
        return Err(ValidationError::new("destination_must_start_with_slash"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(url)]
    pub base_url: String,
    #[validate(custom(function = "validate_destination"))]
    pub ws_path: String,
    #[validate(range(min = 100))]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct IdentityConfig {
    #[validate(range(min = 1))]
    pub subject_id: i64,
    #[validate(custom(function = "validate_credential"))]
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TransportConfig {
    #[validate(range(min = 1))]
    pub reconnect_delay_ms: u64,
    #[validate(custom(function = "validate_destination"))]
    pub personal_topic: String,
    #[validate(custom(function = "validate_destination"))]
    pub notice_topic: String,
    #[validate(custom(function = "validate_destination"))]
    pub send_destination: String,
    #[validate(range(min = 1, max = 65536))]
    pub event_buffer: usize,
    /// STOMP CONNECT 帧携带的 Bearer 值；未设置时使用 `identity.subject_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_bearer: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct HistoryConfig {
    #[validate(range(min = 1, max = 200))]
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NotificationConfig {
    #[validate(length(min = 1))]
    pub base_title: String,
    #[validate(range(min = 50))]
    pub flash_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ReceiptConfig {
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ClientConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub identity: IdentityConfig,
    #[validate(nested)]
    pub transport: TransportConfig,
    #[validate(nested)]
    pub history: HistoryConfig,
    #[validate(nested)]
    pub notification: NotificationConfig,
    #[validate(nested)]
    pub receipts: ReceiptConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://127.0.0.1:8080".into(),
                ws_path: "/ws".into(),
                request_timeout_ms: 10_000,
            },
            identity: IdentityConfig {
                subject_id: 0,
                credential: Credential::default(),
            },
            transport: TransportConfig {
                reconnect_delay_ms: 5_000,
                personal_topic: "/user/queue/chat".into(),
                notice_topic: "/topic/notice".into(),
                send_destination: "/app/send".into(),
                event_buffer: 256,
                connect_bearer: None,
            },
            history: HistoryConfig { page_size: 50 },
            notification: NotificationConfig {
                base_title: "MoonChat".into(),
                flash_interval_ms: 500,
            },
            receipts: ReceiptConfig {
                max_attempts: 3,
                base_delay_ms: 200,
            },
        }
    }
}

impl ClientConfig {
    /// 默认值 → 可选配置文件（`MOONCHAT_CONFIG_FILE`）→ 环境变量（`MOONCHAT_*`，嵌套键用 `__` 分隔）
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(ClientConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["CONFIG_FILE"])
                .split("__"),
        );
        Self::extract(fig)
    }

    /// 从 TOML/YAML/JSON 字符串解析，未给出的键取默认值
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let fig = Figment::new().merge(Serialized::defaults(ClientConfig::default()));
        let trimmed = s.trim_start();
        let fig = if trimmed.starts_with('{') {
            fig.merge(Json::string(s))
        } else if trimmed.starts_with('[') || s.contains('=') {
            fig.merge(Toml::string(s))
        } else {
            fig.merge(Yaml::string(s))
        };
        Self::extract(fig)
    }

    fn extract(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: ClientConfig = fig.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// WebSocket 地址：`http`→`ws`，`https`→`wss`，再拼上 `ws_path`
    pub fn websocket_endpoint(&self) -> String {
        let base = self.server.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}{}", self.server.ws_path)
    }

    /// STOMP CONNECT 使用的 Bearer 值
    pub fn connect_bearer(&self) -> String {
        match &self.transport.connect_bearer {
            Some(bearer) if !bearer.is_empty() => bearer.expose().to_string(),
            _ => self.identity.subject_id.to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.transport.reconnect_delay_ms)
    }

    pub fn flash_interval(&self) -> Duration {
        Duration::from_millis(self.notification.flash_interval_ms)
    }

    pub fn receipt_base_delay(&self) -> Duration {
        Duration::from_millis(self.receipts.base_delay_ms)
    }

    /// 日志安全的表示，令牌被隐藏
    pub fn sanitize(&self) -> String {
        format!("{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_need_an_identity() {
        let err = ClientConfig::default().validate().unwrap_err();
        let fields = err.errors();
        assert!(fields.contains_key("identity"));
        assert!(!fields.contains_key("server"));
    }

    #[test]
    fn loads_file_then_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "moonchat.toml",
                r#"
                [server]
                base_url = "https://chat.example.com/"

                [identity]
                subject_id = 42
                credential = "file-token"

                [history]
                page_size = 20
                "#,
            )?;
            jail.set_env("MOONCHAT_CONFIG_FILE", "moonchat.toml");
            jail.set_env("MOONCHAT_IDENTITY__CREDENTIAL", "env-token");
            jail.set_env("MOONCHAT_TRANSPORT__RECONNECT_DELAY_MS", "250");

            let cfg = ClientConfig::load().expect("config should load");
            assert_eq!(cfg.identity.subject_id, 42);
            assert_eq!(cfg.identity.credential.expose(), "env-token");
            assert_eq!(cfg.history.page_size, 20);
            assert_eq!(cfg.reconnect_delay(), Duration::from_millis(250));
            assert_eq!(cfg.transport.personal_topic, "/user/queue/chat");
            assert_eq!(cfg.websocket_endpoint(), "wss://chat.example.com/ws");
            Ok(())
        });
    }

    #[test]
    fn yaml_file_is_supported() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "moonchat.yaml",
                "identity:\n  subject_id: 7\n  credential: abc\nnotification:\n  base_title: Chat\n",
            )?;
            jail.set_env("MOONCHAT_CONFIG_FILE", "moonchat.yaml");

            let cfg = ClientConfig::load().expect("config should load");
            assert_eq!(cfg.notification.base_title, "Chat");
            assert_eq!(cfg.notification.flash_interval_ms, 500);
            Ok(())
        });
    }

    #[test]
    fn out_of_range_page_size_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("MOONCHAT_IDENTITY__SUBJECT_ID", "7");
            jail.set_env("MOONCHAT_IDENTITY__CREDENTIAL", "abc");
            jail.set_env("MOONCHAT_HISTORY__PAGE_SIZE", "500");

            assert!(matches!(
                ClientConfig::load(),
                Err(ConfigError::Validation(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn from_str_detects_format() {
        let json = ClientConfig::from_str(r#"{"identity": {"subject_id": 3, "credential": "t"}}"#)
            .unwrap();
        assert_eq!(json.identity.subject_id, 3);

        let toml = ClientConfig::from_str("[identity]\nsubject_id = 4\ncredential = \"t\"\n").unwrap();
        assert_eq!(toml.identity.subject_id, 4);

        let yaml = ClientConfig::from_str("identity:\n  subject_id: 5\n  credential: t\n").unwrap();
        assert_eq!(yaml.identity.subject_id, 5);
    }

    #[test]
    fn sanitize_hides_tokens() {
        let mut cfg = ClientConfig::from_str(
            r#"{"identity": {"subject_id": 3, "credential": "super-secret"}}"#,
        )
        .unwrap();
        cfg.transport.connect_bearer = Some(Credential::new("also-secret"));

        let text = cfg.sanitize();
        assert!(!text.contains("super-secret"));
        assert!(!text.contains("also-secret"));
        assert!(text.contains("[REDACTED]"));
        assert_eq!(cfg.connect_bearer(), "also-secret");
    }

    #[test]
    fn connect_bearer_defaults_to_subject_id() {
        let cfg = ClientConfig::from_str(r#"{"identity": {"subject_id": 9, "credential": "t"}}"#)
            .unwrap();
        assert_eq!(cfg.connect_bearer(), "9");
        assert_eq!(cfg.websocket_endpoint(), "ws://127.0.0.1:8080/ws");
    }
}
