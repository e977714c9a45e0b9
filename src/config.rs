//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TALLY__*` 覆盖
//! （双下划线表示嵌套，如 `TALLY__LLM__MODEL=gpt-4o-mini`）。
//!
//! 单写者约束落在配置结构上：只有 [store] 段携带数据库路径，
//! assistant 进程的配置里没有任何存储凭据，只有 writer 服务地址。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub writer: WriterSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段：服务名与 assistant 监听地址
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_assistant_bind")]
    pub assistant_bind: String,
}

fn default_assistant_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// [llm] 段：模型选择、超时与结构化输出重试预算
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点；未设置时走官方默认
    pub base_url: Option<String>,
    /// 未设置时回退到 OPENAI_API_KEY 环境变量
    pub api_key: Option<String>,
    /// 单次模型调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 输出不合合同时的重试次数（同一提示重发）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

/// [history] 段：会话本地对话历史的上限（条数 / 单条字符数）与闲置过期
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_entry_chars")]
    pub max_entry_chars: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_entry_chars: default_max_entry_chars(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_max_entries() -> usize {
    30
}

fn default_max_entry_chars() -> usize {
    2000
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

/// [writer] 段：写入方服务的地址与调用超时（assistant 侧视角）
#[derive(Debug, Clone, Deserialize)]
pub struct WriterSection {
    #[serde(default = "default_writer_base_url")]
    pub base_url: String,
    #[serde(default = "default_writer_timeout")]
    pub timeout_secs: u64,
    /// writer 自身的监听地址
    #[serde(default = "default_writer_bind")]
    pub bind: String,
}

impl Default for WriterSection {
    fn default() -> Self {
        Self {
            base_url: default_writer_base_url(),
            timeout_secs: default_writer_timeout(),
            bind: default_writer_bind(),
        }
    }
}

fn default_writer_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_writer_timeout() -> u64 {
    15
}

fn default_writer_bind() -> String {
    "127.0.0.1:8081".to_string()
}

/// [store] 段：数据库路径。仅 writer 进程读取此段。
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tally.db")
}

/// 从 config 目录加载配置，环境变量 TALLY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TALLY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TALLY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.max_retries, 2);
        assert_eq!(cfg.history.max_entries, 30);
        assert_eq!(cfg.history.max_entry_chars, 2000);
        assert_eq!(cfg.store.db_path, PathBuf::from("tally.db"));
    }
}
