use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite://agentflow.db?mode=rwc";
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5123";
const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 5;
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";
const DEFAULT_LLM_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Credentials for the Azure OpenAI-compatible chat completions backend.
#[derive(Debug, Clone)]
pub struct AzureOpenAiSettings {
    pub api_key: String,
    pub endpoint: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: SocketAddr,
    pub max_concurrent_executions: usize,
    /// `None` puts the LLM gateway in mock mode.
    pub azure_openai: Option<AzureOpenAiSettings>,
    pub llm_timeout_seconds: u64,
    pub tool_sandbox_dir: PathBuf,
    pub admin_api_token: Option<String>,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let server_addr = parse_var("SERVER_ADDR", DEFAULT_SERVER_ADDR.parse().ok())?
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 5123)));

        let max_concurrent_executions = parse_var(
            "MAX_CONCURRENT_EXECUTIONS",
            Some(DEFAULT_MAX_CONCURRENT_EXECUTIONS),
        )?
        .unwrap_or(DEFAULT_MAX_CONCURRENT_EXECUTIONS)
        .max(1);

        let llm_timeout_seconds =
            parse_var("LLM_TIMEOUT_SECONDS", Some(DEFAULT_LLM_TIMEOUT_SECONDS))?
                .unwrap_or(DEFAULT_LLM_TIMEOUT_SECONDS);

        let azure_openai = azure_settings(
            env::var("AZURE_OPENAI_API_KEY").ok(),
            env::var("AZURE_OPENAI_ENDPOINT").ok(),
            env::var("AZURE_OPENAI_API_VERSION").ok(),
        );

        let tool_sandbox_dir = env::var("TOOL_SANDBOX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("agentflow_files"));

        let admin_api_token = env::var("ADMIN_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let log_json = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Config {
            database_url,
            server_addr,
            max_concurrent_executions,
            azure_openai,
            llm_timeout_seconds,
            tool_sandbox_dir,
            admin_api_token,
            log_json,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: Option<T>) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

/// Placeholder values shipped in sample `.env` files count as unset.
fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.starts_with("your_") || trimmed.starts_with("your-")
}

pub(crate) fn azure_settings(
    api_key: Option<String>,
    endpoint: Option<String>,
    api_version: Option<String>,
) -> Option<AzureOpenAiSettings> {
    let api_key = api_key.filter(|k| !is_placeholder(k))?;
    let endpoint = endpoint.filter(|e| !is_placeholder(e))?;
    Some(AzureOpenAiSettings {
        api_key,
        endpoint: endpoint.trim_end_matches('/').to_string(),
        api_version: api_version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
    })
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".into(),
        server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        max_concurrent_executions: 2,
        azure_openai: None,
        llm_timeout_seconds: 5,
        tool_sandbox_dir: env::temp_dir().join("agentflow_files_test"),
        admin_api_token: None,
        log_json: false,
    }
}
