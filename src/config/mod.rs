//! 配置模块：各厂商凭据与端点的进程级配置，支持显式配置、环境变量回退与 YAML 文件加载。
//!
//! # Configuration
//!
//! Credentials and endpoints for every provider. Resolution order is
//! explicit adapter config > `configure_*` > environment variable > error.
//!
//! ```rust
//! use ai_batch::config::{configure_openai, current_settings, OpenAiConfig};
//!
//! configure_openai(OpenAiConfig::default().with_api_key("sk-example"));
//! assert_eq!(current_settings().openai.api_key.as_deref(), Some("sk-example"));
//! ```

pub mod providers;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::{Error, ErrorContext, Result};

pub use providers::{
    process_env, AnthropicConfig, AnthropicSettings, BedrockConfig, BedrockSettings,
    CloudflareConfig, CloudflareSettings, EnvLookup, GoogleConfig, GoogleSettings, OpenAiConfig,
    OpenAiSettings,
};

/// Settings for all providers, as loaded from a YAML file or built in code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterSettings {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub bedrock: BedrockConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
}

impl AdapterSettings {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid adapter settings: {}", e),
                ErrorContext::new().with_source("config"),
            )
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            Error::Configuration { message, context } => Error::Configuration {
                message,
                context: context.with_field_path(path.display().to_string()),
            },
            other => other,
        })
    }
}

static SETTINGS: Lazy<ArcSwap<AdapterSettings>> =
    Lazy::new(|| ArcSwap::from_pointee(AdapterSettings::default()));

/// Snapshot of the process-wide settings.
pub fn current_settings() -> Arc<AdapterSettings> {
    SETTINGS.load_full()
}

/// Replace every provider section at once.
pub fn load_settings(settings: AdapterSettings) {
    SETTINGS.store(Arc::new(settings));
}

fn update(f: impl Fn(&mut AdapterSettings)) {
    SETTINGS.rcu(|current| {
        let mut next = AdapterSettings::clone(current);
        f(&mut next);
        next
    });
}

pub fn configure_openai(config: OpenAiConfig) {
    update(|s| s.openai = config.clone());
}

pub fn configure_anthropic(config: AnthropicConfig) {
    update(|s| s.anthropic = config.clone());
}

pub fn configure_bedrock(config: BedrockConfig) {
    update(|s| s.bedrock = config.clone());
}

pub fn configure_google(config: GoogleConfig) {
    update(|s| s.google = config.clone());
}

pub fn configure_cloudflare(config: CloudflareConfig) {
    update(|s| s.cloudflare = config.clone());
}
