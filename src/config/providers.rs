//! Per-provider configuration and credential resolution.
//!
//! Every `*Config` holds optional fields. Resolution merges an explicit
//! adapter config over the process-wide `configure_*` values, then falls back
//! to environment variables, and finally reports a configuration error naming
//! the variable that was expected.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const GOOGLE_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const CLOUDFLARE_GATEWAY_BASE_URL: &str = "https://gateway.ai.cloudflare.com/v1";
pub const AWS_DEFAULT_REGION: &str = "us-east-1";

/// Environment lookup used during resolution; tests substitute a closure.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads the process environment, treating empty values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn first_env(env: EnvLookup<'_>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(*k))
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

macro_rules! merge_fields {
    ($self:ident, $fallback:ident, $($field:ident),+) => {
        Self {
            $($field: $self.$field.or_else(|| $fallback.$field.clone()),)+
        }
    };
}

// ---------------------------------------------------------------- OpenAI

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn or(self, fallback: &Self) -> Self {
        merge_fields!(self, fallback, api_key, base_url)
    }

    pub fn resolve(&self, env: EnvLookup<'_>) -> Result<OpenAiSettings> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| env("OPENAI_API_KEY"))
            .ok_or_else(|| Error::missing_config("openai", "OPENAI_API_KEY"))?;
        let base_url = self
            .base_url
            .clone()
            .or_else(|| env("OPENAI_BASE_URL"))
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());
        Ok(OpenAiSettings {
            api_key,
            base_url: trim_base(base_url),
        })
    }
}

// ------------------------------------------------------------- Anthropic

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn or(self, fallback: &Self) -> Self {
        merge_fields!(self, fallback, api_key, base_url)
    }

    pub fn resolve(&self, env: EnvLookup<'_>) -> Result<AnthropicSettings> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| env("ANTHROPIC_API_KEY"))
            .ok_or_else(|| Error::missing_config("anthropic", "ANTHROPIC_API_KEY"))?;
        let base_url = self
            .base_url
            .clone()
            .or_else(|| env("ANTHROPIC_BASE_URL"))
            .unwrap_or_else(|| ANTHROPIC_DEFAULT_BASE_URL.to_string());
        Ok(AnthropicSettings {
            api_key,
            base_url: trim_base(base_url),
        })
    }
}

// ---------------------------------------------------------------- Google

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoogleSettings {
    pub api_key: String,
    pub base_url: String,
}

impl GoogleConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn or(self, fallback: &Self) -> Self {
        merge_fields!(self, fallback, api_key, base_url)
    }

    pub fn resolve(&self, env: EnvLookup<'_>) -> Result<GoogleSettings> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| first_env(env, &["GOOGLE_API_KEY", "GEMINI_API_KEY"]))
            .ok_or_else(|| Error::missing_config("google", "GOOGLE_API_KEY or GEMINI_API_KEY"))?;
        let base_url = self
            .base_url
            .clone()
            .unwrap_or_else(|| GOOGLE_DEFAULT_BASE_URL.to_string());
        Ok(GoogleSettings {
            api_key,
            base_url: trim_base(base_url),
        })
    }
}

// --------------------------------------------------------------- Bedrock

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BedrockConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Route runtime calls through an AI gateway; requests are still SigV4-signed.
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub gateway_token: Option<String>,
    /// S3 bucket for native batch inference input/output.
    #[serde(default)]
    pub batch_bucket: Option<String>,
    /// IAM role Bedrock assumes to read/write the batch bucket.
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Endpoint overrides (local stacks, VPC endpoints).
    #[serde(default)]
    pub runtime_url: Option<String>,
    #[serde(default)]
    pub control_url: Option<String>,
    #[serde(default)]
    pub s3_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BedrockSettings {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub gateway_url: Option<String>,
    pub gateway_token: Option<String>,
    pub batch_bucket: Option<String>,
    pub role_arn: Option<String>,
    pub runtime_url: String,
    pub control_url: String,
    pub s3_url: Option<String>,
}

impl BedrockConfig {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_batch_storage(mut self, bucket: impl Into<String>, role_arn: impl Into<String>) -> Self {
        self.batch_bucket = Some(bucket.into());
        self.role_arn = Some(role_arn.into());
        self
    }

    pub fn or(self, fallback: &Self) -> Self {
        merge_fields!(
            self,
            fallback,
            region,
            access_key_id,
            secret_access_key,
            session_token,
            gateway_url,
            gateway_token,
            batch_bucket,
            role_arn,
            runtime_url,
            control_url,
            s3_url
        )
    }

    pub fn resolve(&self, env: EnvLookup<'_>) -> Result<BedrockSettings> {
        let region = self
            .region
            .clone()
            .or_else(|| first_env(env, &["AWS_REGION", "AWS_DEFAULT_REGION"]))
            .unwrap_or_else(|| AWS_DEFAULT_REGION.to_string());
        let access_key_id = self
            .access_key_id
            .clone()
            .or_else(|| env("AWS_ACCESS_KEY_ID"))
            .ok_or_else(|| Error::missing_config("bedrock", "AWS_ACCESS_KEY_ID"))?;
        let secret_access_key = self
            .secret_access_key
            .clone()
            .or_else(|| env("AWS_SECRET_ACCESS_KEY"))
            .ok_or_else(|| Error::missing_config("bedrock", "AWS_SECRET_ACCESS_KEY"))?;
        let runtime_url = self
            .runtime_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", region));
        let control_url = self
            .control_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock.{}.amazonaws.com", region));

        Ok(BedrockSettings {
            session_token: self.session_token.clone().or_else(|| env("AWS_SESSION_TOKEN")),
            gateway_url: self.gateway_url.clone().or_else(|| env("AI_GATEWAY_URL")).map(trim_base),
            gateway_token: self.gateway_token.clone().or_else(|| env("AI_GATEWAY_TOKEN")),
            batch_bucket: self.batch_bucket.clone().or_else(|| env("AWS_BEDROCK_BATCH_BUCKET")),
            role_arn: self.role_arn.clone().or_else(|| env("AWS_BEDROCK_ROLE_ARN")),
            s3_url: self.s3_url.clone().map(trim_base),
            runtime_url: trim_base(runtime_url),
            control_url: trim_base(control_url),
            region,
            access_key_id,
            secret_access_key,
        })
    }
}

impl BedrockSettings {
    /// Virtual-hosted S3 object URL, or path-style under an endpoint override.
    pub fn s3_object_url(&self, bucket: &str, key: &str) -> String {
        let key = key
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        match &self.s3_url {
            Some(base) => format!("{}/{}/{}", base, bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }

    pub fn require_batch_storage(&self) -> Result<(&str, &str)> {
        let bucket = self
            .batch_bucket
            .as_deref()
            .ok_or_else(|| Error::missing_config("bedrock", "AWS_BEDROCK_BATCH_BUCKET"))?;
        let role = self
            .role_arn
            .as_deref()
            .ok_or_else(|| Error::missing_config("bedrock", "AWS_BEDROCK_ROLE_ARN"))?;
        Ok((bucket, role))
    }
}

// ------------------------------------------------------------ Cloudflare

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudflareConfig {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub gateway_id: Option<String>,
    /// Workers AI token.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Full gateway base URL; replaces the account/gateway derived URL.
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Sent as `cf-aig-authorization` for authenticated gateways.
    #[serde(default)]
    pub gateway_token: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudflareSettings {
    pub gateway_base: String,
    pub api_token: Option<String>,
    pub gateway_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl CloudflareConfig {
    pub fn with_gateway(mut self, account_id: impl Into<String>, gateway_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self.gateway_id = Some(gateway_id.into());
        self
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn or(self, fallback: &Self) -> Self {
        merge_fields!(
            self,
            fallback,
            account_id,
            gateway_id,
            api_token,
            gateway_url,
            gateway_token,
            openai_api_key,
            anthropic_api_key
        )
    }

    pub fn resolve(&self, env: EnvLookup<'_>) -> Result<CloudflareSettings> {
        let gateway_base = match self.gateway_url.clone().or_else(|| env("AI_GATEWAY_URL")) {
            Some(url) => trim_base(url),
            None => {
                let account = self
                    .account_id
                    .clone()
                    .or_else(|| env("CLOUDFLARE_ACCOUNT_ID"))
                    .ok_or_else(|| Error::missing_config("cloudflare", "CLOUDFLARE_ACCOUNT_ID"))?;
                let gateway = self
                    .gateway_id
                    .clone()
                    .or_else(|| env("CLOUDFLARE_GATEWAY_ID"))
                    .ok_or_else(|| Error::missing_config("cloudflare", "CLOUDFLARE_GATEWAY_ID"))?;
                format!("{}/{}/{}", CLOUDFLARE_GATEWAY_BASE_URL, account, gateway)
            }
        };
        Ok(CloudflareSettings {
            gateway_base,
            api_token: self.api_token.clone().or_else(|| env("CLOUDFLARE_API_TOKEN")),
            gateway_token: self.gateway_token.clone().or_else(|| env("AI_GATEWAY_TOKEN")),
            openai_api_key: self.openai_api_key.clone().or_else(|| env("OPENAI_API_KEY")),
            anthropic_api_key: self
                .anthropic_api_key
                .clone()
                .or_else(|| env("ANTHROPIC_API_KEY")),
        })
    }
}
