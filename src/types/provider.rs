//! Provider tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend a batch runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Bedrock,
    Google,
    Cloudflare,
    Memory,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Bedrock,
        Provider::Google,
        Provider::Cloudflare,
        Provider::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Bedrock => "bedrock",
            Provider::Google => "google",
            Provider::Cloudflare => "cloudflare",
            Provider::Memory => "memory",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "bedrock" | "aws-bedrock" => Ok(Provider::Bedrock),
            "google" | "gemini" => Ok(Provider::Google),
            "cloudflare" => Ok(Provider::Cloudflare),
            "memory" | "test" => Ok(Provider::Memory),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}
