use clap::Parser;
use std::time::Duration;

use crate::classify::CooldownPolicy;
use crate::key_pool::parse_keys;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "elf-gateway")]
#[command(about = "Greeting generation gateway with Gemini API key rotation")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // API keys (comma-separated)
    // Example: "key-one,key-two"
    #[arg(long, env = "GEMINI_API_KEYS", hide_env_values = true)]
    pub api_keys: Option<String>,

    // Single API key, used when no key list is given
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    // Gemini API base url
    #[arg(long, env = "GEMINI_UPSTREAM", default_value = "https://generativelanguage.googleapis.com")]
    pub upstream: String,

    // Model for the letter
    #[arg(long, env = "GEMINI_TEXT_MODEL", default_value = "gemini-3-flash-preview")]
    pub text_model: String,

    // Upstream request timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub upstream_timeout: u64,

    // Cooldown after a quota error, in seconds
    #[arg(long, default_value_t = 30 * 60)]
    pub quota_cooldown: u64,

    // Cooldown after a rate limit error, in seconds
    #[arg(long, default_value_t = 60)]
    pub rate_limit_cooldown: u64,

    // Longest wait for a blocked key to free up before giving up, in seconds
    #[arg(long, default_value_t = 60)]
    pub max_wait: u64,

    // Longest single sleep while waiting, in seconds
    #[arg(long, default_value_t = 5)]
    pub wait_step: u64,
}

impl Args {
    /// Keys from `--api-keys`, else `--api-key`, else the `API_KEY`
    /// environment variable.
    pub fn keys(&self) -> Vec<String> {
        let raw = self
            .api_keys
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.api_key.clone())
            .or_else(|| std::env::var("API_KEY").ok())
            .unwrap_or_default();
        parse_keys(&raw)
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            quota: Duration::from_secs(self.quota_cooldown),
            rate_limit: Duration::from_secs(self.rate_limit_cooldown),
            max_wait: Duration::from_secs(self.max_wait),
            wait_step: Duration::from_secs(self.wait_step),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}
