use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::fs;

#[derive(Clone, Deserialize)]
pub struct Config {
    // WhatsApp gateway
    pub whatsapp_host: String,
    pub whatsapp_basic_auth_user: Option<String>,
    pub whatsapp_basic_auth_password: Option<String>,
    /// The bot's own sender id, used to skip self-authored messages.
    pub bot_sender_id: Option<String>,

    // AI provider endpoints (OpenAI-compatible)
    pub chat_url: String,
    pub chat_model: String,
    pub chat_api_key: Option<String>,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    /// Expected embedding dimension; inserts with any other length are rejected.
    pub embedding_dimension: usize,

    pub database_url: String,
    pub webhook_bind: String,

    // Retrieval settings
    pub retrieval_top_k: usize,
    pub min_relevance: f32,
    pub duplicate_threshold: f32,

    // Spam settings
    pub spam_flag_threshold: f32,
    pub spam_remove_threshold: f32,
    pub spam_mention_limit: usize,
    pub spam_repeat_cache_size: usize,
    pub spam_domains: Vec<String>,

    // Summarization settings
    pub summary_window_hours: i64,
    pub summary_max_messages: usize,

    // Gateway call budget
    pub gateway_max_retries: u32,
    pub gateway_backoff_ms: u64,
    pub chat_timeout_secs: u64,
    pub embedding_timeout_secs: u64,

    // Background topic ingestion
    pub ingest_enabled: bool,
    pub ingest_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        let config = Self::build()?;
        config.validate()?;
        Ok(config)
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            whatsapp_host: env::var("WHATSAPP_HOST")
                .map_err(|_| anyhow::anyhow!("WHATSAPP_HOST must be set"))?,
            whatsapp_basic_auth_user: env::var("WHATSAPP_BASIC_AUTH_USER").ok(),
            whatsapp_basic_auth_password: env::var("WHATSAPP_BASIC_AUTH_PASSWORD").ok(),
            bot_sender_id: env::var("BOT_SENDER_ID").ok(),
            chat_url: env::var("CHAT_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            chat_api_key: env::var("CHAT_API_KEY").ok(),
            embedding_url: env::var("EMBEDDING_URL").unwrap_or_else(|_| {
                env::var("CHAT_URL").unwrap_or_else(|_| "http://localhost:8080/v1".to_string())
            }),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-large".to_string()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            embedding_dimension: env::var("EMBEDDING_DIMENSION")
                .unwrap_or_else(|_| "3072".to_string())
                .parse()
                .unwrap_or(3072),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/groupsage.db".to_string()),
            webhook_bind: env::var("WEBHOOK_BIND").unwrap_or_else(|_| "0.0.0.0:5001".to_string()),
            retrieval_top_k: env::var("RETRIEVAL_TOP_K")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            min_relevance: env::var("MIN_RELEVANCE")
                .unwrap_or_else(|_| "0.75".to_string())
                .parse()
                .unwrap_or(0.75),
            duplicate_threshold: env::var("DUPLICATE_THRESHOLD")
                .unwrap_or_else(|_| "0.93".to_string())
                .parse()
                .unwrap_or(0.93),
            spam_flag_threshold: env::var("SPAM_FLAG_THRESHOLD")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()
                .unwrap_or(0.5),
            spam_remove_threshold: env::var("SPAM_REMOVE_THRESHOLD")
                .unwrap_or_else(|_| "0.8".to_string())
                .parse()
                .unwrap_or(0.8),
            spam_mention_limit: env::var("SPAM_MENTION_LIMIT")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .unwrap_or(8),
            spam_repeat_cache_size: env::var("SPAM_REPEAT_CACHE_SIZE")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .unwrap_or(256),
            spam_domains: Self::load_spam_domains()?,
            summary_window_hours: env::var("SUMMARY_WINDOW_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            summary_max_messages: env::var("SUMMARY_MAX_MESSAGES")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .unwrap_or(200),
            gateway_max_retries: env::var("GATEWAY_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            gateway_backoff_ms: env::var("GATEWAY_BACKOFF_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            chat_timeout_secs: env::var("CHAT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            embedding_timeout_secs: env::var("EMBEDDING_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            ingest_enabled: env::var("INGEST_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            ingest_interval_secs: env::var("INGEST_INTERVAL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .unwrap_or(86400),
        })
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.retrieval_top_k == 0 {
            anyhow::bail!("RETRIEVAL_TOP_K must be at least 1");
        }
        for (name, value) in [
            ("MIN_RELEVANCE", self.min_relevance),
            ("DUPLICATE_THRESHOLD", self.duplicate_threshold),
            ("SPAM_FLAG_THRESHOLD", self.spam_flag_threshold),
            ("SPAM_REMOVE_THRESHOLD", self.spam_remove_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.spam_flag_threshold > self.spam_remove_threshold {
            anyhow::bail!("SPAM_FLAG_THRESHOLD must not exceed SPAM_REMOVE_THRESHOLD");
        }
        if self.embedding_dimension == 0 {
            anyhow::bail!("EMBEDDING_DIMENSION must be at least 1");
        }
        Ok(())
    }

    /// Known-bad domains for the spam rule layer. Read from spam_domains.toml
    /// when present, with a comma-separated SPAM_DOMAINS env fallback.
    pub fn load_spam_domains() -> anyhow::Result<Vec<String>> {
        if let Ok(content) = fs::read_to_string("spam_domains.toml") {
            if let Some(domains) = Self::parse_spam_domains(&content) {
                return Ok(domains);
            }
        }

        // Fallback to env variable
        if let Ok(env_domains) = env::var("SPAM_DOMAINS") {
            return Ok(env_domains
                .split(',')
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect());
        }

        Ok(Vec::new())
    }

    fn parse_spam_domains(content: &str) -> Option<Vec<String>> {
        #[derive(Deserialize)]
        struct DomainsWrapper {
            domains: Vec<String>,
        }
        toml::from_str::<DomainsWrapper>(content)
            .ok()
            .map(|wrapper| {
                wrapper
                    .domains
                    .into_iter()
                    .map(|d| d.to_lowercase())
                    .collect()
            })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("whatsapp_host", &self.whatsapp_host)
            .field(
                "whatsapp_basic_auth_user",
                &self.whatsapp_basic_auth_user.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "whatsapp_basic_auth_password",
                &self
                    .whatsapp_basic_auth_password
                    .as_ref()
                    .map(|_| "[REDACTED]"),
            )
            .field("bot_sender_id", &self.bot_sender_id)
            .field("chat_url", &self.chat_url)
            .field("chat_model", &self.chat_model)
            .field(
                "chat_api_key",
                &self.chat_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_dimension", &self.embedding_dimension)
            .field("database_url", &self.database_url)
            .field("webhook_bind", &self.webhook_bind)
            .field("retrieval_top_k", &self.retrieval_top_k)
            .field("min_relevance", &self.min_relevance)
            .field("duplicate_threshold", &self.duplicate_threshold)
            .field("spam_flag_threshold", &self.spam_flag_threshold)
            .field("spam_remove_threshold", &self.spam_remove_threshold)
            .field("spam_mention_limit", &self.spam_mention_limit)
            .field("spam_repeat_cache_size", &self.spam_repeat_cache_size)
            .field("spam_domains", &self.spam_domains)
            .field("summary_window_hours", &self.summary_window_hours)
            .field("summary_max_messages", &self.summary_max_messages)
            .field("gateway_max_retries", &self.gateway_max_retries)
            .field("gateway_backoff_ms", &self.gateway_backoff_ms)
            .field("chat_timeout_secs", &self.chat_timeout_secs)
            .field("embedding_timeout_secs", &self.embedding_timeout_secs)
            .field("ingest_enabled", &self.ingest_enabled)
            .field("ingest_interval_secs", &self.ingest_interval_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("WHATSAPP_HOST");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when required vars are missing");

        // 2. Test defaults
        env::set_var("WHATSAPP_HOST", "http://localhost:3000");
        let config = Config::build().unwrap();
        assert_eq!(config.whatsapp_host, "http://localhost:3000");
        assert_eq!(config.retrieval_top_k, 5);
        assert!(config.validate().is_ok());

        // 3. Test debug redaction
        env::set_var("CHAT_API_KEY", "secret_api_key");
        env::set_var("WHATSAPP_BASIC_AUTH_PASSWORD", "hunter2");
        let config_redacted = Config::build().unwrap();
        let debug_output = format!("{:?}", config_redacted);
        assert!(!debug_output.contains("secret_api_key"));
        assert!(!debug_output.contains("hunter2"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("WHATSAPP_HOST");
        env::remove_var("CHAT_API_KEY");
        env::remove_var("WHATSAPP_BASIC_AUTH_PASSWORD");
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = crate::test_support::test_config();
        assert!(config.validate().is_ok());

        config.min_relevance = 1.5;
        assert!(config.validate().is_err());

        config.min_relevance = 0.75;
        config.spam_flag_threshold = 0.9;
        config.spam_remove_threshold = 0.8;
        assert!(config.validate().is_err());

        config.spam_flag_threshold = 0.5;
        config.retrieval_top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_spam_domains() {
        let domains =
            Config::parse_spam_domains("domains = [\"Bad.Example.com\", \"scam.link\"]").unwrap();
        assert_eq!(domains, vec!["bad.example.com", "scam.link"]);

        assert!(Config::parse_spam_domains("not valid toml [").is_none());
    }
}
