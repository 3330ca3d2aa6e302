use crate::{Error, Result};
use std::env::var;
use std::str::FromStr;

pub const DEFAULT_DIFFICULTY: u32 = 2;
pub const DEFAULT_MAX_NONCE_ATTEMPTS: u64 = 1 << 24;
pub const DEFAULT_MAX_CONCURRENT_MINES: usize = 16;
pub const DEFAULT_RECEIPT_WINDOW_DAYS: i64 = 90;
pub const DEFAULT_VERIFICATION_URL: &str = "https://verify.votechain.local/receipts";
pub const DEFAULT_KEY_BITS: usize = 2048;

/// A century; receipts are never kept verifiable longer than that
pub const MAX_RECEIPT_WINDOW_DAYS: i64 = 36_500;

/// Hex digits in a SHA-256 digest; more zero nibbles than this can never be met
const MAX_DIFFICULTY: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Leading zero hex nibbles required of every block hash
    pub difficulty: u32,
    pub max_nonce_attempts: u64,
    pub mining_threads: usize,
    pub max_concurrent_mines: usize,
    pub receipt_window_days: i64,
    pub verification_url: String,
    pub key_bits: usize,
}

fn default_mining_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            difficulty: DEFAULT_DIFFICULTY,
            max_nonce_attempts: DEFAULT_MAX_NONCE_ATTEMPTS,
            mining_threads: default_mining_threads(),
            max_concurrent_mines: DEFAULT_MAX_CONCURRENT_MINES,
            receipt_window_days: DEFAULT_RECEIPT_WINDOW_DAYS,
            verification_url: DEFAULT_VERIFICATION_URL.to_owned(),
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", name, value)))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Config::default();

        if let Some(val) = lookup("VOTECHAIN_DIFFICULTY") {
            config.difficulty = parse("VOTECHAIN_DIFFICULTY", &val)?;
        }
        if let Some(val) = lookup("VOTECHAIN_MAX_NONCE_ATTEMPTS") {
            config.max_nonce_attempts = parse("VOTECHAIN_MAX_NONCE_ATTEMPTS", &val)?;
        }
        if let Some(val) = lookup("VOTECHAIN_MINING_THREADS") {
            config.mining_threads = parse("VOTECHAIN_MINING_THREADS", &val)?;
        }
        if let Some(val) = lookup("VOTECHAIN_MAX_CONCURRENT_MINES") {
            config.max_concurrent_mines = parse("VOTECHAIN_MAX_CONCURRENT_MINES", &val)?;
        }
        if let Some(val) = lookup("VOTECHAIN_RECEIPT_WINDOW_DAYS") {
            config.receipt_window_days = parse("VOTECHAIN_RECEIPT_WINDOW_DAYS", &val)?;
        }
        if let Some(val) = lookup("VOTECHAIN_VERIFICATION_URL") {
            config.verification_url = val.trim_end_matches('/').to_owned();
        }
        if let Some(val) = lookup("VOTECHAIN_KEY_BITS") {
            config.key_bits = parse("VOTECHAIN_KEY_BITS", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(Error::Config(format!(
                "difficulty {} exceeds {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }
        if self.max_nonce_attempts == 0 {
            return Err(Error::Config("max nonce attempts must be positive".into()));
        }
        if self.mining_threads == 0 || self.max_concurrent_mines == 0 {
            return Err(Error::Config("worker pool sizes must be positive".into()));
        }
        if !(0..=MAX_RECEIPT_WINDOW_DAYS).contains(&self.receipt_window_days) {
            return Err(Error::Config(format!(
                "receipt window must be between 0 and {} days",
                MAX_RECEIPT_WINDOW_DAYS
            )));
        }
        if self.key_bits < crate::threshold::MIN_KEY_BITS {
            return Err(Error::Config(format!(
                "key size {} below minimum {}",
                self.key_bits,
                crate::threshold::MIN_KEY_BITS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.max_nonce_attempts, 16_777_216);
        assert_eq!(config.receipt_window_days, 90);
        assert_eq!(config.key_bits, 2048);
        assert!(config.mining_threads >= 1);
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("VOTECHAIN_DIFFICULTY", "3"),
            ("VOTECHAIN_MINING_THREADS", " 4 "),
            ("VOTECHAIN_VERIFICATION_URL", "https://example.org/r/"),
            ("VOTECHAIN_KEY_BITS", "3072"),
        ]))
        .unwrap();
        assert_eq!(config.difficulty, 3);
        assert_eq!(config.mining_threads, 4);
        assert_eq!(config.verification_url, "https://example.org/r");
        assert_eq!(config.key_bits, 3072);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("VOTECHAIN_DIFFICULTY", "two")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("VOTECHAIN_DIFFICULTY", "65")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("VOTECHAIN_MAX_CONCURRENT_MINES", "0")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("VOTECHAIN_KEY_BITS", "512")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("VOTECHAIN_RECEIPT_WINDOW_DAYS", "-1")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn receipt_window_is_bounded() {
        let huge = i64::MAX.to_string();
        assert!(matches!(
            Config::from_lookup(lookup(&[("VOTECHAIN_RECEIPT_WINDOW_DAYS", huge.as_str())])),
            Err(Error::Config(_))
        ));

        let config =
            Config::from_lookup(lookup(&[("VOTECHAIN_RECEIPT_WINDOW_DAYS", "36500")])).unwrap();
        let audit = std::sync::Arc::new(crate::audit::MemAuditLog::new());
        assert!(crate::receipt::ReceiptService::from_config(&config, audit).is_ok());
    }
}
