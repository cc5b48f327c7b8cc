// Runtime configuration loaded from the environment

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use std::str::FromStr;
use std::time::Duration;

use crate::refresh::{RefreshSettings, StalePolicy};

/// Escrow contract deployed on World Chain
pub const DEFAULT_ESCROW_ADDRESS: &str = "0xcfd5a1d5aec34d9d147b812eec84b3d660f17aef";
pub const DEFAULT_WORLD_ID_VERIFY_URL: &str = "https://developer.worldcoin.org/api/v2/verify";

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub escrow_address: Address,
    pub database_url: String,
    pub server_port: u16,
    pub wallet_url: String,
    pub auth_url: String,
    pub app_id: String,
    pub world_id_verify_url: String,
    pub siwe: SiweSettings,
    pub refresh: RefreshSettings,
    pub session_ttl: chrono::Duration,
    pub json_logs: bool,
}

/// Parameters the wallet needs to build a sign-in message
#[derive(Debug, Clone)]
pub struct SiweSettings {
    pub domain: String,
    pub uri: String,
    pub chain_id: u64,
    pub statement: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_url = std::env::var("RPC_URL").context("RPC_URL must be set in environment")?;
        let escrow_address = Address::from_str(&env_or("ESCROW_ADDRESS", DEFAULT_ESCROW_ADDRESS))
            .map_err(|e| anyhow!("ESCROW_ADDRESS is not a valid address: {}", e))?;
        let server_port = parse_env("PORT", 4000u16)?;

        let refresh = RefreshSettings {
            poll_period: Duration::from_secs(parse_env("POLL_PERIOD_SECS", 6u64)?),
            min_spacing: Duration::from_secs(parse_env("MIN_SPACING_SECS", 4u64)?),
            auth_interval: Duration::from_secs(parse_env("AUTH_INTERVAL_SECS", 20u64)?),
            history_window: parse_env("HISTORY_WINDOW_BLOCKS", 150_000u64)?,
            stale_policy: StalePolicy::from_str(&env_or("STALE_POLICY", "discard-stale"))?,
        };

        let ttl_days = parse_env("SESSION_TTL_DAYS", 7i64)?;
        if ttl_days <= 0 {
            return Err(anyhow!("SESSION_TTL_DAYS must be positive, got {}", ttl_days));
        }

        Ok(Self {
            rpc_url,
            escrow_address,
            database_url: env_or("DATABASE_URL", "sqlite:escrow.db"),
            server_port,
            wallet_url: env_or("WALLET_URL", "http://localhost:3000"),
            auth_url: env_or("AUTH_URL", &format!("http://localhost:{}", server_port)),
            app_id: env_or("APP_ID", ""),
            world_id_verify_url: env_or("WORLD_ID_VERIFY_URL", DEFAULT_WORLD_ID_VERIFY_URL),
            siwe: SiweSettings {
                domain: env_or("SIWE_DOMAIN", "localhost"),
                uri: env_or("SIWE_URI", &format!("http://localhost:{}", server_port)),
                chain_id: parse_env("CHAIN_ID", 480u64)?,
                statement: env_or(
                    "SIWE_STATEMENT",
                    "Sign in to trade WLD against UPI payments.",
                ),
            },
            refresh,
            session_ttl: chrono::Duration::days(ttl_days),
            json_logs: env_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_falls_back_to_default() {
        let value: u64 = parse_env("ESCROW_CLIENT_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("ESCROW_CLIENT_TEST_BAD_PORT", "not-a-port");
        let err = parse_env::<u16>("ESCROW_CLIENT_TEST_BAD_PORT", 4000).unwrap_err();
        assert!(err.to_string().contains("ESCROW_CLIENT_TEST_BAD_PORT"));
        std::env::remove_var("ESCROW_CLIENT_TEST_BAD_PORT");
    }

    #[test]
    fn test_default_escrow_address_parses() {
        assert!(Address::from_str(DEFAULT_ESCROW_ADDRESS).is_ok());
    }
}
