//! Process configuration
//!
//! Loaded from environment variables (with `.env` support via dotenvy),
//! mirroring the deployment convention of the surrounding services.

use crate::error::{SyncError, SyncResult};

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Postgres connection string, consumed by `PgSyncEngine::connect_from_env`
    pub database_url: String,
    /// Stripe API secret key, used only for canonical-state refetches
    pub stripe_secret_key: String,
    /// Total attempts per canonical refetch, including the first (min 1)
    pub refetch_max_attempts: u32,
    /// Base delay for the refetch backoff schedule
    pub refetch_base_delay_ms: u64,
}

impl SyncConfig {
    /// Load configuration from the environment.
    ///
    /// Required: `DATABASE_URL`, `STRIPE_SECRET_KEY`.
    /// Optional: `REFETCH_MAX_ATTEMPTS` (default 3),
    /// `REFETCH_BASE_DELAY_MS` (default 100).
    pub fn from_env() -> SyncResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = required_var("DATABASE_URL")?;
        let stripe_secret_key = required_var("STRIPE_SECRET_KEY")?;
        let refetch_max_attempts: u32 = optional_var("REFETCH_MAX_ATTEMPTS", 3)?;
        let refetch_base_delay_ms: u64 = optional_var("REFETCH_BASE_DELAY_MS", 100)?;

        if refetch_max_attempts == 0 {
            return Err(SyncError::Config(
                "REFETCH_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            stripe_secret_key,
            refetch_max_attempts,
            refetch_base_delay_ms,
        })
    }
}

fn required_var(name: &str) -> SyncResult<String> {
    std::env::var(name).map_err(|_| SyncError::Config(format!("{} must be set", name)))
}

fn optional_var<T>(name: &str, default: T) -> SyncResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| SyncError::Config(format!("{} is not a valid value: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_var_falls_back_to_default() {
        let value: u32 = optional_var("BILLING_SYNC_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_missing_required_var_is_config_error() {
        let err = required_var("BILLING_SYNC_TEST_MISSING_VAR").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
