//! Typed read layer over the vault and its asset token
//!
//! Every read is routed through the rate-limited request queue and
//! deduplicated by the TTL cache, so identical queries inside the cache
//! window never reach the remote twice.

use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::traits::{ChainProvider, ReadCall};
use crate::coordination::{Priority, RateLimitedQueue, TtlCache};
use crate::error::{EngineError, Result};

/// Addresses the engine operates against
#[derive(Debug, Clone)]
pub struct VaultContext {
    pub vault_address: String,
    pub asset_address: String,
    /// Active actor whose user-scoped state is tracked
    pub actor: String,
    /// Native-asset vaults need no allowance before deposits
    pub native_asset: bool,
}

/// User-scoped derived state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub allowance: Decimal,
    pub asset_balance: Decimal,
    pub share_balance: Decimal,
    pub claimable: Decimal,
}

/// Vault-wide derived state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSnapshot {
    pub total_assets: Decimal,
    pub total_shares: Decimal,
}

/// Queue- and cache-mediated reader for vault state
pub struct VaultReader {
    provider: Arc<dyn ChainProvider>,
    queue: RateLimitedQueue,
    cache: Arc<TtlCache<String, serde_json::Value>>,
    context: VaultContext,
}

impl VaultReader {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        queue: RateLimitedQueue,
        cache: Arc<TtlCache<String, serde_json::Value>>,
        context: VaultContext,
    ) -> Self {
        Self {
            provider,
            queue,
            cache,
            context,
        }
    }

    pub fn context(&self) -> &VaultContext {
        &self.context
    }

    /// Read through the cache; misses go through the rate-limited queue
    async fn read_cached(&self, priority: Priority, call: ReadCall) -> Result<serde_json::Value> {
        let key = call.cache_key();
        if let Some(value) = self.cache.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let provider = Arc::clone(&self.provider);
        let value = self
            .queue
            .enqueue(priority, async move { provider.read(&call).await })
            .await?;
        self.cache.set(key, value.clone());
        Ok(value)
    }

    async fn read_decimal(&self, priority: Priority, call: ReadCall) -> Result<Decimal> {
        let value = self.read_cached(priority, call).await?;
        decimal_from_value(&value)
    }

    fn allowance_call(&self) -> ReadCall {
        ReadCall::new(&self.context.asset_address, "allowance")
            .with_args(vec![json!(self.context.actor), json!(self.context.vault_address)])
    }

    /// Current allowance granted to the vault. High priority: a pending user
    /// interaction is usually blocked on this value.
    pub async fn allowance(&self) -> Result<Decimal> {
        if self.context.native_asset {
            return Ok(Decimal::MAX);
        }
        self.read_decimal(Priority::High, self.allowance_call()).await
    }

    pub async fn asset_balance(&self) -> Result<Decimal> {
        let call = ReadCall::new(&self.context.asset_address, "balance_of")
            .with_args(vec![json!(self.context.actor)]);
        self.read_decimal(Priority::Normal, call).await
    }

    pub async fn share_balance(&self) -> Result<Decimal> {
        let call = ReadCall::new(&self.context.vault_address, "balance_of")
            .with_args(vec![json!(self.context.actor)]);
        self.read_decimal(Priority::Normal, call).await
    }

    pub async fn claimable(&self) -> Result<Decimal> {
        let call = ReadCall::new(&self.context.vault_address, "claimable")
            .with_args(vec![json!(self.context.actor)]);
        self.read_decimal(Priority::Normal, call).await
    }

    pub async fn total_assets(&self) -> Result<Decimal> {
        let call = ReadCall::new(&self.context.vault_address, "total_assets");
        self.read_decimal(Priority::Normal, call).await
    }

    pub async fn total_shares(&self) -> Result<Decimal> {
        let call = ReadCall::new(&self.context.vault_address, "total_shares");
        self.read_decimal(Priority::Normal, call).await
    }

    /// Re-read all user-scoped state, bypassing any cached values
    pub async fn refresh_user(&self) -> Result<UserSnapshot> {
        self.cache.invalidate(&self.allowance_call().cache_key());
        self.cache.invalidate(
            &ReadCall::new(&self.context.asset_address, "balance_of")
                .with_args(vec![json!(self.context.actor)])
                .cache_key(),
        );
        self.cache.invalidate(
            &ReadCall::new(&self.context.vault_address, "balance_of")
                .with_args(vec![json!(self.context.actor)])
                .cache_key(),
        );
        self.cache.invalidate(
            &ReadCall::new(&self.context.vault_address, "claimable")
                .with_args(vec![json!(self.context.actor)])
                .cache_key(),
        );

        Ok(UserSnapshot {
            allowance: self.allowance().await?,
            asset_balance: self.asset_balance().await?,
            share_balance: self.share_balance().await?,
            claimable: self.claimable().await?,
        })
    }

    /// Re-read all vault-wide state, bypassing any cached values
    pub async fn refresh_global(&self) -> Result<GlobalSnapshot> {
        self.cache
            .invalidate(&ReadCall::new(&self.context.vault_address, "total_assets").cache_key());
        self.cache
            .invalidate(&ReadCall::new(&self.context.vault_address, "total_shares").cache_key());

        Ok(GlobalSnapshot {
            total_assets: self.total_assets().await?,
            total_shares: self.total_shares().await?,
        })
    }
}

/// Parse a remote value as a decimal amount (string or number encodings)
pub fn decimal_from_value(value: &serde_json::Value) -> Result<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s)
            .map_err(|e| EngineError::Validation(format!("bad decimal value '{}': {}", s, e))),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|e| EngineError::Validation(format!("bad decimal value '{}': {}", n, e))),
        other => Err(EngineError::Validation(format!(
            "expected decimal value, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::SimulatedProvider;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn reader(provider: Arc<SimulatedProvider>, ttl: Duration) -> VaultReader {
        VaultReader::new(
            provider,
            RateLimitedQueue::new(Duration::ZERO),
            Arc::new(TtlCache::new(ttl)),
            VaultContext {
                vault_address: "0xvault".into(),
                asset_address: "0xtoken".into(),
                actor: "0xme".into(),
                native_asset: false,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_are_deduplicated_within_ttl() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.set_read_decimal("allowance", dec!(500));
        let reader = reader(provider.clone(), Duration::from_secs(5));

        assert_eq!(reader.allowance().await.unwrap(), dec!(500));
        assert_eq!(reader.allowance().await.unwrap(), dec!(500));
        assert_eq!(provider.read_count("allowance"), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(reader.allowance().await.unwrap(), dec!(500));
        assert_eq!(provider.read_count("allowance"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_user_bypasses_cache() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.set_read_decimal("allowance", dec!(100));
        provider.set_read_decimal("balance_of", dec!(250));
        provider.set_read_decimal("claimable", dec!(0));
        let reader = reader(provider.clone(), Duration::from_secs(60));

        let _ = reader.allowance().await.unwrap();
        provider.set_read_decimal("allowance", dec!(0));

        let snapshot = reader.refresh_user().await.unwrap();
        assert_eq!(snapshot.allowance, dec!(0));
        assert_eq!(snapshot.asset_balance, dec!(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_asset_skips_allowance_read() {
        let provider = Arc::new(SimulatedProvider::new());
        let reader = VaultReader::new(
            provider.clone(),
            RateLimitedQueue::new(Duration::ZERO),
            Arc::new(TtlCache::new(Duration::from_secs(5))),
            VaultContext {
                vault_address: "0xvault".into(),
                asset_address: "native".into(),
                actor: "0xme".into(),
                native_asset: true,
            },
        );

        assert_eq!(reader.allowance().await.unwrap(), Decimal::MAX);
        assert_eq!(provider.read_count("allowance"), 0);
    }

    #[test]
    fn test_decimal_parsing() {
        assert_eq!(
            decimal_from_value(&serde_json::json!("12.5")).unwrap(),
            dec!(12.5)
        );
        assert_eq!(decimal_from_value(&serde_json::json!(7)).unwrap(), dec!(7));
        assert!(decimal_from_value(&serde_json::json!(null)).is_err());
    }
}
