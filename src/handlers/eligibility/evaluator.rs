//! Eligibility evaluator
//!
//! Decides whether an address currently holds any configured token. Tokens
//! are checked in order and the first confirmed holding wins. A provider
//! error only counts that one token as not held.

use moka::future::Cache;
use std::sync::Arc;

use crate::config::TokenDescriptor;
use crate::services::{Holding, HoldingsOracle};
use crate::utils::address::EvmAddress;

/// Enough for every (token, address) pair of a large group.
const CYCLE_CACHE_CAPACITY: u64 = 100_000;

#[derive(Clone)]
pub struct EligibilityEvaluator {
    oracle: Arc<dyn HoldingsOracle>,
    tokens: Arc<Vec<TokenDescriptor>>,
}

impl EligibilityEvaluator {
    pub fn new(oracle: Arc<dyn HoldingsOracle>, tokens: Vec<TokenDescriptor>) -> Self {
        Self {
            oracle,
            tokens: Arc::new(tokens),
        }
    }

    pub fn tokens(&self) -> &[TokenDescriptor] {
        &self.tokens
    }

    /// Begin a reconciliation cycle with an empty lookup cache.
    pub fn start_cycle(&self) -> CycleEvaluator {
        CycleEvaluator {
            oracle: self.oracle.clone(),
            tokens: self.tokens.clone(),
            cache: Cache::builder().max_capacity(CYCLE_CACHE_CAPACITY).build(),
        }
    }

    /// One-off evaluation outside of a cycle.
    pub async fn evaluate(&self, address: &EvmAddress) -> bool {
        self.start_cycle().evaluate(address).await
    }
}

/// Evaluator bound to one cycle. Dropped with the cycle, taking the cache with it.
pub struct CycleEvaluator {
    oracle: Arc<dyn HoldingsOracle>,
    tokens: Arc<Vec<TokenDescriptor>>,
    cache: Cache<String, Holding>,
}

impl CycleEvaluator {
    pub async fn evaluate(&self, address: &EvmAddress) -> bool {
        for token in self.tokens.iter() {
            let key = self.oracle.cache_key(token, address);

            // Concurrent callers for the same key share one lookup; errors aren't cached
            let holding = self
                .cache
                .try_get_with(key, self.oracle.lookup(token, address))
                .await;

            match holding {
                Ok(holding) if holding.contains(address) => {
                    log::debug!("{} holds {}", address, token);
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!(
                        "{}: lookup of {} for {} failed, treating as not held: {}",
                        self.oracle.name(),
                        token,
                        address,
                        e
                    );
                }
            }
        }

        false
    }

    /// Number of cached lookups, for cycle reports.
    pub async fn cached_lookups(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}
