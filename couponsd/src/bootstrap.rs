//! Startup seeding of coupon pools.

use coupon_domain::{PoolCode, PoolSeed, SeedOutcome};
use coupon_store::PoolRepository;
use tracing::info;

use crate::error::DaemonResult;

/// Insert every seed whose pool code is absent.
///
/// Existing pools are left untouched, so restarting never resets stock.
pub async fn seed_pools(
    pools: &dyn PoolRepository,
    seeds: &[PoolSeed],
) -> DaemonResult<Vec<(PoolCode, SeedOutcome)>> {
    let mut outcomes = Vec::with_capacity(seeds.len());

    for seed in seeds {
        let outcome = pools.seed_if_absent(seed).await?;
        match outcome {
            SeedOutcome::Created => {
                info!(pool = %seed.code, stock = seed.initial_stock, "Seeded coupon pool");
            },
            SeedOutcome::AlreadyPresent => {
                info!(pool = %seed.code, "Coupon pool already present, keeping stock");
            },
        }
        outcomes.push((seed.code.clone(), outcome));
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_seeds;
    use coupon_domain::RequesterId;
    use coupon_engine::Allocator;
    use coupon_store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_seed_pools_creates_missing_pools() {
        let store = MemoryStore::new();
        let seeds = parse_seeds("A=1,B=30,C=69").unwrap();

        let outcomes = seed_pools(&store, &seeds).await.unwrap();

        assert!(outcomes.iter().all(|(_, o)| *o == SeedOutcome::Created));
        assert_eq!(store.pool_count(), 3);
        assert_eq!(store.stock_of("B"), Some(30));
    }

    #[tokio::test]
    async fn test_reseeding_preserves_drawn_stock() {
        let store = Arc::new(MemoryStore::new());
        let seeds = parse_seeds("A=2").unwrap();
        seed_pools(store.as_ref(), &seeds).await.unwrap();

        let allocator = Allocator::new(store.clone(), "A".parse().unwrap());
        allocator.allocate(RequesterId::new(1).unwrap()).await.unwrap();

        let outcomes = seed_pools(store.as_ref(), &seeds).await.unwrap();

        assert_eq!(outcomes[0].1, SeedOutcome::AlreadyPresent);
        assert_eq!(store.stock_of("A"), Some(1));
    }
}
