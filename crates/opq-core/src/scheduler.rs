//! The scheduler selection algorithm: given a service and a live view of
//! the store, returns the next batch of eligible rows honoring the
//! concurrency cap, tenant lock, and per-SKU fairness rotation.
//!
//! `schedule` is pure with respect to its inputs: a store snapshot plus a
//! policy in, a claim list out, no writes.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use opq_db::models::{QueueRow, RankedRow};
use sqlx::PgPool;
use tracing::debug;

use crate::config::ServicePolicy;

/// Run the selection algorithm for one service, for one tick.
///
/// 1. Early-out if the service is already at `max_concurrency`.
/// 2. Read the busy-tenant set.
/// 3. Read per-SKU-ranked pending candidates (bounded to `per_sku_limit`
///    per SKU by the store).
/// 4. Drop candidates whose tenant is busy (tenant lock, enforces I2).
/// 5. From each remaining SKU group, take only the rank-1 row -- a SKU
///    whose rank-1 candidate was dropped in step 4 contributes nothing
///    this tick, even if a lower-ranked row from the same SKU survived.
/// 6. Cap the one-per-SKU list at the service's remaining capacity,
///    visiting SKUs in lexicographic order for determinism.
pub async fn schedule(
    pool: &PgPool,
    service_name: &str,
    policy: &ServicePolicy,
) -> Result<Vec<QueueRow>> {
    let in_progress = opq_db::queries::queue::count_in_progress(pool, service_name).await?;
    if in_progress >= policy.max_concurrency {
        debug!(service = service_name, in_progress, max = policy.max_concurrency, "at capacity");
        return Ok(Vec::new());
    }

    let busy_tenants: HashSet<String> =
        opq_db::queries::queue::list_in_progress_tenants(pool, service_name)
            .await?
            .into_iter()
            .collect();

    let candidates =
        opq_db::queries::queue::rank_pending(pool, service_name, policy.per_sku_limit).await?;

    let selected = select(candidates, &busy_tenants, in_progress, policy.max_concurrency);

    debug!(
        service = service_name,
        selected = selected.len(),
        "scheduled rows for this tick"
    );

    Ok(selected)
}

/// Pure, synchronous core of the algorithm (steps 4-6), split out so it can
/// be unit-tested without a database.
fn select(
    candidates: Vec<RankedRow>,
    busy_tenants: &HashSet<String>,
    in_progress: i64,
    max_concurrency: i64,
) -> Vec<QueueRow> {
    // Step 4: drop tenant-locked candidates.
    let surviving = candidates
        .into_iter()
        .filter(|r| !busy_tenants.contains(&r.tenant_id));

    // Step 5: group by SKU, keep only the rank-1 row per SKU. A BTreeMap
    // keyed by product_sku gives the lexicographic traversal order step 6
    // needs for free.
    let mut per_sku: BTreeMap<String, (QueueRow, i64)> = BTreeMap::new();
    for ranked in surviving {
        let (row, rank) = ranked.into_parts();
        per_sku
            .entry(row.product_sku.clone())
            .and_modify(|existing| {
                if rank < existing.1 {
                    *existing = (row.clone(), rank);
                }
            })
            .or_insert((row, rank));
    }
    let one_per_sku: Vec<QueueRow> = per_sku
        .into_iter()
        .filter(|(_, (_, rank))| *rank == 1)
        .map(|(_, (row, _))| row)
        .collect();

    // Step 6: cap at remaining capacity, skipping any row whose tenant was
    // already taken earlier in this same batch -- two different SKUs can
    // each rank a different tenant's row first, but a tenant still may not
    // contribute more than one claim per tick (I2).
    let remaining = (max_concurrency - in_progress).max(0) as usize;
    let mut taken_tenants: HashSet<String> = HashSet::new();
    let mut selected = Vec::with_capacity(remaining);
    for row in one_per_sku {
        if selected.len() >= remaining {
            break;
        }
        if !taken_tenants.insert(row.tenant_id.clone()) {
            continue;
        }
        selected.push(row);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use opq_db::models::{Operation, RowStatus};
    use uuid::Uuid;

    fn ranked(sku: &str, tenant: &str, op: Operation, rank: i64, seconds: i64) -> RankedRow {
        let inserted_at: DateTime<Utc> = Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap();
        RankedRow {
            id: Uuid::new_v4(),
            execution_instance_id: Uuid::new_v4(),
            event_instance_id: Uuid::new_v4(),
            tenant_id: tenant.to_owned(),
            product_sku: sku.to_owned(),
            service_name: "iam".to_owned(),
            operation: op,
            status: RowStatus::Pending,
            inserted_at,
            retry_count: 0,
            sku_rank: rank,
        }
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let selected = select(vec![], &HashSet::new(), 0, 3);
        assert!(selected.is_empty());
    }

    #[test]
    fn one_row_per_sku_per_tick() {
        let candidates = vec![
            ranked("A", "t1", Operation::Create, 1, 0),
            ranked("A", "t2", Operation::Update, 2, 1),
            ranked("B", "t3", Operation::Create, 1, 0),
        ];
        let selected = select(candidates, &HashSet::new(), 0, 10);
        assert_eq!(selected.len(), 2);
        let skus: HashSet<_> = selected.iter().map(|r| r.product_sku.clone()).collect();
        assert_eq!(skus, HashSet::from(["A".to_owned(), "B".to_owned()]));
    }

    #[test]
    fn tenant_lock_drops_rank_one_without_promoting_rank_two() {
        // SKU A's rank-1 row is tenant-locked; its rank-2 row must NOT be
        // promoted to fill the slot -- the SKU yields its turn entirely.
        let candidates = vec![
            ranked("A", "busy", Operation::Create, 1, 0),
            ranked("A", "free", Operation::Update, 2, 1),
        ];
        let busy = HashSet::from(["busy".to_owned()]);
        let selected = select(candidates, &busy, 0, 10);
        assert!(selected.is_empty());
    }

    #[test]
    fn same_tenant_across_two_skus_contributes_only_one_row() {
        // SKU A and SKU B each rank a Create for the same tenant first;
        // both survive the busy-tenant filter (neither is in-progress yet),
        // but only one may be claimed this tick.
        let candidates = vec![
            ranked("A", "t1", Operation::Create, 1, 0),
            ranked("B", "t1", Operation::Create, 1, 0),
        ];
        let selected = select(candidates, &HashSet::new(), 0, 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].product_sku, "A", "lexicographic SKU order decides the tie");
    }

    #[test]
    fn capacity_cap_limits_selection_count() {
        let candidates = vec![
            ranked("A", "t1", Operation::Create, 1, 0),
            ranked("B", "t2", Operation::Create, 1, 0),
            ranked("C", "t3", Operation::Create, 1, 0),
        ];
        // 1 already in progress, max 2 -> only 1 more slot.
        let selected = select(candidates, &HashSet::new(), 1, 2);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn capacity_cap_order_is_lexicographic_by_sku() {
        let candidates = vec![
            ranked("zeta", "t1", Operation::Create, 1, 0),
            ranked("alpha", "t2", Operation::Create, 1, 0),
            ranked("mid", "t3", Operation::Create, 1, 0),
        ];
        let selected = select(candidates, &HashSet::new(), 0, 2);
        let skus: Vec<_> = selected.iter().map(|r| r.product_sku.clone()).collect();
        assert_eq!(skus, vec!["alpha".to_owned(), "mid".to_owned()]);
    }

    #[test]
    fn at_capacity_returns_empty_regardless_of_candidates() {
        let candidates = vec![ranked("A", "t1", Operation::Create, 1, 0)];
        let selected = select(candidates, &HashSet::new(), 2, 2);
        assert!(selected.is_empty());
    }
}
