//! # Aggregation & Fallback View Builder
//!
//! Read-side derived computation over the two independently-synced record
//! streams. The coverage set is the union of actor keys from both streams,
//! never an inner join, which silently drops actors present on only one
//! side. Per-entity budgets come from exactly one path, explicit or
//! fallback, tagged so the two can never both contribute.
//!
//! Holds no state and performs no mutation; safe for unlimited concurrent
//! readers.

use crate::keys::ReconciliationKey;
use crate::model::{ActorId, EntityId, TargetRecord};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

/// Utilization ratio at and above which a within-budget actor is flagged
const APPROACHING_LIMIT_RATIO: f64 = 0.80;

/// Options controlling the view computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewOptions {
    /// Synthesize proportional fallback allocations for entities that have
    /// a declared total but no actor-level allocations at all
    pub enable_fallback: bool,
    /// Utilization ratio that classifies as approaching the limit
    pub approaching_limit_ratio: f64,
    /// Divergence between actor-level sums and the declared entity total
    /// beyond which a data-quality finding is reported
    pub inconsistency_tolerance_minutes: i64,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            approaching_limit_ratio: APPROACHING_LIMIT_RATIO,
            inconsistency_tolerance_minutes: 60,
        }
    }
}

/// Where a coverage row's allocation figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetSource {
    /// Summed from explicit actor-level allocation records
    Explicit,
    /// Synthesized proportionally from the entity-level declared total
    Fallback,
    /// No allocation data exists for the actor
    None,
}

/// Classification of an actor's consumption against their allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    OverAllocated,
    ApproachingLimit,
    WithinAllocation,
    NoAllocationSet,
}

/// One (entity, actor) pair in the reconciled output. Every actor with any
/// data for an entity appears exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    pub entity_id: EntityId,
    pub actor_id: ActorId,
    pub allocated_minutes: i64,
    pub used_minutes: i64,
    /// Allocation minus usage
    pub variance_minutes: i64,
    /// used / allocated; undefined (None) when allocation is zero
    pub utilization: Option<f64>,
    pub status: AllocationStatus,
    pub budget_source: BudgetSource,
}

/// Actor-level sums diverge from the entity's declared total beyond the
/// configured tolerance. A data-quality signal, never blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityFinding {
    pub entity_id: EntityId,
    pub actor_sum_minutes: i64,
    pub declared_total_minutes: i64,
    pub divergence_minutes: i64,
}

/// The reconciled view plus its data-quality findings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub rows: Vec<CoverageRow>,
    pub findings: Vec<QualityFinding>,
}

impl CoverageReport {
    /// Rows for one entity, in actor order
    pub fn rows_for_entity(&self, entity_id: &EntityId) -> Vec<&CoverageRow> {
        self.rows.iter().filter(|r| &r.entity_id == entity_id).collect()
    }
}

/// Deduplicate a stream by reconciliation key, rank-by-recency: for each
/// key the most recently extracted row survives. The store already merges
/// this way, but the view re-applies the rule so it stays correct when fed
/// a raw or concatenated stream.
fn dedup_latest(records: &[TargetRecord]) -> Vec<&TargetRecord> {
    let mut latest: FxHashMap<&ReconciliationKey, &TargetRecord> =
        FxHashMap::with_capacity_and_hasher(records.len(), Default::default());
    for record in records {
        match latest.get(&record.key) {
            Some(existing) if existing.extracted_at >= record.extracted_at => {}
            _ => {
                latest.insert(&record.key, record);
            }
        }
    }
    latest.into_values().collect()
}

/// Group deduplicated rows by (entity, actor) and sum their minutes.
/// Rows without an actor are entity-level and are returned separately.
fn group_by_actor(
    records: &[TargetRecord],
) -> (FxHashMap<(EntityId, ActorId), i64>, FxHashMap<EntityId, i64>) {
    let mut by_actor: FxHashMap<(EntityId, ActorId), i64> = FxHashMap::default();
    let mut entity_level: FxHashMap<EntityId, i64> = FxHashMap::default();

    for record in dedup_latest(records) {
        match &record.actor_id {
            Some(actor) => {
                *by_actor
                    .entry((record.entity_id.clone(), actor.clone()))
                    .or_insert(0) += record.minutes;
            }
            None => {
                *entity_level.entry(record.entity_id.clone()).or_insert(0) += record.minutes;
            }
        }
    }
    (by_actor, entity_level)
}

/// Distribute `total` across actors proportionally to their usage share,
/// using largest-remainder rounding so the shares sum exactly to `total`.
fn proportional_shares(total: i64, usage: &[(ActorId, i64)]) -> Vec<(ActorId, i64)> {
    let usage_sum: i64 = usage.iter().map(|(_, minutes)| *minutes).sum();
    if usage_sum <= 0 || total <= 0 {
        return usage.iter().map(|(actor, _)| (actor.clone(), 0)).collect();
    }

    let mut shares: Vec<(ActorId, i64, i64)> = usage
        .iter()
        .map(|(actor, minutes)| {
            let numerator = total * minutes;
            let floor = numerator / usage_sum;
            let remainder = numerator % usage_sum;
            (actor.clone(), floor, remainder)
        })
        .collect();

    let assigned: i64 = shares.iter().map(|(_, floor, _)| *floor).sum();
    let mut leftover = total - assigned;

    // Hand the leftover minutes to the largest remainders; ties broken by
    // actor id for determinism.
    shares.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    for share in shares.iter_mut() {
        if leftover == 0 {
            break;
        }
        share.1 += 1;
        leftover -= 1;
    }

    shares.sort_by(|a, b| a.0.cmp(&b.0));
    shares
        .into_iter()
        .map(|(actor, minutes, _)| (actor, minutes))
        .collect()
}

fn classify(allocated: i64, used: i64, ratio: f64) -> (Option<f64>, AllocationStatus) {
    if allocated <= 0 {
        return (None, AllocationStatus::NoAllocationSet);
    }
    let utilization = used as f64 / allocated as f64;
    let status = if utilization > 1.0 {
        AllocationStatus::OverAllocated
    } else if utilization >= ratio {
        AllocationStatus::ApproachingLimit
    } else {
        AllocationStatus::WithinAllocation
    };
    (Some(utilization), status)
}

/// Build the reconciled coverage view.
///
/// `allocations` and `usage` are the two synced streams; `declared_totals`
/// maps entities to their entity-level declared allocation (from the
/// reference dimension table). Entity-level allocation rows (no actor) in
/// the allocation stream supplement the declared totals for entities the
/// reference table does not cover.
pub fn build_coverage(
    allocations: &[TargetRecord],
    usage: &[TargetRecord],
    declared_totals: &FxHashMap<EntityId, i64>,
    opts: &ViewOptions,
) -> CoverageReport {
    // Steps 1 and 2: dedup each stream by key, group by (entity, actor), sum
    let (alloc_by_actor, alloc_entity_level) = group_by_actor(allocations);
    let (usage_by_actor, _) = group_by_actor(usage);

    // Step 3: the coverage set is the union of actor keys from both sides.
    // An actor with usage but no allocation, or an allocation but no usage,
    // still appears exactly once.
    let mut coverage: FxHashSet<(EntityId, ActorId)> = FxHashSet::default();
    coverage.extend(alloc_by_actor.keys().cloned());
    coverage.extend(usage_by_actor.keys().cloned());

    // Entities that have any explicit actor-level allocation
    let mut entities_with_explicit: FxHashSet<EntityId> = FxHashSet::default();
    for (entity, _) in alloc_by_actor.keys() {
        entities_with_explicit.insert(entity.clone());
    }

    let declared_total_for = |entity: &EntityId| -> Option<i64> {
        declared_totals
            .get(entity)
            .copied()
            .or_else(|| alloc_entity_level.get(entity).copied())
    };

    // Step 5 precomputation: fallback shares per entity, only for entities
    // with a declared total and no actor-level allocations at all. Entities
    // with explicit allocations never receive fallback on top.
    let mut fallback_shares: FxHashMap<(EntityId, ActorId), i64> = FxHashMap::default();
    if opts.enable_fallback {
        let mut usage_by_entity: FxHashMap<EntityId, Vec<(ActorId, i64)>> = FxHashMap::default();
        for ((entity, actor), minutes) in &usage_by_actor {
            usage_by_entity
                .entry(entity.clone())
                .or_default()
                .push((actor.clone(), *minutes));
        }
        for (entity, mut actor_usage) in usage_by_entity {
            if entities_with_explicit.contains(&entity) {
                continue;
            }
            let Some(total) = declared_total_for(&entity) else {
                continue;
            };
            if total <= 0 {
                continue;
            }
            actor_usage.sort_by(|a, b| a.0.cmp(&b.0));
            for (actor, share) in proportional_shares(total, &actor_usage) {
                fallback_shares.insert((entity.clone(), actor), share);
            }
        }
    }

    // Step 4: null-safe lookups onto the union; a missing side is zero
    let mut rows: Vec<CoverageRow> = coverage
        .into_iter()
        .map(|(entity_id, actor_id)| {
            let pair = (entity_id.clone(), actor_id.clone());
            let explicit = alloc_by_actor.get(&pair).copied();
            let used_minutes = usage_by_actor.get(&pair).copied().unwrap_or(0);

            let (allocated_minutes, budget_source) = match explicit {
                Some(minutes) => (minutes, BudgetSource::Explicit),
                None => match fallback_shares.get(&pair) {
                    Some(share) => (*share, BudgetSource::Fallback),
                    None => (0, BudgetSource::None),
                },
            };

            let (utilization, status) =
                classify(allocated_minutes, used_minutes, opts.approaching_limit_ratio);

            CoverageRow {
                entity_id,
                actor_id,
                allocated_minutes,
                used_minutes,
                variance_minutes: allocated_minutes - used_minutes,
                utilization,
                status,
                budget_source,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.entity_id
            .cmp(&b.entity_id)
            .then_with(|| a.actor_id.cmp(&b.actor_id))
    });

    // Data-quality pass: explicit actor sums vs the declared entity total
    let mut findings = Vec::new();
    let mut explicit_sums: FxHashMap<EntityId, i64> = FxHashMap::default();
    for ((entity, _), minutes) in &alloc_by_actor {
        *explicit_sums.entry(entity.clone()).or_insert(0) += minutes;
    }
    for (entity_id, actor_sum) in explicit_sums {
        let Some(declared) = declared_totals.get(&entity_id).copied() else {
            continue;
        };
        let divergence = (declared - actor_sum).abs();
        if divergence > opts.inconsistency_tolerance_minutes {
            findings.push(QualityFinding {
                entity_id,
                actor_sum_minutes: actor_sum,
                declared_total_minutes: declared,
                divergence_minutes: divergence,
            });
        }
    }
    findings.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    CoverageReport { rows, findings }
}
