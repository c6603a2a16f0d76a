//! Plan Limits and Quota Enforcement
//!
//! Decisions are synchronous, deterministic given current counts, and
//! side-effect free. Serialization against concurrent creates is the
//! caller's job via [`TenantStore::admission_guard`].

use crate::store::TenantStore;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use geoqb_common::model::{PlanTable, Tenant, UsageKind};
use serde::Serialize;
use std::sync::Arc;

/// Quota enforcer
pub struct QuotaEnforcer {
    store: Arc<TenantStore>,
    plans: PlanTable,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<TenantStore>, plans: PlanTable) -> Self {
        Self { store, plans }
    }

    /// May this tenant create another layer? Counts all layers under its
    /// workspaces regardless of status.
    pub fn check_layer_quota(&self, tenant: &Tenant) -> QuotaDecision {
        let Some(limits) = self.plans.limits_for(tenant.plan) else {
            return QuotaDecision::Allowed;
        };
        let count = self.store.layer_count_for_tenant(&tenant.tenant_id);
        if count >= limits.max_layers {
            tracing::debug!(
                tenant_id = %tenant.tenant_id,
                count,
                limit = limits.max_layers,
                "layer quota denied"
            );
            QuotaDecision::Denied(format!(
                "Layer limit reached ({count}/{}). Upgrade your plan to create more layers.",
                limits.max_layers
            ))
        } else {
            QuotaDecision::Allowed
        }
    }

    /// May this tenant execute another query this billing period?
    pub fn check_query_quota(&self, tenant: &Tenant) -> QuotaDecision {
        let Some(limits) = self.plans.limits_for(tenant.plan) else {
            return QuotaDecision::Allowed;
        };
        let (start, end) = current_period();
        let count =
            self.store
                .usage_count_in(&tenant.tenant_id, UsageKind::QueryExecuted, start, end);
        if count >= limits.max_queries_per_month {
            QuotaDecision::Denied(format!(
                "Query limit reached ({count}/{} this month). Upgrade your plan to execute more queries.",
                limits.max_queries_per_month
            ))
        } else {
            QuotaDecision::Allowed
        }
    }

    /// Usage snapshot for the current billing period
    pub fn usage_stats(&self, tenant: &Tenant) -> UsageStats {
        let (period_start, period_end) = current_period();
        let layers_created = self.store.layer_count_for_tenant(&tenant.tenant_id);
        let queries_executed = self.store.usage_count_in(
            &tenant.tenant_id,
            UsageKind::QueryExecuted,
            period_start,
            period_end,
        );
        let limits = self.plans.limits_for(tenant.plan);
        let layers_limit = limits.map(|l| l.max_layers);
        let queries_limit = limits.map(|l| l.max_queries_per_month);
        let over_quota = layers_limit.is_some_and(|l| layers_created >= l)
            || queries_limit.is_some_and(|l| queries_executed >= l);

        UsageStats {
            period_start,
            period_end,
            layers_created,
            layers_limit,
            queries_executed,
            queries_limit,
            over_quota,
        }
    }
}

/// Current UTC calendar-month window: [first-of-month, first-of-next-month)
fn current_period() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap();
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
    (start, end)
}

/// Quota decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    /// Message is rendered verbatim to the caller
    Denied(String),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Usage statistics for the current billing period. `None` limits mean
/// unlimited (Enterprise).
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub layers_created: u64,
    pub layers_limit: Option<u64>,
    pub queries_executed: u64,
    pub queries_limit: Option<u64>,
    pub over_quota: bool,
}
