//! Quota manager (spec §4.7), grounded on
//! `fabric_cf/actor/core/util/quota_mgr.py`: checked before accepting a
//! ticket request and on close, backed by an external identity/quota
//! service (§6) fronted by an in-process default sufficient for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::ResourceType;
use crate::time::Term;

/// The external quota/identity service (spec §6): `list_quotas`/
/// `update_quota_usage` are the only I/O the quota manager performs.
pub trait QuotaService: Send + Sync {
    fn remaining_quota(&self, project_id: &str, resource_type: &ResourceType) -> Result<u64>;
    fn update_quota_usage(&self, project_id: &str, resource_type: &ResourceType, delta: i64) -> Result<()>;
}

/// Resource-hours requested by a term/unit-count pair, the unit the
/// quota manager compares against a project's remaining balance.
pub fn resource_hours(units: u64, term: &Term) -> u64 {
    let hours = term.full_length().num_seconds().max(0) as u64 / 3600;
    units.saturating_mul(hours.max(1))
}

pub struct QuotaManager<S: QuotaService> {
    service: S,
    /// Resource-hours already charged per (project, type), so `close`
    /// can subtract the unused remainder idempotently even if called
    /// more than once for the same reservation.
    charged: RwLock<HashMap<(String, ResourceType), u64>>,
}

impl<S: QuotaService> QuotaManager<S> {
    pub fn new(service: S) -> Self {
        QuotaManager { service, charged: RwLock::new(HashMap::new()) }
    }

    /// Checked before accepting a ticket request: rejects with
    /// `InsufficientResources` if the requested resource-hours exceed
    /// the project's remaining quota.
    pub fn reserve(&self, project_id: &str, resource_type: &ResourceType, units: u64, term: &Term) -> Result<()> {
        let requested = resource_hours(units, term);
        let remaining = self.service.remaining_quota(project_id, resource_type)?;
        if requested > remaining {
            return Err(Error::InsufficientResources(format!(
                "project {} requested {} resource-hours of {}, {} remaining",
                project_id, requested, resource_type, remaining
            )));
        }
        self.service.update_quota_usage(project_id, resource_type, requested as i64)?;
        let mut charged = self.charged.write().expect("quota lock poisoned");
        *charged.entry((project_id.to_string(), resource_type.clone())).or_insert(0) += requested;
        Ok(())
    }

    /// Subtracts the unused remainder on close. Idempotent: a second
    /// call for the same key finds nothing left charged and is a no-op.
    pub fn release(&self, project_id: &str, resource_type: &ResourceType) -> Result<()> {
        let mut charged = self.charged.write().expect("quota lock poisoned");
        if let Some(amount) = charged.remove(&(project_id.to_string(), resource_type.clone())) {
            self.service.update_quota_usage(project_id, resource_type, -(amount as i64))?;
        }
        Ok(())
    }
}

/// Default in-process quota service: an unlimited balance per project,
/// sufficient for the test suite without a live identity service.
pub struct InMemoryQuotaService {
    balances: RwLock<HashMap<(String, ResourceType), u64>>,
    default_balance: u64,
}

impl InMemoryQuotaService {
    pub fn new(default_balance: u64) -> Self {
        InMemoryQuotaService { balances: RwLock::new(HashMap::new()), default_balance }
    }

    pub fn set_balance(&self, project_id: impl Into<String>, resource_type: ResourceType, balance: u64) {
        let mut balances = self.balances.write().expect("quota lock poisoned");
        balances.insert((project_id.into(), resource_type), balance);
    }
}

impl QuotaService for InMemoryQuotaService {
    fn remaining_quota(&self, project_id: &str, resource_type: &ResourceType) -> Result<u64> {
        let balances = self.balances.read().expect("quota lock poisoned");
        Ok(balances.get(&(project_id.to_string(), resource_type.clone())).copied().unwrap_or(self.default_balance))
    }

    fn update_quota_usage(&self, project_id: &str, resource_type: &ResourceType, delta: i64) -> Result<()> {
        let mut balances = self.balances.write().expect("quota lock poisoned");
        let entry = balances.entry((project_id.to_string(), resource_type.clone())).or_insert(self.default_balance);
        *entry = entry.saturating_sub(delta.max(0) as u64).saturating_add((-delta).max(0) as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(hours: i64) -> Term {
        let start = chrono::DateTime::from_timestamp_millis(0).unwrap();
        let end = start + chrono::Duration::hours(hours);
        Term::new(start, end)
    }

    #[test]
    fn reserve_rejects_when_over_remaining_quota() {
        let service = InMemoryQuotaService::new(0);
        service.set_balance("proj-1", ResourceType::new("VM"), 5);
        let manager = QuotaManager::new(service);
        assert!(manager.reserve("proj-1", &ResourceType::new("VM"), 10, &term(1)).is_err());
        assert!(manager.reserve("proj-1", &ResourceType::new("VM"), 2, &term(1)).is_ok());
    }

    #[test]
    fn release_is_idempotent() {
        let service = InMemoryQuotaService::new(100);
        let manager = QuotaManager::new(service);
        manager.reserve("proj-1", &ResourceType::new("VM"), 2, &term(1)).unwrap();
        manager.release("proj-1", &ResourceType::new("VM")).unwrap();
        assert!(manager.release("proj-1", &ResourceType::new("VM")).is_ok());
    }
}
