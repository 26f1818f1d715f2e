use crate::limits::MAX_PROVIDERS_PER_DEPARTMENT;
use crate::model::*;
use crate::store::Backend;

use super::{Engine, EngineError};

/// Pick the provider with the strictly smallest load. On a tie the earlier
/// entry wins, so the result only depends on input order.
pub fn least_loaded(loads: impl IntoIterator<Item = (ProviderId, u32)>) -> Option<ProviderId> {
    let mut best: Option<(ProviderId, u32)> = None;
    for (provider, load) in loads {
        if best.is_none_or(|(_, min)| load < min) {
            best = Some((provider, load));
        }
    }
    best.map(|(provider, _)| provider)
}

impl<S: Backend> Engine<S> {
    /// Least-loaded provider of the slot's department, load measured on the
    /// slot's own date and period. Recomputed from the load index every call.
    pub async fn select_provider(&self, key: &SlotKey) -> Result<ProviderId, EngineError> {
        let providers = self.store.list_providers(key.department).await?;
        if providers.len() > MAX_PROVIDERS_PER_DEPARTMENT {
            return Err(EngineError::LimitExceeded("too many providers in department"));
        }
        let mut loads = Vec::with_capacity(providers.len());
        for provider in providers {
            let load = self
                .store
                .count_active(provider, key.date, key.period)
                .await?;
            loads.push((provider, load));
        }
        least_loaded(loads).ok_or(EngineError::NoEligibleProvider(key.department))
    }
}
