use ulid::Ulid;

use crate::model::{DaySlots, Reservation, ResourceInfo};
use crate::slot::{self, SlotCode};

use super::availability::{day_slots, is_available};
use super::{Engine, EngineError, SharedResourceState};

/// Which reservations a listing returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Mine(String),
}

impl Engine {
    /// Is the half-day slot free right now? Answered by the same
    /// predicate the booking path runs, so the two never disagree on a
    /// stable state.
    pub async fn availability(
        &self,
        resource_id: Ulid,
        date: &str,
        slot: SlotCode,
    ) -> Result<bool, EngineError> {
        let span = slot::to_span(date, slot)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(is_available(&guard, &span))
    }

    /// Both half-day slots of one resource day at a glance.
    pub async fn resource_day_slots(
        &self,
        resource_id: Ulid,
        date: &str,
    ) -> Result<DaySlots, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(day_slots(&guard, date)?)
    }

    pub async fn list_reservations(
        &self,
        scope: Scope,
        include_inactive: bool,
    ) -> Vec<Reservation> {
        // Collect the Arcs first; never hold a DashMap ref across an await.
        let resources: Vec<SharedResourceState> =
            self.state.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            for r in &guard.reservations {
                if !include_inactive && !r.is_active {
                    continue;
                }
                if let Scope::Mine(owner) = &scope
                    && &r.owner_id != owner
                {
                    continue;
                }
                out.push(r.clone());
            }
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let resource_id = self.resource_for_reservation(&id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.find(id).cloned()
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let resources: Vec<SharedResourceState> =
            self.state.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            out.push(ResourceInfo {
                id: guard.id,
                name: guard.name.clone(),
                kind: guard.kind,
                capacity_hint: guard.capacity_hint,
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }
}
