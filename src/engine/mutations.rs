use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, oneshot};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::slot::{self, SlotCode};

use super::availability::first_conflict;
use super::conflict::{Attempt, MAX_CREATE_ATTEMPTS, backoff, now_ms};
use super::{Engine, EngineError, WalCommand, apply_to_resource};

impl Engine {
    pub async fn register_resource(
        &self,
        id: Ulid,
        name: String,
        kind: ResourceKind,
        capacity_hint: u32,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceRegistered {
            id,
            name: name.clone(),
            kind,
            capacity_hint,
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name, kind, capacity_hint);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    pub async fn remove_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let guard = rs.read().await;
        if guard.reservations.iter().any(|r| r.is_active) {
            return Err(EngineError::HasActiveReservations(id));
        }
        let retained: Vec<Ulid> = guard.reservations.iter().map(|r| r.id).collect();
        drop(guard);

        let event = Event::ResourceRemoved { id };
        self.wal_append(&event).await?;
        for rid in retained {
            self.reservation_to_resource.remove(&rid);
        }
        self.state.remove(&id);
        Ok(())
    }

    /// Book one half-day slot. At most one active reservation per
    /// (resource, date, slot) survives concurrent calls.
    ///
    /// Attempting → Conflicted → (Retry | Failed) → Committed: each
    /// attempt re-reads current state under the resource write lock, so
    /// the conflict check and the insert are atomic with respect to
    /// other writers. A conflicted attempt backs off and retries — the
    /// occupant may be cancelled in the meantime — until the budget is
    /// spent, which surfaces as `SlotTaken`.
    pub async fn create(
        &self,
        owner_id: &str,
        resource_id: Ulid,
        date: &str,
        slot: SlotCode,
    ) -> Result<Reservation, EngineError> {
        if owner_id.len() > MAX_OWNER_ID_LEN {
            return Err(EngineError::LimitExceeded("owner id too long"));
        }
        let span = slot::to_span(date, slot)?;
        let start = Instant::now();

        let mut attempt = 1u32;
        loop {
            match self
                .try_create(owner_id, resource_id, date, slot, span)
                .await?
            {
                Attempt::Committed(reservation) => {
                    metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                    metrics::histogram!(observability::CREATE_DURATION_SECONDS)
                        .record(start.elapsed().as_secs_f64());
                    return Ok(reservation);
                }
                Attempt::Conflicted { holder } => {
                    metrics::counter!(observability::CREATE_CONFLICTS_TOTAL).increment(1);
                    if attempt >= MAX_CREATE_ATTEMPTS {
                        metrics::counter!(observability::SLOT_TAKEN_TOTAL).increment(1);
                        return Err(EngineError::SlotTaken { resource_id, span });
                    }
                    debug!(
                        %resource_id, %holder, attempt,
                        "slot occupied, backing off before retry"
                    );
                }
                Attempt::StoreFailed(e) => {
                    if attempt >= MAX_CREATE_ATTEMPTS {
                        return Err(EngineError::Wal(e));
                    }
                    warn!(%resource_id, attempt, error = %e, "commit failed, retrying");
                }
            }
            metrics::counter!(observability::CREATE_RETRIES_TOTAL).increment(1);
            tokio::time::sleep(backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// One check-then-insert attempt under the resource write lock.
    async fn try_create(
        &self,
        owner_id: &str,
        resource_id: Ulid,
        date: &str,
        slot: SlotCode,
        span: Span,
    ) -> Result<Attempt, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }

        if let Some(holder) = first_conflict(&guard, &span) {
            return Ok(Attempt::Conflicted { holder: holder.id });
        }

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id,
            owner_id: owner_id.to_string(),
            span,
            slot,
            date: date.to_string(),
            is_active: true,
            created_at: now_ms(),
            cancelled_at: None,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        if let Err(EngineError::Wal(e)) = self.wal_append(&event).await {
            return Ok(Attempt::StoreFailed(e));
        }
        apply_to_resource(&mut guard, &event, &self.reservation_to_resource);
        self.notify.publish(ChangeEvent {
            kind: ChangeKind::Created,
            reservation: reservation.clone(),
        });
        Ok(Attempt::Committed(reservation))
    }

    /// Logical cancellation: the row stays for history with
    /// `is_active = false`. A non-admin may only cancel their own
    /// reservation; an already-cancelled row reads as `NotFound` and
    /// never emits a second event.
    pub async fn cancel(
        &self,
        requester_id: &str,
        is_admin: bool,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let row = guard.find(id).ok_or(EngineError::NotFound(id))?;
        if !row.is_active {
            return Err(EngineError::NotFound(id));
        }
        if !is_admin && row.owner_id != requester_id {
            return Err(EngineError::Forbidden(id));
        }

        let at = now_ms();
        let mut snapshot = row.clone();
        snapshot.is_active = false;
        snapshot.cancelled_at = Some(at);

        let event = Event::ReservationCancelled { id, resource_id, at };
        self.commit(
            &mut guard,
            &event,
            ChangeEvent {
                kind: ChangeKind::Cancelled,
                reservation: snapshot.clone(),
            },
        )
        .await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        Ok(snapshot)
    }

    /// Physically remove a row. Administrative cleanup of history only;
    /// the caller boundary restricts it to admins.
    pub async fn hard_delete(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let snapshot = guard.find(id).ok_or(EngineError::NotFound(id))?.clone();

        let event = Event::ReservationDeleted { id, resource_id };
        self.commit(
            &mut guard,
            &event,
            ChangeEvent {
                kind: ChangeKind::Deleted,
                reservation: snapshot.clone(),
            },
        )
        .await?;
        metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(1);
        Ok(snapshot)
    }

    /// Admin-only full-row overwrite. Does not re-run the availability
    /// predicate, so it can break the non-overlap invariant; the caller
    /// boundary restricts it to trusted admins. Moving a reservation to
    /// a different resource is rejected.
    pub async fn update(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        if reservation.span.start >= reservation.span.end {
            return Err(EngineError::InvalidUpdate("span start must be before end"));
        }
        let (resource_id, mut guard) = self.resolve_reservation_write(&reservation.id).await?;
        if resource_id != reservation.resource_id {
            return Err(EngineError::InvalidUpdate(
                "reservation cannot move to another resource",
            ));
        }

        let event = Event::ReservationUpdated {
            reservation: reservation.clone(),
        };
        self.commit(
            &mut guard,
            &event,
            ChangeEvent {
                kind: ChangeKind::Updated,
                reservation: reservation.clone(),
            },
        )
        .await?;
        Ok(reservation)
    }

    /// Rows whose history outlived the retention window: cancelled
    /// longer than `retention_ms` ago, or ended longer than
    /// `retention_ms` ago. Fed to `hard_delete` by the retention sweep.
    pub fn collect_stale(&self, now: Ms, retention_ms: Ms) -> Vec<Ulid> {
        let mut stale = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for r in &guard.reservations {
                    let cancelled_long_ago = r
                        .cancelled_at
                        .is_some_and(|at| at + retention_ms <= now);
                    let ended_long_ago = r.span.end + retention_ms <= now;
                    if cancelled_long_ago || ended_long_ago {
                        stale.push(r.id);
                    }
                }
            }
        }
        stale
    }

    /// Rewrite the WAL with only the events needed to recreate the
    /// current state. Each retained row replays as a single Created
    /// event carrying its full snapshot, inactive rows included.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let resources: Vec<super::SharedResourceState> =
            self.state.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            events.push(Event::ResourceRegistered {
                id: guard.id,
                name: guard.name.clone(),
                kind: guard.kind,
                capacity_hint: guard.capacity_hint,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
