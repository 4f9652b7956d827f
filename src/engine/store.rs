use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedSchedule;

/// Everything the engine knows, rebuilt from the journal on start.
///
/// Catalog rows and booking/block records live in plain maps. Occupancy lives
/// in the per-technician [`Schedule`]s, which callers lock before changing.
pub struct InMemoryStore {
    technicians: DashMap<Ulid, Technician>,
    services: DashMap<Ulid, Service>,
    additional_services: DashMap<Ulid, AdditionalService>,
    bookings: DashMap<Ulid, Booking>,
    blocks: DashMap<Ulid, BlockedSlot>,
    /// Booking code → booking id. Codes stay reserved after cancellation.
    codes: DashMap<String, Ulid>,
    schedules: DashMap<Ulid, SharedSchedule>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            technicians: DashMap::new(),
            services: DashMap::new(),
            additional_services: DashMap::new(),
            bookings: DashMap::new(),
            blocks: DashMap::new(),
            codes: DashMap::new(),
            schedules: DashMap::new(),
        }
    }

    // ── Catalog reads ────────────────────────────────────────

    pub fn technician_count(&self) -> usize {
        self.technicians.len()
    }

    pub fn technician(&self, id: &Ulid) -> Option<Technician> {
        self.technicians.get(id).map(|e| e.value().clone())
    }

    /// All technicians ordered by name, then id.
    pub fn technicians(&self) -> Vec<Technician> {
        let mut all: Vec<Technician> = self.technicians.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        all
    }

    pub fn active_technicians(&self) -> Vec<Technician> {
        let mut active = self.technicians();
        active.retain(|t| t.active);
        active
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn services(&self) -> Vec<Service> {
        let mut all: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        all
    }

    pub fn additional_service(&self, id: &Ulid) -> Option<AdditionalService> {
        self.additional_services.get(id).map(|e| e.value().clone())
    }

    pub fn additional_services(&self) -> Vec<AdditionalService> {
        let mut all: Vec<AdditionalService> = self
            .additional_services
            .iter()
            .map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        all
    }

    // ── Schedules ────────────────────────────────────────────

    pub fn schedule(&self, technician_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(technician_id).map(|e| e.value().clone())
    }

    // ── Bookings and blocks ──────────────────────────────────

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn booking_id_for_code(&self, code: &str) -> Option<Ulid> {
        self.codes.get(code).map(|e| *e.value())
    }

    /// Claim `code` for `booking_id`. False if some booking already holds it.
    pub fn reserve_code(&self, code: &str, booking_id: Ulid) -> bool {
        match self.codes.entry(code.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(booking_id);
                true
            }
        }
    }

    /// Undo a reservation whose booking never made it into the journal.
    pub fn release_code(&self, code: &str, booking_id: Ulid) {
        self.codes.remove_if(code, |_, owner| *owner == booking_id);
    }

    pub fn has_bookings_for(&self, technician_id: &Ulid) -> bool {
        self.bookings
            .iter()
            .any(|e| e.value().technician.id == *technician_id)
    }

    /// Bookings matching `filter`, newest first.
    pub fn bookings_where(&self, filter: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Bookings on `date` in start order.
    pub fn bookings_on(&self, date: NaiveDate) -> Vec<Booking> {
        let mut out = self.bookings_where(|b| b.date == date);
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        out
    }

    pub fn block(&self, id: &Ulid) -> Option<BlockedSlot> {
        self.blocks.get(id).map(|e| e.value().clone())
    }

    /// Blocks matching `filter`, ordered by date then start.
    pub fn blocks_where(&self, filter: impl Fn(&BlockedSlot) -> bool) -> Vec<BlockedSlot> {
        let mut out: Vec<BlockedSlot> = self
            .blocks
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            (a.date, a.span.start, a.id).cmp(&(b.date, b.span.start, b.id))
        });
        out
    }

    // ── Event application ────────────────────────────────────

    /// Fold one committed event into memory. Occupancy events need the
    /// schedules of every technician they touch, already write-locked by the
    /// caller.
    pub fn apply(&self, schedules: &mut [&mut Schedule], event: &Event) {
        match event {
            Event::TechnicianSaved(t) => {
                self.schedules
                    .entry(t.id)
                    .or_insert_with(|| Arc::new(RwLock::new(Schedule::new(t.id))));
                self.technicians.insert(t.id, t.clone());
            }
            Event::TechnicianDeleted { id } => {
                self.technicians.remove(id);
                self.schedules.remove(id);
                self.blocks.retain(|_, b| b.technician_id != *id);
            }
            Event::ServiceSaved(s) => {
                self.services.insert(s.id, s.clone());
            }
            Event::AdditionalServiceSaved(s) => {
                self.additional_services.insert(s.id, s.clone());
            }
            Event::BookingCreated(b) => {
                if b.status.holds_slot() {
                    match schedule_for(schedules, b.technician.id) {
                        Some(rs) => rs.insert_interval(b.date, booking_interval(b.id, b.span)),
                        None => tracing::warn!("booking {} applied without its schedule", b.id),
                    }
                }
                self.codes.insert(b.code.clone(), b.id);
                self.bookings.insert(b.id, b.clone());
            }
            Event::BookingStatusChanged {
                id,
                technician_id,
                status,
                is_paid,
                payment_method,
            } => {
                let Some(mut booking) = self.bookings.get_mut(id) else {
                    tracing::warn!("status change for unknown booking {id}");
                    return;
                };
                booking.status = *status;
                booking.is_paid = *is_paid;
                booking.payment_method = payment_method.clone();
                if !status.holds_slot()
                    && let Some(rs) = schedule_for(schedules, *technician_id)
                {
                    rs.remove_interval(booking.date, *id);
                }
            }
            Event::BookingRescheduled {
                id,
                from_technician_id,
                technician,
                date,
                span,
            } => {
                let Some(mut booking) = self.bookings.get_mut(id) else {
                    tracing::warn!("reschedule of unknown booking {id}");
                    return;
                };
                if let Some(rs) = schedule_for(schedules, *from_technician_id) {
                    rs.remove_interval(booking.date, *id);
                }
                booking.technician = technician.clone();
                booking.date = *date;
                booking.span = *span;
                if booking.status.holds_slot() {
                    match schedule_for(schedules, technician.id) {
                        Some(rs) => rs.insert_interval(*date, booking_interval(*id, *span)),
                        None => tracing::warn!("booking {id} moved without its target schedule"),
                    }
                }
            }
            Event::BookingDetailsUpdated { id, customer, .. } => match self.bookings.get_mut(id) {
                Some(mut booking) => booking.customer = customer.clone(),
                None => tracing::warn!("details update for unknown booking {id}"),
            },
            Event::BookingDeleted { id, technician_id } => {
                // The code stays in the index so it is never handed out again.
                if let Some((_, old)) = self.bookings.remove(id)
                    && let Some(rs) = schedule_for(schedules, *technician_id)
                {
                    rs.remove_interval(old.date, old.id);
                }
            }
            Event::TimeBlocked(block) => {
                match schedule_for(schedules, block.technician_id) {
                    Some(rs) => rs.insert_interval(block.date, block_interval(block.id, block.span)),
                    None => tracing::warn!("block {} applied without its schedule", block.id),
                }
                self.blocks.insert(block.id, block.clone());
            }
            Event::BlockUpdated(block) => {
                let previous = self.blocks.insert(block.id, block.clone());
                if let Some(rs) = schedule_for(schedules, block.technician_id) {
                    if let Some(old) = previous {
                        rs.remove_interval(old.date, old.id);
                    }
                    rs.insert_interval(block.date, block_interval(block.id, block.span));
                }
            }
            Event::TimeUnblocked { id, technician_id } => {
                if let Some((_, old)) = self.blocks.remove(id)
                    && let Some(rs) = schedule_for(schedules, *technician_id)
                {
                    rs.remove_interval(old.date, old.id);
                }
            }
        }
    }

    /// Minimal event list that rebuilds the current state from scratch.
    /// Parents come before the records that reference them.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.services().into_iter().map(Event::ServiceSaved));
        events.extend(
            self.additional_services()
                .into_iter()
                .map(Event::AdditionalServiceSaved),
        );
        events.extend(self.technicians().into_iter().map(Event::TechnicianSaved));
        let mut bookings = self.bookings_where(|_| true);
        bookings.reverse();
        events.extend(bookings.into_iter().map(Event::BookingCreated));
        events.extend(self.blocks_where(|_| true).into_iter().map(Event::TimeBlocked));
        events
    }
}

fn schedule_for<'s>(schedules: &'s mut [&mut Schedule], technician_id: Ulid) -> Option<&'s mut Schedule> {
    schedules
        .iter_mut()
        .find(|s| s.technician_id == technician_id)
        .map(|s| &mut **s)
}

fn booking_interval(id: Ulid, span: Span) -> Interval {
    Interval {
        id,
        span,
        kind: IntervalKind::Booking,
    }
}

fn block_interval(id: Ulid, span: Span) -> Interval {
    Interval {
        id,
        span,
        kind: IntervalKind::Block,
    }
}
