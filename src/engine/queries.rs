use std::collections::BTreeMap;
use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::format_minutes;
use crate::code;
use crate::model::*;
use crate::observability;

use super::availability::{free_windows, open_slots};
use super::conflict::validate_duration;
use super::{Engine, EngineError};

impl Engine {
    /// Every calendar slot on `date` with the active technicians free for the
    /// whole `[slot, slot + duration)`. Slots nobody can take are left out.
    pub async fn find_available_slots(
        &self,
        date: NaiveDate,
        duration: Min,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        validate_duration(duration)?;
        let started = Instant::now();

        let mut by_slot: BTreeMap<Min, Vec<TechnicianSummary>> = BTreeMap::new();
        for technician in self.store.active_technicians() {
            let Some(shared) = self.store.schedule(&technician.id) else {
                continue;
            };
            let guard = shared.read().await;
            for slot in open_slots(self.calendar(), &guard, date, duration) {
                by_slot
                    .entry(slot)
                    .or_default()
                    .push(TechnicianSummary::from(&technician));
            }
        }

        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL, "scope" => "all").increment(1);
        metrics::histogram!(observability::AVAILABILITY_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        Ok(by_slot
            .into_iter()
            .map(|(slot, technicians)| SlotAvailability {
                time: format_minutes(slot),
                technicians,
            })
            .collect())
    }

    /// Start times at which one technician is free. Inactive technicians have
    /// none. `duration` defaults to one calendar step.
    pub async fn find_technician_availability(
        &self,
        technician_id: Ulid,
        date: NaiveDate,
        duration: Option<Min>,
    ) -> Result<Vec<String>, EngineError> {
        let duration = duration.unwrap_or(self.calendar().granularity());
        validate_duration(duration)?;
        let technician = self
            .store
            .technician(&technician_id)
            .ok_or(EngineError::NotFound(technician_id))?;
        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL, "scope" => "technician").increment(1);
        if !technician.active {
            return Ok(Vec::new());
        }
        let shared = self
            .store
            .schedule(&technician_id)
            .ok_or(EngineError::NotFound(technician_id))?;
        let guard = shared.read().await;
        Ok(open_slots(self.calendar(), &guard, date, duration)
            .into_iter()
            .map(format_minutes)
            .collect())
    }

    /// What is left of the operating window once bookings and blocks are cut out.
    pub async fn technician_free_windows(
        &self,
        technician_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let shared = self
            .store
            .schedule(&technician_id)
            .ok_or(EngineError::NotFound(technician_id))?;
        let guard = shared.read().await;
        Ok(free_windows(self.calendar().operating_window(), guard.day(date)))
    }

    // ── Store reads ──────────────────────────────────────────

    pub fn get_technician(&self, id: Ulid) -> Result<Technician, EngineError> {
        self.store.technician(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn list_technicians(&self) -> Vec<Technician> {
        self.store.technicians()
    }

    pub fn list_active_technicians(&self) -> Vec<Technician> {
        self.store.active_technicians()
    }

    pub fn list_services(&self) -> Vec<Service> {
        self.store.services()
    }

    pub fn list_additional_services(&self) -> Vec<AdditionalService> {
        self.store.additional_services()
    }

    pub fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.booking(&id).ok_or(EngineError::NotFound(id))
    }

    /// Case-insensitive lookup tolerant of O/0 and I/L/1 mix-ups.
    pub fn lookup_booking_by_code(&self, input: &str) -> Result<Booking, EngineError> {
        let normalized = code::normalize(input, &self.settings.code_prefix);
        self.store
            .booking_id_for_code(&normalized)
            .and_then(|id| self.store.booking(&id))
            .ok_or(EngineError::CodeNotFound(normalized))
    }

    /// All bookings, newest first.
    pub fn list_bookings(&self) -> Vec<Booking> {
        self.store.bookings_where(|_| true)
    }

    /// Bookings on `date`, every status, in start order.
    pub fn list_bookings_for_date(&self, date: NaiveDate) -> Vec<Booking> {
        self.store.bookings_on(date)
    }

    pub fn list_bookings_for_technician(&self, technician_id: Ulid) -> Vec<Booking> {
        self.store.bookings_where(|b| b.technician.id == technician_id)
    }

    pub fn list_blocked_slots(&self) -> Vec<BlockedSlot> {
        self.store.blocks_where(|_| true)
    }

    pub fn list_blocked_slots_for_date(&self, date: NaiveDate) -> Vec<BlockedSlot> {
        self.store.blocks_where(|b| b.date == date)
    }

    pub fn list_blocked_slots_for_technician(&self, technician_id: Ulid) -> Vec<BlockedSlot> {
        self.store.blocks_where(|b| b.technician_id == technician_id)
    }
}
