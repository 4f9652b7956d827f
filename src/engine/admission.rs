use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{checked_end, to_minutes};
use crate::code;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    check_no_conflict, deposit_for, now_ms, optional_text, required_text, total_for,
    validate_duration,
};
use super::{Engine, EngineError, ScheduleGuard};

impl Engine {
    /// Admit a booking as `pending`. Everything is checked again under the
    /// technician's write lock, so of two racing requests for overlapping
    /// time only one commits.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let result = self.admit(request).await;
        if let Err(e) = &result {
            metrics::counter!(observability::OPERATION_ERRORS_TOTAL, "kind" => e.kind()).increment(1);
        }
        result
    }

    async fn admit(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let customer = Customer {
            name: required_text("customer name", &request.customer_name, MAX_NAME_LEN)?,
            phone: required_text("customer phone", &request.customer_phone, MAX_PHONE_LEN)?,
            notes: optional_text("customer notes", request.customer_notes.as_deref(), MAX_NOTES_LEN)?,
        };

        validate_duration(request.duration)?;
        let start = to_minutes(&request.start_time)?;
        if !self.calendar().is_slot(start) {
            return Err(EngineError::Validation(format!(
                "{} is not a bookable start time",
                request.start_time
            )));
        }
        let span = Span::new(start, checked_end(start, request.duration)?);

        let service = self
            .store
            .service(&request.service_id)
            .ok_or(EngineError::NotFound(request.service_id))?;
        if !service.active {
            return Err(EngineError::Validation(format!("service {} is inactive", service.name)));
        }
        let price = service.price_for(request.duration).ok_or_else(|| {
            EngineError::Validation(format!(
                "{} is not offered for {} minutes",
                service.name, request.duration
            ))
        })?;

        if request.additional_service_ids.len() > MAX_ADDITIONAL_SERVICES {
            return Err(EngineError::LimitExceeded("too many additional services"));
        }
        let mut seen = HashSet::new();
        let mut additional_services = Vec::with_capacity(request.additional_service_ids.len());
        for id in &request.additional_service_ids {
            if !seen.insert(*id) {
                return Err(EngineError::Validation(format!("additional service {id} listed twice")));
            }
            let extra = self
                .store
                .additional_service(id)
                .ok_or(EngineError::NotFound(*id))?;
            if !extra.active {
                return Err(EngineError::Validation(format!(
                    "additional service {} is inactive",
                    extra.name
                )));
            }
            additional_services.push(PricedItem {
                id: extra.id,
                name: extra.name,
                price: extra.price,
            });
        }

        let total_amount = total_for(price, &additional_services)?;
        let deposit_amount = deposit_for(total_amount, self.settings.deposit_percent)?;

        let mut guard = self.schedule_write(request.technician_id).await?;
        // Activation flips also take this lock, so the flag read here holds
        // until commit.
        let technician = self
            .store
            .technician(&request.technician_id)
            .ok_or(EngineError::NotFound(request.technician_id))?;
        if !technician.active {
            return Err(EngineError::Validation(format!("technician {} is inactive", technician.name)));
        }
        if let Err(e) = check_no_conflict(&guard, request.date, &span, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::warn!(
                "booking refused: {} on {} {}-{} overlaps",
                technician.name,
                request.date,
                crate::clock::format_minutes(span.start),
                crate::clock::format_minutes(span.end)
            );
            return Err(e);
        }

        let id = Ulid::new();
        let code = self.reserve_fresh_code(id)?;
        let created_at = now_ms();
        let booking = Booking {
            id,
            qr_payload: code::qr_payload(&code, created_at),
            code,
            customer,
            technician: TechnicianRef {
                id: technician.id,
                name: technician.name,
            },
            service: PricedItem {
                id: service.id,
                name: service.name,
                price,
            },
            duration: request.duration,
            additional_services,
            date: request.date,
            span,
            total_amount,
            deposit_amount,
            is_paid: false,
            status: BookingStatus::Pending,
            payment_method: None,
            created_at,
        };

        let event = Event::BookingCreated(booking.clone());
        if let Err(e) = self.commit(&mut [&mut *guard], &event, true).await {
            self.store.release_code(&booking.code, id);
            return Err(e);
        }

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "booking {} ({}) for {} on {} at {}",
            booking.code,
            booking.id,
            booking.technician.name,
            booking.date,
            booking.start_time()
        );
        Ok(booking)
    }

    fn reserve_fresh_code(&self, booking_id: Ulid) -> Result<String, EngineError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = code::generate(&self.settings.code_prefix);
            if self.store.reserve_code(&candidate, booking_id) {
                return Ok(candidate);
            }
            tracing::debug!("booking code {candidate} already taken, drawing again");
        }
        Err(EngineError::LimitExceeded("no unused booking code"))
    }

    /// Confirm a pending booking once the verifier approves the payment.
    pub async fn verify_payment(&self, booking_id: Ulid, method: &str) -> Result<Booking, EngineError> {
        let method = required_text("payment method", method, MAX_PAYMENT_METHOD_LEN)?;
        let booking = self.get_booking(booking_id)?;
        ensure_pending(&booking, "verify payment for")?;

        // The verifier may be slow; nothing is locked while it runs.
        if !self.verifier.verify(booking_id).await {
            metrics::counter!(observability::PAYMENT_VERIFICATIONS_TOTAL, "outcome" => "declined").increment(1);
            tracing::info!("payment for booking {} declined", booking.code);
            return Err(EngineError::PaymentDeclined(booking_id));
        }
        metrics::counter!(observability::PAYMENT_VERIFICATIONS_TOTAL, "outcome" => "approved").increment(1);

        let confirmed = self
            .transition(booking_id, "verify payment for", BookingStatus::Confirmed, true, Some(method))
            .await?;
        tracing::info!("booking {} confirmed", confirmed.code);
        Ok(confirmed)
    }

    /// Cancel a pending booking and free its time.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let cancelled = self
            .transition(booking_id, "cancel", BookingStatus::Cancelled, false, None)
            .await?;
        tracing::info!("booking {} cancelled", cancelled.code);
        Ok(cancelled)
    }

    /// Cancel every pending booking whose payment window closed at or before
    /// `now`. Returns the cancelled ids.
    pub async fn expire_stale_pending_bookings(&self, now: Ms) -> Vec<Ulid> {
        let ttl = self.settings.pending_ttl_ms;
        let stale = self
            .store
            .bookings_where(|b| b.status == BookingStatus::Pending && b.created_at.saturating_add(ttl) <= now);

        let mut expired = Vec::new();
        for booking in stale {
            match self
                .transition(booking.id, "expire", BookingStatus::Cancelled, false, None)
                .await
            {
                Ok(_) => {
                    metrics::counter!(observability::PENDING_EXPIRED_TOTAL).increment(1);
                    tracing::info!("expired unpaid booking {}", booking.code);
                    expired.push(booking.id);
                }
                Err(e) => tracing::debug!("skipped expiring {}: {e}", booking.code),
            }
        }
        expired
    }

    /// Move a live booking to another start, date or technician. The
    /// duration and prices stay as booked. Both technicians are locked for
    /// the move, so the target slot is checked against everything committed.
    pub async fn reschedule_booking(
        &self,
        booking_id: Ulid,
        technician_id: Ulid,
        date: NaiveDate,
        start_time: &str,
    ) -> Result<Booking, EngineError> {
        let start = to_minutes(start_time)?;
        if !self.calendar().is_slot(start) {
            return Err(EngineError::Validation(format!("{start_time} is not a bookable start time")));
        }

        // The booking may change technician while we wait for locks; retry
        // against wherever it is now.
        let (mut from_guard, mut to_guard, current) = loop {
            let from = self.get_booking(booking_id)?.technician.id;
            let (from_guard, to_guard) = self.schedule_write_pair(from, technician_id).await?;
            let current = self.get_booking(booking_id)?;
            if current.technician.id == from {
                break (from_guard, to_guard, current);
            }
        };
        ensure_live(&current, "reschedule")?;

        let technician = self
            .store
            .technician(&technician_id)
            .ok_or(EngineError::NotFound(technician_id))?;
        if !technician.active {
            return Err(EngineError::Validation(format!("technician {} is inactive", technician.name)));
        }
        let span = Span::new(start, checked_end(start, current.duration)?);
        let target: &Schedule = match &to_guard {
            Some(guard) => &**guard,
            None => &*from_guard,
        };
        if let Err(e) = check_no_conflict(target, date, &span, Some(booking_id)) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::warn!(
                "reschedule of {} refused: {} on {date} {start_time} is taken",
                current.code,
                technician.name
            );
            return Err(e);
        }

        let event = Event::BookingRescheduled {
            id: booking_id,
            from_technician_id: current.technician.id,
            technician: TechnicianRef {
                id: technician.id,
                name: technician.name,
            },
            date,
            span,
        };
        match to_guard.as_mut() {
            Some(to) => self.commit(&mut [&mut *from_guard, &mut **to], &event, false).await?,
            None => self.commit(&mut [&mut *from_guard], &event, false).await?,
        }
        let moved = self.get_booking(booking_id)?;
        tracing::info!(
            "booking {} moved to {} on {} at {}",
            moved.code,
            moved.technician.name,
            moved.date,
            moved.start_time()
        );
        Ok(moved)
    }

    /// Correct the customer's name, phone or notes on a live booking.
    pub async fn update_booking_details(
        &self,
        booking_id: Ulid,
        customer_name: &str,
        customer_phone: &str,
        customer_notes: Option<&str>,
    ) -> Result<Booking, EngineError> {
        let customer = Customer {
            name: required_text("customer name", customer_name, MAX_NAME_LEN)?,
            phone: required_text("customer phone", customer_phone, MAX_PHONE_LEN)?,
            notes: optional_text("customer notes", customer_notes, MAX_NOTES_LEN)?,
        };
        let (mut guard, current) = self.lock_booking(booking_id).await?;
        ensure_live(&current, "edit")?;

        let event = Event::BookingDetailsUpdated {
            id: booking_id,
            technician_id: current.technician.id,
            customer,
        };
        self.commit(&mut [&mut *guard], &event, false).await?;
        self.get_booking(booking_id)
    }

    /// Remove a booking outright, whatever its status. Its code is not reused.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let (mut guard, current) = self.lock_booking(booking_id).await?;

        let event = Event::BookingDeleted {
            id: booking_id,
            technician_id: current.technician.id,
        };
        self.commit(&mut [&mut *guard], &event, false).await?;
        tracing::info!("booking {} deleted", current.code);
        Ok(())
    }

    /// Write-lock the schedule of the booking's current technician and return
    /// the booking as seen under that lock.
    async fn lock_booking(&self, booking_id: Ulid) -> Result<(ScheduleGuard, Booking), EngineError> {
        loop {
            let technician_id = self.get_booking(booking_id)?.technician.id;
            let guard = self.schedule_write(technician_id).await?;
            let current = self.get_booking(booking_id)?;
            // A reschedule may have moved it while we waited.
            if current.technician.id == technician_id {
                return Ok((guard, current));
            }
        }
    }

    /// Move a pending booking to `to`, under its technician's write lock.
    async fn transition(
        &self,
        booking_id: Ulid,
        action: &'static str,
        to: BookingStatus,
        is_paid: bool,
        payment_method: Option<String>,
    ) -> Result<Booking, EngineError> {
        let (mut guard, current) = self.lock_booking(booking_id).await?;
        ensure_pending(&current, action)?;

        let event = Event::BookingStatusChanged {
            id: booking_id,
            technician_id: current.technician.id,
            status: to,
            is_paid,
            payment_method,
        };
        self.commit(&mut [&mut *guard], &event, false).await?;
        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        self.get_booking(booking_id)
    }
}

/// Cancelled bookings are history and cannot be edited.
fn ensure_live(booking: &Booking, action: &'static str) -> Result<(), EngineError> {
    if !booking.status.holds_slot() {
        return Err(EngineError::InvalidState {
            id: booking.id,
            status: booking.status,
            action,
        });
    }
    Ok(())
}

/// Confirmed and cancelled are terminal.
fn ensure_pending(booking: &Booking, action: &'static str) -> Result<(), EngineError> {
    if booking.status != BookingStatus::Pending {
        return Err(EngineError::InvalidState {
            id: booking.id,
            status: booking.status,
            action,
        });
    }
    Ok(())
}
