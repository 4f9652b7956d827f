use std::collections::{BTreeMap, BTreeSet};

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, optional_text, required_text, validate_duration, validate_price};
use super::{Engine, EngineError};

/// Cleaned draft fields: name, specialties, notes.
type TechnicianFields = (String, BTreeSet<String>, Option<String>);

fn validate_draft(draft: &TechnicianDraft) -> Result<TechnicianFields, EngineError> {
    let name = required_text("technician name", &draft.name, MAX_NAME_LEN)?;
    let specialties: BTreeSet<String> = draft
        .specialties
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if specialties.len() > MAX_SPECIALTIES {
        return Err(EngineError::LimitExceeded("too many specialties"));
    }
    if !draft.rating.is_finite() || !(0.0..=MAX_RATING).contains(&draft.rating) {
        return Err(EngineError::Validation(format!(
            "rating must be between 0 and {MAX_RATING}"
        )));
    }
    let notes = optional_text("technician notes", draft.notes.as_deref(), MAX_NOTES_LEN)?;
    Ok((name, specialties, notes))
}

fn validate_tiers(tiers: &BTreeMap<Min, i64>) -> Result<(), EngineError> {
    if tiers.is_empty() {
        return Err(EngineError::Validation("a service needs at least one duration".into()));
    }
    if tiers.len() > MAX_TIERS_PER_SERVICE {
        return Err(EngineError::LimitExceeded("too many duration tiers"));
    }
    for (&duration, &price) in tiers {
        validate_duration(duration)?;
        validate_price("tier price", price)?;
    }
    Ok(())
}

impl Engine {
    // ── Technicians ──────────────────────────────────────────

    /// Add an active technician. [`MAX_TECHNICIANS`] is a soft cap: the count
    /// is read without a lock, so concurrent creates can overshoot it by the
    /// number of racing callers.
    pub async fn create_technician(&self, draft: TechnicianDraft) -> Result<Technician, EngineError> {
        if self.store.technician_count() >= MAX_TECHNICIANS {
            return Err(EngineError::LimitExceeded("too many technicians"));
        }
        let (name, specialties, notes) = validate_draft(&draft)?;
        let technician = Technician {
            id: Ulid::new(),
            name,
            active: true,
            specialties,
            experience: draft.experience,
            rating: draft.rating,
            notes,
            created_at: now_ms(),
        };
        self.commit(&mut [], &Event::TechnicianSaved(technician.clone()), true)
            .await?;
        tracing::info!("technician {} created as {}", technician.name, technician.id);
        Ok(technician)
    }

    pub async fn update_technician(
        &self,
        id: Ulid,
        draft: TechnicianDraft,
    ) -> Result<Technician, EngineError> {
        let (name, specialties, notes) = validate_draft(&draft)?;
        let mut guard = self.schedule_write(id).await?;
        let current = self.get_technician(id)?;
        let technician = Technician {
            name,
            specialties,
            experience: draft.experience,
            rating: draft.rating,
            notes,
            ..current
        };
        self.commit(&mut [&mut *guard], &Event::TechnicianSaved(technician.clone()), false)
            .await?;
        Ok(technician)
    }

    /// Soft removal. Existing bookings keep their technician snapshot and
    /// stay valid; the technician just stops showing up as available.
    pub async fn set_technician_active(&self, id: Ulid, active: bool) -> Result<Technician, EngineError> {
        let mut guard = self.schedule_write(id).await?;
        let current = self.get_technician(id)?;
        if current.active == active {
            return Ok(current);
        }
        let technician = Technician { active, ..current };
        self.commit(&mut [&mut *guard], &Event::TechnicianSaved(technician.clone()), false)
            .await?;
        tracing::info!(
            "technician {} {}",
            technician.name,
            if active { "activated" } else { "deactivated" }
        );
        Ok(technician)
    }

    /// Physical removal. Refused while any booking, of any status, names the
    /// technician. The technician's blocks go with it.
    pub async fn delete_technician(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.schedule_write(id).await?;
        if self.store.has_bookings_for(&id) {
            return Err(EngineError::HasBookings(id));
        }
        self.commit(&mut [&mut *guard], &Event::TechnicianDeleted { id }, false)
            .await?;
        tracing::info!("technician {id} deleted");
        Ok(())
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn create_service(
        &self,
        name: &str,
        description: Option<&str>,
        tiers: BTreeMap<Min, i64>,
    ) -> Result<Service, EngineError> {
        validate_tiers(&tiers)?;
        let service = Service {
            id: Ulid::new(),
            name: required_text("service name", name, MAX_NAME_LEN)?,
            description: optional_text("service description", description, MAX_NOTES_LEN)?,
            tiers,
            active: true,
        };
        self.commit(&mut [], &Event::ServiceSaved(service.clone()), true)
            .await?;
        Ok(service)
    }

    /// Replace a service's name, description and tiers. Bookings already made
    /// keep the price they were quoted.
    pub async fn update_service(
        &self,
        id: Ulid,
        name: &str,
        description: Option<&str>,
        tiers: BTreeMap<Min, i64>,
    ) -> Result<Service, EngineError> {
        validate_tiers(&tiers)?;
        let current = self.store.service(&id).ok_or(EngineError::NotFound(id))?;
        let service = Service {
            name: required_text("service name", name, MAX_NAME_LEN)?,
            description: optional_text("service description", description, MAX_NOTES_LEN)?,
            tiers,
            ..current
        };
        self.commit(&mut [], &Event::ServiceSaved(service.clone()), false)
            .await?;
        Ok(service)
    }

    pub async fn set_service_active(&self, id: Ulid, active: bool) -> Result<Service, EngineError> {
        let current = self.store.service(&id).ok_or(EngineError::NotFound(id))?;
        let service = Service { active, ..current };
        self.commit(&mut [], &Event::ServiceSaved(service.clone()), false)
            .await?;
        Ok(service)
    }

    pub async fn create_additional_service(
        &self,
        name: &str,
        price: i64,
    ) -> Result<AdditionalService, EngineError> {
        validate_price("price", price)?;
        let extra = AdditionalService {
            id: Ulid::new(),
            name: required_text("additional service name", name, MAX_NAME_LEN)?,
            price,
            active: true,
        };
        self.commit(&mut [], &Event::AdditionalServiceSaved(extra.clone()), true)
            .await?;
        Ok(extra)
    }

    pub async fn update_additional_service(
        &self,
        id: Ulid,
        name: &str,
        price: i64,
    ) -> Result<AdditionalService, EngineError> {
        validate_price("price", price)?;
        let current = self
            .store
            .additional_service(&id)
            .ok_or(EngineError::NotFound(id))?;
        let extra = AdditionalService {
            name: required_text("additional service name", name, MAX_NAME_LEN)?,
            price,
            ..current
        };
        self.commit(&mut [], &Event::AdditionalServiceSaved(extra.clone()), false)
            .await?;
        Ok(extra)
    }

    pub async fn set_additional_service_active(
        &self,
        id: Ulid,
        active: bool,
    ) -> Result<AdditionalService, EngineError> {
        let current = self
            .store
            .additional_service(&id)
            .ok_or(EngineError::NotFound(id))?;
        let extra = AdditionalService { active, ..current };
        self.commit(&mut [], &Event::AdditionalServiceSaved(extra.clone()), false)
            .await?;
        Ok(extra)
    }
}
