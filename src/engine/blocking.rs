use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{format_minutes, parse_span};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{now_ms, optional_text};
use super::{Engine, EngineError};

impl Engine {
    /// Take a technician out of availability for `[start, end)` on `date`.
    /// Blocks may overlap bookings and each other.
    pub async fn block_time(
        &self,
        technician_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
        reason: Option<&str>,
    ) -> Result<BlockedSlot, EngineError> {
        let span = parse_span(start, end)?;
        let reason = optional_text("reason", reason, MAX_REASON_LEN)?;
        let mut guard = self.schedule_write(technician_id).await?;
        // A delete may have won the lock first.
        self.get_technician(technician_id)?;

        let block = BlockedSlot {
            id: Ulid::new(),
            technician_id,
            date,
            span,
            reason,
            created_at: now_ms(),
        };
        self.commit(&mut [&mut *guard], &Event::TimeBlocked(block.clone()), true)
            .await?;
        metrics::counter!(observability::BLOCK_CHANGES_TOTAL, "op" => "block").increment(1);
        tracing::info!(
            "blocked {technician_id} on {date} {}-{}",
            format_minutes(span.start),
            format_minutes(span.end)
        );
        Ok(block)
    }

    /// Move or re-label an existing block. The date stays.
    pub async fn update_block(
        &self,
        id: Ulid,
        start: &str,
        end: &str,
        reason: Option<&str>,
    ) -> Result<BlockedSlot, EngineError> {
        let span = parse_span(start, end)?;
        let reason = optional_text("reason", reason, MAX_REASON_LEN)?;
        let technician_id = self.store.block(&id).ok_or(EngineError::NotFound(id))?.technician_id;
        let mut guard = self.schedule_write(technician_id).await?;
        let current = self.store.block(&id).ok_or(EngineError::NotFound(id))?;

        let updated = BlockedSlot {
            span,
            reason,
            ..current
        };
        self.commit(&mut [&mut *guard], &Event::BlockUpdated(updated.clone()), false)
            .await?;
        metrics::counter!(observability::BLOCK_CHANGES_TOTAL, "op" => "update").increment(1);
        Ok(updated)
    }

    /// Lift a block. Returns what was removed.
    pub async fn unblock_time(&self, id: Ulid) -> Result<BlockedSlot, EngineError> {
        let technician_id = self.store.block(&id).ok_or(EngineError::NotFound(id))?.technician_id;
        let mut guard = self.schedule_write(technician_id).await?;
        let removed = self.store.block(&id).ok_or(EngineError::NotFound(id))?;

        self.commit(
            &mut [&mut *guard],
            &Event::TimeUnblocked { id, technician_id },
            false,
        )
        .await?;
        metrics::counter!(observability::BLOCK_CHANGES_TOTAL, "op" => "unblock").increment(1);
        tracing::info!("unblocked {id} for {technician_id}");
        Ok(removed)
    }
}
