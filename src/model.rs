use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight. The only time-of-day type.
pub type Min = u32;

/// Unix milliseconds, used for creation stamps and expiry.
pub type Ms = i64;

/// Last representable instant of a day (`24:00`).
pub const END_OF_DAY: Min = 24 * 60;

/// Half-open interval `[start, end)` in minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Min,
    pub end: Min,
}

impl Span {
    pub fn new(start: Min, end: Min) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Min {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Min) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technician {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
    pub specialties: BTreeSet<String>,
    /// Years of experience.
    pub experience: u32,
    pub rating: f32,
    pub notes: Option<String>,
    pub created_at: Ms,
}

/// Fields accepted when creating or editing a technician.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicianDraft {
    pub name: String,
    pub specialties: BTreeSet<String>,
    pub experience: u32,
    pub rating: f32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    /// Price per supported duration, keyed by minutes.
    pub tiers: BTreeMap<Min, i64>,
    pub active: bool,
}

impl Service {
    pub fn price_for(&self, duration: Min) -> Option<i64> {
        self.tiers.get(&duration).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalService {
    pub id: Ulid,
    pub name: String,
    pub price: i64,
    pub active: bool,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a booking in this status still occupies the technician.
    pub fn holds_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: String,
    pub notes: Option<String>,
}

/// Weak reference to the technician, with the name as it was at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicianRef {
    pub id: Ulid,
    pub name: String,
}

/// Name and price captured when the booking was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedItem {
    pub id: Ulid,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub code: String,
    pub customer: Customer,
    pub technician: TechnicianRef,
    pub service: PricedItem,
    pub duration: Min,
    pub additional_services: Vec<PricedItem>,
    pub date: NaiveDate,
    pub span: Span,
    pub total_amount: i64,
    pub deposit_amount: i64,
    pub is_paid: bool,
    pub status: BookingStatus,
    pub payment_method: Option<String>,
    pub qr_payload: String,
    pub created_at: Ms,
}

impl Booking {
    pub fn start_time(&self) -> String {
        crate::clock::format_minutes(self.span.start)
    }

    pub fn end_time(&self) -> String {
        crate::clock::format_minutes(self.span.end)
    }
}

/// Input to booking admission. Times are wall-clock strings as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_notes: Option<String>,
    pub technician_id: Ulid,
    pub service_id: Ulid,
    pub duration: Min,
    pub additional_service_ids: Vec<Ulid>,
    pub date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedSlot {
    pub id: Ulid,
    pub technician_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub reason: Option<String>,
    pub created_at: Ms,
}

// ── Schedules ────────────────────────────────────────────────────

/// What occupies a stretch of a technician's day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Booking,
    Block,
}

/// A single occupied interval. Bookings and blocks are both just intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

/// Per-technician occupancy, bucketed by day. Cancelled bookings are not kept here.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub technician_id: Ulid,
    /// Intervals per day, each list sorted by `span.start`.
    days: BTreeMap<NaiveDate, Vec<Interval>>,
}

impl Schedule {
    pub fn new(technician_id: Ulid) -> Self {
        Self {
            technician_id,
            days: BTreeMap::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, date: NaiveDate, interval: Interval) {
        let day = self.days.entry(date).or_default();
        let pos = day
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, date: NaiveDate, id: Ulid) -> Option<Interval> {
        let day = self.days.get_mut(&date)?;
        let pos = day.iter().position(|i| i.id == id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.days.remove(&date);
        }
        Some(removed)
    }

    pub fn day(&self, date: NaiveDate) -> &[Interval] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Intervals on `date` whose span overlaps `query`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Interval> {
        let day = self.day(date);
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = day.partition_point(|i| i.span.start < query.end);
        let query_start = query.start;
        day[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query_start)
    }

    pub fn is_free(&self, date: NaiveDate, query: &Span) -> bool {
        self.overlapping(date, query).next().is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Flat state-change records. This is the journal format; new variants go at
/// the end so existing journals keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TechnicianSaved(Technician),
    TechnicianDeleted {
        id: Ulid,
    },
    ServiceSaved(Service),
    AdditionalServiceSaved(AdditionalService),
    BookingCreated(Booking),
    BookingStatusChanged {
        id: Ulid,
        technician_id: Ulid,
        status: BookingStatus,
        is_paid: bool,
        payment_method: Option<String>,
    },
    TimeBlocked(BlockedSlot),
    BlockUpdated(BlockedSlot),
    TimeUnblocked {
        id: Ulid,
        technician_id: Ulid,
    },
    /// Moved in time, to another technician, or both. Duration is unchanged.
    BookingRescheduled {
        id: Ulid,
        from_technician_id: Ulid,
        technician: TechnicianRef,
        date: NaiveDate,
        span: Span,
    },
    BookingDetailsUpdated {
        id: Ulid,
        technician_id: Ulid,
        customer: Customer,
    },
    BookingDeleted {
        id: Ulid,
        technician_id: Ulid,
    },
}

impl Event {
    /// Technician whose schedule this event touches, if any.
    pub fn technician_id(&self) -> Option<Ulid> {
        match self {
            Event::TechnicianSaved(t) => Some(t.id),
            Event::TechnicianDeleted { id } => Some(*id),
            Event::BookingCreated(b) => Some(b.technician.id),
            Event::BookingRescheduled { technician, .. } => Some(technician.id),
            Event::BookingStatusChanged { technician_id, .. }
            | Event::BookingDetailsUpdated { technician_id, .. }
            | Event::BookingDeleted { technician_id, .. }
            | Event::TimeUnblocked { technician_id, .. } => Some(*technician_id),
            Event::TimeBlocked(b) | Event::BlockUpdated(b) => Some(b.technician_id),
            Event::ServiceSaved(_) | Event::AdditionalServiceSaved(_) => None,
        }
    }

    /// Every technician whose schedule the event changes. Only a move between
    /// technicians names two.
    pub fn touched_technicians(&self) -> Vec<Ulid> {
        match self {
            Event::BookingRescheduled {
                from_technician_id,
                technician,
                ..
            } if *from_technician_id != technician.id => vec![*from_technician_id, technician.id],
            other => other.technician_id().into_iter().collect(),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicianSummary {
    pub id: Ulid,
    pub name: String,
    pub specialties: BTreeSet<String>,
    pub rating: f32,
}

impl From<&Technician> for TechnicianSummary {
    fn from(t: &Technician) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            specialties: t.specialties.clone(),
            rating: t.rating,
        }
    }
}

/// A candidate start time and the technicians free for the whole requested duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotAvailability {
    pub time: String,
    pub technicians: Vec<TechnicianSummary>,
}
