use crate::clock::{format_minutes, to_minutes};
use crate::engine::EngineError;
use crate::model::{Min, Span, END_OF_DAY};

/// Grid of bookable start times for a business day.
///
/// Start times run from `open` to `last_start` inclusive, `granularity` minutes
/// apart. The grid is the same every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingCalendar {
    open: Min,
    last_start: Min,
    granularity: Min,
}

impl Default for OperatingCalendar {
    /// Half-hour grid, 09:00 to 21:30.
    fn default() -> Self {
        Self {
            open: 9 * 60,
            last_start: 21 * 60 + 30,
            granularity: 30,
        }
    }
}

impl OperatingCalendar {
    pub fn new(open: Min, last_start: Min, granularity: Min) -> Result<Self, EngineError> {
        if granularity == 0 {
            return Err(EngineError::Validation("slot granularity must be positive".into()));
        }
        if open > last_start {
            return Err(EngineError::Validation(format!(
                "opening {} is after last start {}",
                format_minutes(open),
                format_minutes(last_start)
            )));
        }
        if last_start >= END_OF_DAY {
            return Err(EngineError::Validation("last start must be before 24:00".into()));
        }
        Ok(Self {
            open,
            last_start,
            granularity,
        })
    }

    pub fn from_wall_clock(open: &str, last_start: &str, granularity: Min) -> Result<Self, EngineError> {
        Self::new(to_minutes(open)?, to_minutes(last_start)?, granularity)
    }

    pub fn open(&self) -> Min {
        self.open
    }

    pub fn last_start(&self) -> Min {
        self.last_start
    }

    pub fn granularity(&self) -> Min {
        self.granularity
    }

    /// Candidate start times, ascending.
    pub fn slots(&self) -> impl Iterator<Item = Min> + use<> {
        let last = self.last_start;
        (self.open..=last).step_by(self.granularity as usize)
    }

    pub fn is_slot(&self, t: Min) -> bool {
        t >= self.open && t <= self.last_start && (t - self.open) % self.granularity == 0
    }

    /// From opening to the end of the last slot.
    pub fn operating_window(&self) -> Span {
        Span::new(self.open, (self.last_start + self.granularity).min(END_OF_DAY))
    }
}
