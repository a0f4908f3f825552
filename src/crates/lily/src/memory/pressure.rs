//! Context-pressure sampling.
//!
//! Every tenth turn the host samples an estimate of context usage. The
//! resulting level scales the next recall budget; at critical pressure
//! injection is suppressed entirely. Compaction resets the scale to normal.

/// Turns between samples.
pub const SAMPLE_INTERVAL: u64 = 10;

/// Pressure level derived from context-usage percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl PressureLevel {
    /// Thresholds at 60 / 80 / 90 percent.
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            Self::Critical
        } else if percent >= 80.0 {
            Self::High
        } else if percent >= 60.0 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }

    /// Budget multiplier for the next recall.
    pub fn scale(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Elevated => 0.75,
            Self::High => 0.5,
            Self::Critical => 0.0,
        }
    }
}

/// Mutable pressure state held by the memory engine.
#[derive(Debug)]
pub struct PressureState {
    level: PressureLevel,
}

impl Default for PressureState {
    fn default() -> Self {
        Self {
            level: PressureLevel::Normal,
        }
    }
}

impl PressureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample: an estimated token count against the context cap.
    pub fn observe(&mut self, estimated_tokens: u64, context_cap: u64) -> PressureLevel {
        let percent = if context_cap == 0 {
            0.0
        } else {
            estimated_tokens as f64 / context_cap as f64 * 100.0
        };
        self.level = PressureLevel::from_percent(percent);
        self.level
    }

    pub fn level(&self) -> PressureLevel {
        self.level
    }

    /// Effective budget for the next recall.
    pub fn effective_budget(&self, base_budget: usize) -> usize {
        (base_budget as f64 * self.level.scale()).floor() as usize
    }

    /// Compaction resets pressure to normal.
    pub fn reset(&mut self) {
        self.level = PressureLevel::Normal;
    }
}
