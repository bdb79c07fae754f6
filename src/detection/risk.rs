//! Weighted risk scoring for confirmed falls.

use serde::{Deserialize, Serialize};

use crate::types::Severity;

/// Independently detected signals that contribute to a fall's risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Impact,
    FreeFall,
    PostInactivity,
    HighRotation,
    DoubleJerk,
    SustainedVibration,
    /// Regular step-like peaks just before the drop (running, jumping)
    RunningCadence,
}

impl RiskFactor {
    pub fn weight(&self) -> i32 {
        match self {
            RiskFactor::Impact => 40,
            RiskFactor::FreeFall => 30,
            RiskFactor::PostInactivity => 40,
            RiskFactor::HighRotation => 30,
            RiskFactor::DoubleJerk => 25,
            RiskFactor::SustainedVibration => 15,
            RiskFactor::RunningCadence => -20,
        }
    }
}

/// Score thresholds
#[derive(Debug, Clone, Copy)]
pub struct RiskThresholds {
    pub alert: i32,
    pub sos: i32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { alert: 50, sos: 90 }
    }
}

/// Integer accumulator of named factors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub total: i32,
    pub factors: Vec<RiskFactor>,
}

impl RiskScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factor once; repeated additions are ignored
    pub fn add(&mut self, factor: RiskFactor) {
        if !self.factors.contains(&factor) {
            self.factors.push(factor);
            self.total += factor.weight();
        }
    }

    pub fn add_if(&mut self, condition: bool, factor: RiskFactor) {
        if condition {
            self.add(factor);
        }
    }

    pub fn has(&self, factor: RiskFactor) -> bool {
        self.factors.contains(&factor)
    }

    /// `None` means the score is too low to dispatch anything
    pub fn classify(&self, thresholds: &RiskThresholds) -> Option<Severity> {
        if self.total >= thresholds.sos {
            Some(Severity::Sos)
        } else if self.total >= thresholds.alert {
            Some(Severity::Alert)
        } else {
            None
        }
    }
}
