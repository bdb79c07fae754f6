//! Core data types shared by the detectors, the dispatcher and the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detection::risk::RiskScore;

/// A 3-axis reading (m/s² for acceleration, rad/s for rotation rate)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Which physical sensor produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
}

/// A raw sample as delivered by the sensor subsystem
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorSample {
    /// Monotonic sensor clock in milliseconds
    pub timestamp_ms: u64,
    pub kind: SensorKind,
    pub reading: Vec3,
}

impl SensorSample {
    pub fn accelerometer(timestamp_ms: u64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp_ms, kind: SensorKind::Accelerometer, reading: Vec3::new(x, y, z) }
    }

    pub fn gyroscope(timestamp_ms: u64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp_ms, kind: SensorKind::Gyroscope, reading: Vec3::new(x, y, z) }
    }
}

/// What caused the alert, as reported to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Motion,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Motion => "motion",
            TriggerType::Manual => "manual",
        }
    }
}

/// The specific kind of detected event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TapSos,
    PossibleFall,
    ConfirmedFall,
    DoubleJerk,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TapSos => "tap_sos",
            EventKind::PossibleFall => "possible_fall",
            EventKind::ConfirmedFall => "confirmed_fall",
            EventKind::DoubleJerk => "double_jerk",
        }
    }

    /// Deliberate gestures are manual triggers, falls are motion triggers
    pub fn trigger(&self) -> TriggerType {
        match self {
            EventKind::TapSos | EventKind::DoubleJerk => TriggerType::Manual,
            EventKind::PossibleFall | EventKind::ConfirmedFall => TriggerType::Motion,
        }
    }
}

/// Severity class derived from the risk score thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Alert,
    Sos,
}

/// An event recognized by one of the detectors, ready for dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedEvent {
    pub kind: EventKind,
    pub severity: Severity,
    /// Risk breakdown (absent for tap gestures)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskScore>,
    /// Sensor clock time of detection
    pub at_ms: u64,
    /// Wall-clock time of detection
    pub detected_at: DateTime<Utc>,
}

impl DetectedEvent {
    pub fn new(kind: EventKind, severity: Severity, risk: Option<RiskScore>, at_ms: u64) -> Self {
        Self { kind, severity, risk, at_ms, detected_at: Utc::now() }
    }

    pub fn trigger(&self) -> TriggerType {
        self.kind.trigger()
    }
}

/// Application state descriptor sent along with a direct dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Foreground,
    Background,
    Killed,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Foreground => "foreground",
            AppState::Background => "background",
            AppState::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "foreground" => Some(AppState::Foreground),
            "background" => Some(AppState::Background),
            "killed" => Some(AppState::Killed),
            _ => None,
        }
    }
}

/// Get current time in milliseconds
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        assert_eq!(EventKind::ConfirmedFall.as_str(), "confirmed_fall");
        assert_eq!(EventKind::TapSos.trigger().as_str(), "manual");
        assert_eq!(EventKind::PossibleFall.trigger().as_str(), "motion");
        assert_eq!(EventKind::DoubleJerk.trigger(), TriggerType::Manual);
    }

    #[test]
    fn test_sample_serde_shape() {
        let json = r#"{"timestamp_ms":42,"kind":"gyroscope","reading":{"x":0.1,"y":0.2,"z":0.3}}"#;
        let sample: SensorSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.kind, SensorKind::Gyroscope);
        assert_eq!(sample.timestamp_ms, 42);
        assert!(sample.reading.is_finite());
    }

    #[test]
    fn test_app_state_parse() {
        assert_eq!(AppState::parse("killed"), Some(AppState::Killed));
        assert_eq!(AppState::parse("paused"), None);
    }
}
