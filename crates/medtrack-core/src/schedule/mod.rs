//! Schedule types for medications and dose outcomes.
//!
//! A [`MedicationSchedule`] is the unit the reminder engine operates on.
//! Only `time_of_day` and `active` influence trigger computation; the
//! remaining fields travel with the alert or are kept for the user.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Nominal daily trigger time, hour and minute.
///
/// Serialized as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::InvalidTimeOfDay {
                input: format!("{hour}:{minute}"),
                message: "hour must be 0-23 and minute 0-59".into(),
            });
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// The wall-clock time with seconds zeroed.
    pub fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// Truncate a wall-clock time to hour and minute.
    pub fn from_naive(time: NaiveTime) -> Self {
        // NaiveTime guarantees hour < 24 and minute < 60
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ValidationError::InvalidTimeOfDay {
            input: s.to_string(),
            message: message.to_string(),
        };

        let (h, m) = s.trim().split_once(':').ok_or_else(|| invalid("expected HH:MM"))?;
        let hour: u8 = h.parse().map_err(|_| invalid("hour is not a number"))?;
        let minute: u8 = m.parse().map_err(|_| invalid("minute is not a number"))?;
        if m.len() != 2 {
            return Err(invalid("minute must have two digits"));
        }
        Self::new(hour, minute).map_err(|_| invalid("hour must be 0-23 and minute 0-59"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// A medication with a single daily reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationSchedule {
    /// Assigned by the store; never changes.
    pub id: i64,
    pub name: String,
    pub dosage: String,
    #[serde(default)]
    pub instructions: String,
    pub time_of_day: TimeOfDay,
    /// Informational start date as entered by the user.
    #[serde(default)]
    pub start_date: String,
    /// "Daily", "Every 12 hours" or free text. Never used for computation.
    #[serde(default = "default_frequency")]
    pub frequency_label: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_frequency() -> String {
    "Daily".to_string()
}

fn default_true() -> bool {
    true
}

/// Fields for a medication that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub dosage: String,
    #[serde(default)]
    pub instructions: String,
    pub time_of_day: TimeOfDay,
    #[serde(default)]
    pub start_date: String,
    #[serde(default = "default_frequency")]
    pub frequency_label: String,
}

impl NewMedication {
    pub fn new(name: impl Into<String>, dosage: impl Into<String>, time_of_day: TimeOfDay) -> Self {
        Self {
            name: name.into(),
            dosage: dosage.into(),
            instructions: String::new(),
            time_of_day,
            start_date: String::new(),
            frequency_label: default_frequency(),
        }
    }

    /// Attach the id the store assigned.
    pub fn with_id(self, id: i64) -> MedicationSchedule {
        MedicationSchedule {
            id,
            name: self.name,
            dosage: self.dosage,
            instructions: self.instructions,
            time_of_day: self.time_of_day,
            start_date: self.start_date,
            frequency_label: self.frequency_label,
            active: true,
        }
    }
}

/// What happened to a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoseOutcome {
    Taken,
    Missed,
}

impl DoseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseOutcome::Taken => "Taken",
            DoseOutcome::Missed => "Missed",
        }
    }
}

impl fmt::Display for DoseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoseOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Taken" | "taken" => Ok(DoseOutcome::Taken),
            "Missed" | "missed" => Ok(DoseOutcome::Missed),
            other => Err(ValidationError::InvalidValue {
                field: "status".into(),
                message: format!("unknown dose outcome '{other}'"),
            }),
        }
    }
}

/// One row of dose history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub medication_name: String,
    pub recorded_at: DateTime<Utc>,
    pub outcome: DoseOutcome,
}
