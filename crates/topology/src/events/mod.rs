//! Kubernetes events: mapping to structured events and the periodic
//! events check that feeds them to a sender.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod check;
mod mapper;

pub use check::{convert_filter, EventSender, EventWatcher, EventsCheck, MemoryEventSender};
pub use mapper::{EventContext, EventMapper, MappedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Alerts,
    Changes,
    Activities,
    Others,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Alerts => "Alerts",
            EventCategory::Changes => "Changes",
            EventCategory::Activities => "Activities",
            EventCategory::Others => "Others",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown event category {:?}, expected one of Alerts, Changes, Activities, Others",
            self.0
        )
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for EventCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Alerts" => Ok(EventCategory::Alerts),
            "Changes" => Ok(EventCategory::Changes),
            "Activities" => Ok(EventCategory::Activities),
            "Others" => Ok(EventCategory::Others),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Info,
    Warning,
    Error,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Info => "info",
            AlertType::Warning => "warning",
            AlertType::Error => "error",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
