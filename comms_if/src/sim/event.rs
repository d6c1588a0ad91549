//! # Simulator event envelope
//!
//! The simulator wraps every payload in a socket.io style event string, for example
//! `42["telemetry",{...}]`. The leading `4` marks a websocket message and the `2` an event. An
//! event which carries no data (`null`) means the simulator is being driven manually, and the
//! controller must answer with the manual message.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde_json::{self, Value};
use thiserror::Error;

use super::{SteerCmd, Telemetry};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Prefix of every event message
pub const EVENT_PREFIX: &str = "42";

/// Name of the telemetry event
pub const TELEMETRY_EVENT: &str = "telemetry";

/// Name of the steering command event
pub const STEER_EVENT: &str = "steer";

/// Message sent back to the simulator when an event carries no data
pub const MANUAL_MSG: &str = "42[\"manual\",{}]";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// An event received from the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// New telemetry, a steering command is expected in response.
    Telemetry(Telemetry),

    /// The event carried no data, the simulator is in manual mode.
    Manual,

    /// A well formed event which the controller does not handle, containing the event name.
    Unhandled(String),
}

/// Errors which can occur while parsing an event.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Event contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Event is not a [name, payload] array")]
    NotAnArray,

    #[error("Event name is not a string")]
    InvalidName,

    #[error("Telemetry payload is malformed: {0}")]
    InvalidTelemetry(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimEvent {
    /// Parse an event from a raw message.
    ///
    /// Returns `Ok(None)` if the message is not an event message at all, in which case no response
    /// should be sent.
    pub fn parse(msg: &str) -> Result<Option<Self>, EventParseError> {
        // Only event messages are handled
        if msg.len() <= EVENT_PREFIX.len() || !msg.starts_with(EVENT_PREFIX) {
            return Ok(None)
        }

        // Extract the data array, no data means manual mode
        let data = match extract_data(msg) {
            Some(d) => d,
            None => return Ok(Some(SimEvent::Manual))
        };

        let val: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return Err(EventParseError::InvalidJson(e))
        };

        let arr = match val.as_array() {
            Some(a) => a,
            None => return Err(EventParseError::NotAnArray)
        };

        let name = match arr.get(0).and_then(|n| n.as_str()) {
            Some(n) => n,
            None => return Err(EventParseError::InvalidName)
        };

        match name {
            TELEMETRY_EVENT => {
                let payload = arr.get(1).cloned().unwrap_or(Value::Null);
                serde_json::from_value(payload)
                    .map(|t| Some(SimEvent::Telemetry(t)))
                    .map_err(EventParseError::InvalidTelemetry)
            },
            other => Ok(Some(SimEvent::Unhandled(other.to_string())))
        }
    }
}

impl SteerCmd {
    /// Wrap this command in a steer event message ready to be sent to the simulator.
    pub fn to_event_msg(&self) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(self)?;
        Ok(format!("{}[\"{}\",{}]", EVENT_PREFIX, STEER_EVENT, payload))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Get the JSON array contained in the message, or `None` if the message carries no data.
fn extract_data(msg: &str) -> Option<&str> {
    if msg.contains("null") {
        return None
    }

    let start = msg.find('[')?;
    let end = msg.rfind(']')?;

    if end < start {
        return None
    }

    Some(&msg[start..=end])
}
