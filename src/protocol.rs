//! Wire protocol between the bridge and the motion controller.
//!
//! Newline-delimited ASCII:
//!
//! | Direction | Frame | Meaning |
//! |---|---|---|
//! | in  | `CAP <bean_id> <position>` | photograph and classify this bean |
//! | out | `RES <bean_id> <label>`    | classification for the echoed bean |
//! | out | `HOME`, `ZERO`, `JOG <k>`  | operator commands (see `operator`) |
//!
//! Anything else arriving on the link is controller chatter and is ignored.

use crate::classifier::Label;
use crate::error::ProtocolError;
use std::fmt;

/// Keyword of the capture command.
pub const CAPTURE_KEYWORD: &str = "CAP";

/// Keyword of the response frame.
pub const RESPONSE_KEYWORD: &str = "RES";

/// A parsed `CAP` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureRequest {
    /// Identifier assigned by the controller; echoed, never validated
    pub bean_id: u64,
    /// Slot index along the rig; not echoed
    pub position: u32,
}

/// Classification of one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed capture command
    Capture(CaptureRequest),
    /// Not addressed to the bridge
    Other,
}

/// Parse one trimmed inbound line.
///
/// Lines whose first token is not exactly `CAP` are [`Inbound::Other`]. A `CAP` line
/// with the wrong field count or a field that is not a non-negative integer is a
/// [`ProtocolError`].
pub fn parse_line(line: &str) -> Result<Inbound, ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&CAPTURE_KEYWORD) {
        return Ok(Inbound::Other);
    }
    if tokens.len() != 3 {
        return Err(ProtocolError::FieldCount(tokens.len()));
    }

    let bean_id = tokens[1]
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidField {
            field: "bean_id",
            value: tokens[1].to_string(),
        })?;
    let position = tokens[2]
        .parse::<u32>()
        .map_err(|_| ProtocolError::InvalidField {
            field: "position",
            value: tokens[2].to_string(),
        })?;

    Ok(Inbound::Capture(CaptureRequest { bean_id, position }))
}

/// A `RES` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Echoed bean identifier
    pub bean_id: u64,
    /// Classification result (possibly the fail-safe label)
    pub label: Label,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", RESPONSE_KEYWORD, self.bean_id, self.label)
    }
}
