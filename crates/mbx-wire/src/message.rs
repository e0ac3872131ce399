use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};

/// Maximum length of a transport endpoint name, in bytes.
pub const MAX_ENDPOINT_NAME: usize = 256;
/// Maximum length of a box name, in bytes.
pub const MAX_BOX_NAME: usize = 32;
/// Maximum length of a reply's human-readable message, in bytes.
pub const MAX_REPLY_MESSAGE: usize = 1024;
/// Upper bound on a decoded frame's payload.
pub const MAX_FRAME: usize = 64 * 1024;

/// A registration request: the unit the dispatcher queues and workers
/// consume. `endpoint` names the transport endpoint the session answers
/// on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    RegisterPublisher { endpoint: String, box_name: String },
    RegisterSubscriber { endpoint: String, box_name: String },
    CreateBox { endpoint: String, box_name: String },
    RemoveBox { endpoint: String, box_name: String },
    ListBoxes { endpoint: String },
}

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::RegisterPublisher { .. } => 1,
            Self::RegisterSubscriber { .. } => 2,
            Self::CreateBox { .. } => 3,
            Self::RemoveBox { .. } => 5,
            Self::ListBoxes { .. } => 7,
        }
    }

    pub fn opcode_name(&self) -> &'static str {
        match self {
            Self::RegisterPublisher { .. } => "RegisterPublisher",
            Self::RegisterSubscriber { .. } => "RegisterSubscriber",
            Self::CreateBox { .. } => "CreateBox",
            Self::RemoveBox { .. } => "RemoveBox",
            Self::ListBoxes { .. } => "ListBoxes",
        }
    }

    /// The transport endpoint this session answers on.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::RegisterPublisher { endpoint, .. }
            | Self::RegisterSubscriber { endpoint, .. }
            | Self::CreateBox { endpoint, .. }
            | Self::RemoveBox { endpoint, .. }
            | Self::ListBoxes { endpoint } => endpoint,
        }
    }

    /// The box this request targets, if any (`ListBoxes` has none).
    pub fn box_name(&self) -> Option<&str> {
        match self {
            Self::RegisterPublisher { box_name, .. }
            | Self::RegisterSubscriber { box_name, .. }
            | Self::CreateBox { box_name, .. }
            | Self::RemoveBox { box_name, .. } => Some(box_name),
            Self::ListBoxes { .. } => None,
        }
    }

    /// Check the fixed field limits.
    pub fn validate(&self) -> WireResult<()> {
        check_len("endpoint name", self.endpoint(), MAX_ENDPOINT_NAME)?;
        if let Some(box_name) = self.box_name() {
            check_len("box name", box_name, MAX_BOX_NAME)?;
        }
        Ok(())
    }
}

/// Snapshot of one box in a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxSummary {
    pub name: String,
    pub byte_count: u64,
    pub publisher_count: u64,
    pub subscriber_count: u64,
    /// Set on the final record of a listing.
    pub last: bool,
}

/// A reply record sent back over the session's transport endpoint.
///
/// `return_code` is 0 on success and -1 on failure, in which case
/// `message` carries a human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Created { return_code: i32, message: String },
    Removed { return_code: i32, message: String },
    BoxList { boxes: Vec<BoxSummary> },
}

impl Reply {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Created { .. } => 4,
            Self::Removed { .. } => 6,
            Self::BoxList { .. } => 8,
        }
    }

    pub fn opcode_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "Created",
            Self::Removed { .. } => "Removed",
            Self::BoxList { .. } => "BoxList",
        }
    }

    pub fn created_ok() -> Self {
        Self::Created {
            return_code: 0,
            message: String::new(),
        }
    }

    pub fn created_failed(message: impl Into<String>) -> Self {
        Self::Created {
            return_code: -1,
            message: message.into(),
        }
    }

    pub fn removed_ok() -> Self {
        Self::Removed {
            return_code: 0,
            message: String::new(),
        }
    }

    pub fn removed_failed(message: impl Into<String>) -> Self {
        Self::Removed {
            return_code: -1,
            message: message.into(),
        }
    }

    pub fn box_list(boxes: Vec<BoxSummary>) -> Self {
        Self::BoxList { boxes }
    }

    /// Check the fixed field limits.
    pub fn validate(&self) -> WireResult<()> {
        match self {
            Self::Created { message, .. } | Self::Removed { message, .. } => {
                check_len("reply message", message, MAX_REPLY_MESSAGE)
            }
            Self::BoxList { boxes } => {
                for summary in boxes {
                    check_len("box name", &summary.name, MAX_BOX_NAME)?;
                }
                Ok(())
            }
        }
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> WireResult<()> {
    if value.len() > max {
        return Err(WireError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}
