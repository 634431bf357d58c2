//! Standard MAL errors as carried in error reply bodies

use serde::{Deserialize, Serialize};

/// Standard error numbers defined by the MAL
pub mod standard_errors {
    pub const DELIVERY_FAILED: u32 = 65536;
    pub const DELIVERY_TIMEDOUT: u32 = 65537;
    pub const DELIVERY_DELAYED: u32 = 65538;
    pub const DESTINATION_UNKNOWN: u32 = 65539;
    pub const DESTINATION_TRANSIENT: u32 = 65540;
    pub const DESTINATION_LOST: u32 = 65541;
    pub const AUTHENTICATION_FAIL: u32 = 65542;
    pub const AUTHORISATION_FAIL: u32 = 65543;
    pub const ENCRYPTION_FAIL: u32 = 65544;
    pub const UNSUPPORTED_AREA: u32 = 65545;
    pub const UNSUPPORTED_OPERATION: u32 = 65546;
    pub const UNSUPPORTED_VERSION: u32 = 65547;
    pub const BAD_ENCODING: u32 = 65548;
    pub const INTERNAL: u32 = 65549;
    pub const UNKNOWN: u32 = 65550;
    pub const INCORRECT_STATE: u32 = 65551;
    pub const TOO_MANY: u32 = 65552;
    pub const SHUTDOWN: u32 = 65553;

    /// Symbolic name of a standard error number, if it is one
    pub fn name(error_number: u32) -> Option<&'static str> {
        let name = match error_number {
            DELIVERY_FAILED => "DELIVERY_FAILED",
            DELIVERY_TIMEDOUT => "DELIVERY_TIMEDOUT",
            DELIVERY_DELAYED => "DELIVERY_DELAYED",
            DESTINATION_UNKNOWN => "DESTINATION_UNKNOWN",
            DESTINATION_TRANSIENT => "DESTINATION_TRANSIENT",
            DESTINATION_LOST => "DESTINATION_LOST",
            AUTHENTICATION_FAIL => "AUTHENTICATION_FAIL",
            AUTHORISATION_FAIL => "AUTHORISATION_FAIL",
            ENCRYPTION_FAIL => "ENCRYPTION_FAIL",
            UNSUPPORTED_AREA => "UNSUPPORTED_AREA",
            UNSUPPORTED_OPERATION => "UNSUPPORTED_OPERATION",
            UNSUPPORTED_VERSION => "UNSUPPORTED_VERSION",
            BAD_ENCODING => "BAD_ENCODING",
            INTERNAL => "INTERNAL",
            UNKNOWN => "UNKNOWN",
            INCORRECT_STATE => "INCORRECT_STATE",
            TOO_MANY => "TOO_MANY",
            SHUTDOWN => "SHUTDOWN",
            _ => return None,
        };
        Some(name)
    }
}

/// Error number plus optional extra information, exactly as sent on the wire.
///
/// Application errors raised by provider handlers use their own error numbers
/// and travel through the middleware unaltered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("MAL error {error_number} ({name}){extra}",
        name = standard_errors::name(*error_number).unwrap_or("APPLICATION"),
        extra = extra_information.as_deref().map(|s| format!(": {}", s)).unwrap_or_default())]
pub struct MalStandardError {
    pub error_number: u32,
    pub extra_information: Option<String>,
}

impl MalStandardError {
    pub fn new(error_number: u32, extra_information: Option<String>) -> Self {
        Self {
            error_number,
            extra_information,
        }
    }

    pub fn with_info(error_number: u32, info: impl Into<String>) -> Self {
        Self::new(error_number, Some(info.into()))
    }

    pub fn is_standard(&self) -> bool {
        standard_errors::name(self.error_number).is_some()
    }
}
