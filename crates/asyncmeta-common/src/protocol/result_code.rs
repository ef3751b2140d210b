//! LDAP result codes (RFC 4511 §4.1.9).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code carried by every LDAP operation result.
///
/// Codes the dispatcher does not interpret are preserved numerically in
/// [`ResultCode::Unrecognized`] so they can be relayed unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    CompareFalse,
    CompareTrue,
    Referral,
    AdminLimitExceeded,
    NoSuchAttribute,
    UndefinedAttributeType,
    NoSuchObject,
    InvalidDnSyntax,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    NotAllowedOnNonLeaf,
    EntryAlreadyExists,
    Other,
    Canceled,
    Unrecognized(u32),
}

impl ResultCode {
    pub fn code(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::TimeLimitExceeded => 3,
            ResultCode::SizeLimitExceeded => 4,
            ResultCode::CompareFalse => 5,
            ResultCode::CompareTrue => 6,
            ResultCode::Referral => 10,
            ResultCode::AdminLimitExceeded => 11,
            ResultCode::NoSuchAttribute => 16,
            ResultCode::UndefinedAttributeType => 17,
            ResultCode::NoSuchObject => 32,
            ResultCode::InvalidDnSyntax => 34,
            ResultCode::InvalidCredentials => 49,
            ResultCode::InsufficientAccessRights => 50,
            ResultCode::Busy => 51,
            ResultCode::Unavailable => 52,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::NotAllowedOnNonLeaf => 66,
            ResultCode::EntryAlreadyExists => 68,
            ResultCode::Other => 80,
            ResultCode::Canceled => 118,
            ResultCode::Unrecognized(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::OperationsError,
            2 => ResultCode::ProtocolError,
            3 => ResultCode::TimeLimitExceeded,
            4 => ResultCode::SizeLimitExceeded,
            5 => ResultCode::CompareFalse,
            6 => ResultCode::CompareTrue,
            10 => ResultCode::Referral,
            11 => ResultCode::AdminLimitExceeded,
            16 => ResultCode::NoSuchAttribute,
            17 => ResultCode::UndefinedAttributeType,
            32 => ResultCode::NoSuchObject,
            34 => ResultCode::InvalidDnSyntax,
            49 => ResultCode::InvalidCredentials,
            50 => ResultCode::InsufficientAccessRights,
            51 => ResultCode::Busy,
            52 => ResultCode::Unavailable,
            53 => ResultCode::UnwillingToPerform,
            66 => ResultCode::NotAllowedOnNonLeaf,
            68 => ResultCode::EntryAlreadyExists,
            80 => ResultCode::Other,
            118 => ResultCode::Canceled,
            other => ResultCode::Unrecognized(other),
        }
    }

    /// True for codes that report a completed operation rather than a
    /// failure: success and both compare outcomes.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResultCode::Success | ResultCode::CompareTrue | ResultCode::CompareFalse
        )
    }
}

impl From<ResultCode> for u32 {
    fn from(code: ResultCode) -> Self {
        code.code()
    }
}

impl From<u32> for ResultCode {
    fn from(code: u32) -> Self {
        ResultCode::from_code(code)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Unrecognized(code) => write!(f, "result code {}", code),
            other => write!(f, "{:?} ({})", other, other.code()),
        }
    }
}
