//! Responses received from targets and the result returned to the client.

use serde::{Deserialize, Serialize};

use super::requests::Attribute;
use super::result_code::ResultCode;
use crate::dn::Dn;
use crate::transport::MessageId;

/// The outcome of an LDAP operation.
///
/// # Fields
///
/// - `code`: the LDAP result code
/// - `matched_dn`: the deepest existing ancestor, reported with `NoSuchObject`
/// - `text`: diagnostic message
/// - `referrals`: LDAP URLs, reported with `Referral`
///
/// # Example
///
/// ```
/// use asyncmeta_common::{LdapResult, ResultCode};
///
/// let result = LdapResult::new(ResultCode::Busy).with_text("try again");
/// assert!(!result.is_success());
/// assert_eq!(result.text.as_deref(), Some("try again"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: Option<Dn>,
    pub text: Option<String>,
    pub referrals: Vec<String>,
}

impl LdapResult {
    pub fn new(code: ResultCode) -> Self {
        LdapResult {
            code,
            matched_dn: None,
            text: None,
            referrals: Vec::new(),
        }
    }

    pub fn success() -> Self {
        LdapResult::new(ResultCode::Success)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_matched(mut self, matched_dn: Dn) -> Self {
        self.matched_dn = Some(matched_dn);
        self
    }

    pub fn with_referrals(mut self, referrals: Vec<String>) -> Self {
        self.referrals = referrals;
        self
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl From<&super::error::AsyncMetaError> for LdapResult {
    fn from(err: &super::error::AsyncMetaError) -> Self {
        LdapResult::new(err.result_code()).with_text(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub dn: Dn,
    pub attributes: Vec<Attribute>,
}

impl SearchEntry {
    pub fn new(dn: Dn, attributes: Vec<Attribute>) -> Self {
        SearchEntry { dn, attributes }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Entry(SearchEntry),
    /// Search continuation reference (a list of LDAP URLs).
    Reference(Vec<String>),
    /// Final result of the request with the same message ID.
    Result(LdapResult),
}

/// A message read from a target session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub msgid: MessageId,
    pub body: ResponseBody,
}

impl ResponseMessage {
    pub fn entry(msgid: MessageId, entry: SearchEntry) -> Self {
        ResponseMessage {
            msgid,
            body: ResponseBody::Entry(entry),
        }
    }

    pub fn reference(msgid: MessageId, urls: Vec<String>) -> Self {
        ResponseMessage {
            msgid,
            body: ResponseBody::Reference(urls),
        }
    }

    pub fn result(msgid: MessageId, result: LdapResult) -> Self {
        ResponseMessage {
            msgid,
            body: ResponseBody::Result(result),
        }
    }
}
