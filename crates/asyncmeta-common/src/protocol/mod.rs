pub mod error;
pub mod requests;
pub mod responses;
pub mod result_code;

#[cfg(test)]
mod tests;

pub use error::{AsyncMetaError, Result};
pub use requests::{
    AddRequest, Attribute, ClientRequest, CompareRequest, Control, DeleteRequest, ModRdnRequest,
    OperationHeader, OperationId, OperationKind, OutboundMessage, OutboundRequest, Scope,
    SearchRequest,
};
pub use responses::{LdapResult, ResponseBody, ResponseMessage, SearchEntry};
pub use result_code::ResultCode;
