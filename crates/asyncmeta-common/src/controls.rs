//! Request controls sent to targets.

use crate::protocol::error::{AsyncMetaError, Result};
use crate::protocol::requests::{Control, OperationHeader, OperationKind};
use crate::target::TargetDescriptor;

/// Proxied authorization control (RFC 4370).
pub const PROXIED_AUTHZ_OID: &str = "2.16.840.1.113730.3.4.18";

/// Builds the controls attached to a request sent to one target.
///
/// A failure makes the operation fail for that target only.
pub trait ControlBuilder: Send + Sync {
    fn build(
        &self,
        kind: OperationKind,
        header: &OperationHeader,
        target: &TargetDescriptor,
    ) -> Result<Vec<Control>>;
}

/// Forwards the client's controls and, for targets configured with
/// identity assertion, adds a critical proxied authorization control
/// carrying the client's identity. Anonymous clients cannot be asserted.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAssertion;

impl ControlBuilder for IdentityAssertion {
    fn build(
        &self,
        _kind: OperationKind,
        header: &OperationHeader,
        target: &TargetDescriptor,
    ) -> Result<Vec<Control>> {
        let mut controls: Vec<Control> = header
            .controls
            .iter()
            .filter(|c| c.oid != PROXIED_AUTHZ_OID)
            .cloned()
            .collect();

        if target.identity_assertion {
            let Some(authz_id) = &header.authz_id else {
                return Err(AsyncMetaError::Controls(format!(
                    "target {} requires an asserted identity",
                    target.name
                )));
            };
            let value = format!("dn:{}", authz_id);
            controls.push(Control::new(PROXIED_AUTHZ_OID, true, Some(value.into_bytes())));
        }

        Ok(controls)
    }
}
