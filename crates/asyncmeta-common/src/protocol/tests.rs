//! Tests for the protocol module
//!
//! These cover result code mapping, error classification and the request
//! accessors the dispatcher relies on for candidate selection.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::dn::Dn;
    use pretty_assertions::assert_eq;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    // ============================================================================
    // Result codes
    // ============================================================================

    #[test]
    fn test_result_code_numeric_values() {
        assert_eq!(ResultCode::Success.code(), 0);
        assert_eq!(ResultCode::TimeLimitExceeded.code(), 3);
        assert_eq!(ResultCode::AdminLimitExceeded.code(), 11);
        assert_eq!(ResultCode::NoSuchObject.code(), 32);
        assert_eq!(ResultCode::Busy.code(), 51);
        assert_eq!(ResultCode::Unavailable.code(), 52);
        assert_eq!(ResultCode::UnwillingToPerform.code(), 53);
    }

    #[test]
    fn test_result_code_from_unknown_value() {
        assert_eq!(ResultCode::from_code(32), ResultCode::NoSuchObject);
        assert_eq!(ResultCode::from_code(4242), ResultCode::Unrecognized(4242));
        assert_eq!(ResultCode::Unrecognized(4242).code(), 4242);
    }

    #[test]
    fn test_compare_outcomes_count_as_success() {
        assert!(ResultCode::CompareTrue.is_success());
        assert!(ResultCode::CompareFalse.is_success());
        assert!(!ResultCode::NoSuchObject.is_success());
    }

    #[test]
    fn test_result_code_serializes_numerically() {
        let json = serde_json::to_string(&ResultCode::NoSuchObject).unwrap();
        assert_eq!(json, "32");
    }

    // ============================================================================
    // Errors
    // ============================================================================

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(AsyncMetaError::ServerDown("reset".into()).is_retryable());
        assert!(AsyncMetaError::Connect("refused".into()).is_retryable());
        assert!(!AsyncMetaError::Quarantined("t1".into()).is_retryable());
        assert!(!AsyncMetaError::Controls("no identity".into()).is_retryable());
        assert!(!AsyncMetaError::Busy.is_retryable());
    }

    #[test]
    fn test_error_result_codes() {
        assert_eq!(AsyncMetaError::Busy.result_code(), ResultCode::Busy);
        assert_eq!(
            AsyncMetaError::CrossTargetRename.result_code(),
            ResultCode::UnwillingToPerform
        );
        assert_eq!(
            AsyncMetaError::ServerDown("x".into()).result_code(),
            ResultCode::Unavailable
        );
        assert_eq!(
            AsyncMetaError::BindRejected {
                code: ResultCode::InvalidCredentials,
                text: "bad password".into(),
            }
            .result_code(),
            ResultCode::InvalidCredentials
        );
    }

    #[test]
    fn test_error_into_ldap_result() {
        let result = LdapResult::from(&AsyncMetaError::Busy);
        assert_eq!(result.code, ResultCode::Busy);
        assert_eq!(
            result.text.as_deref(),
            Some("Maximum pending ops limit exceeded")
        );
    }

    // ============================================================================
    // Requests
    // ============================================================================

    #[test]
    fn test_search_request_accessors() {
        let request = ClientRequest::Search(
            SearchRequest::new(9, dn("dc=example"), Scope::OneLevel, "(cn=*)")
                .with_attributes(["cn", "mail"])
                .with_size_limit(5),
        );
        assert_eq!(request.kind(), OperationKind::Search);
        assert_eq!(request.id(), 9);
        assert_eq!(request.scope(), Scope::OneLevel);
        assert_eq!(request.filter(), Some("(cn=*)"));
        assert_eq!(request.target_dn(), &dn("dc=example"));
    }

    #[test]
    fn test_write_requests_select_by_entry() {
        let request = ClientRequest::Delete(DeleteRequest::new(3, dn("uid=a,dc=example")));
        assert_eq!(request.scope(), Scope::Base);
        assert_eq!(request.filter(), None);
        assert!(request.kind().is_write());
        assert!(!OperationKind::Compare.is_write());
    }

    #[test]
    fn test_header_builders() {
        let request = AddRequest::new(1, dn("uid=a,dc=example"), vec![])
            .with_authz_id(dn("uid=admin,dc=example"))
            .with_control(Control::new("1.2.3", false, None));
        assert_eq!(request.header.authz_id, Some(dn("uid=admin,dc=example")));
        assert_eq!(request.header.controls.len(), 1);
    }

    #[test]
    fn test_object_class_attribute_detection() {
        assert!(Attribute::new("objectClass", ["person"]).is_object_class());
        assert!(Attribute::new("OBJECTCLASS", ["person"]).is_object_class());
        assert!(!Attribute::new("cn", ["x"]).is_object_class());
    }
}
