//! Client operations and the per-target requests derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dn::Dn;

/// Client-assigned operation identifier (the LDAP message ID of the
/// client's request). Abandon requests name operations by this value.
pub type OperationId = u64;

/// Search scope. `Subordinate` is the draft-sermersheim children scope:
/// everything strictly beneath the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
    Subordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Delete,
    ModRdn,
    Compare,
    Search,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Delete => "delete",
            OperationKind::ModRdn => "modrdn",
            OperationKind::Compare => "compare",
            OperationKind::Search => "search",
        }
    }

    /// Operations that modify the directory.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            OperationKind::Add | OperationKind::Delete | OperationKind::ModRdn
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Control {
            oid: oid.into(),
            critical,
            value,
        }
    }
}

/// An attribute with its values.
///
/// `dn_valued` marks attributes of DN syntax, whose values are rewritten
/// between the virtual and the target naming contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
    #[serde(default)]
    pub dn_valued: bool,
}

impl Attribute {
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Attribute {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            dn_valued: false,
        }
    }

    pub fn dn_valued(mut self) -> Self {
        self.dn_valued = true;
        self
    }

    pub fn is_object_class(&self) -> bool {
        self.name.eq_ignore_ascii_case("objectclass")
    }
}

/// Fields every client operation carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationHeader {
    pub id: OperationId,
    pub controls: Vec<Control>,
    /// The client's bound identity; `None` for anonymous clients.
    pub authz_id: Option<Dn>,
}

impl OperationHeader {
    pub fn new(id: OperationId) -> Self {
        OperationHeader {
            id,
            controls: Vec::new(),
            authz_id: None,
        }
    }
}

macro_rules! header_builders {
    ($($ty:ty),*) => {$(
        impl $ty {
            pub fn with_control(mut self, control: Control) -> Self {
                self.header.controls.push(control);
                self
            }

            pub fn with_authz_id(mut self, authz_id: Dn) -> Self {
                self.header.authz_id = Some(authz_id);
                self
            }
        }
    )*};
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRequest {
    pub header: OperationHeader,
    pub dn: Dn,
    pub attributes: Vec<Attribute>,
}

impl AddRequest {
    pub fn new(id: OperationId, dn: Dn, attributes: Vec<Attribute>) -> Self {
        AddRequest {
            header: OperationHeader::new(id),
            dn,
            attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub header: OperationHeader,
    pub dn: Dn,
}

impl DeleteRequest {
    pub fn new(id: OperationId, dn: Dn) -> Self {
        DeleteRequest {
            header: OperationHeader::new(id),
            dn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModRdnRequest {
    pub header: OperationHeader,
    pub dn: Dn,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<Dn>,
}

impl ModRdnRequest {
    pub fn new(id: OperationId, dn: Dn, new_rdn: impl Into<String>, delete_old_rdn: bool) -> Self {
        ModRdnRequest {
            header: OperationHeader::new(id),
            dn,
            new_rdn: new_rdn.into(),
            delete_old_rdn,
            new_superior: None,
        }
    }

    pub fn with_new_superior(mut self, new_superior: Dn) -> Self {
        self.new_superior = Some(new_superior);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub header: OperationHeader,
    pub dn: Dn,
    pub attribute: String,
    pub value: String,
    /// The asserted value is a DN and must be rewritten per target.
    #[serde(default)]
    pub dn_valued: bool,
}

impl CompareRequest {
    pub fn new(
        id: OperationId,
        dn: Dn,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        CompareRequest {
            header: OperationHeader::new(id),
            dn,
            attribute: attribute.into(),
            value: value.into(),
            dn_valued: false,
        }
    }

    pub fn dn_valued(mut self) -> Self {
        self.dn_valued = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub header: OperationHeader,
    pub base: Dn,
    pub scope: Scope,
    /// String representation of the filter (RFC 4515).
    pub filter: String,
    pub attributes: Vec<String>,
    pub attrs_only: bool,
    /// Maximum number of entries returned to the client; 0 means no limit.
    pub size_limit: u32,
    /// Client time limit in seconds; 0 means no limit.
    pub time_limit: u32,
}

impl SearchRequest {
    pub fn new(id: OperationId, base: Dn, scope: Scope, filter: impl Into<String>) -> Self {
        SearchRequest {
            header: OperationHeader::new(id),
            base,
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            attrs_only: false,
            size_limit: 0,
            time_limit: 0,
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size_limit(mut self, size_limit: u32) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_time_limit(mut self, seconds: u32) -> Self {
        self.time_limit = seconds;
        self
    }
}

header_builders!(AddRequest, DeleteRequest, ModRdnRequest, CompareRequest, SearchRequest);

/// Any client operation the dispatcher forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    Add(AddRequest),
    Delete(DeleteRequest),
    ModRdn(ModRdnRequest),
    Compare(CompareRequest),
    Search(SearchRequest),
}

impl ClientRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            ClientRequest::Add(_) => OperationKind::Add,
            ClientRequest::Delete(_) => OperationKind::Delete,
            ClientRequest::ModRdn(_) => OperationKind::ModRdn,
            ClientRequest::Compare(_) => OperationKind::Compare,
            ClientRequest::Search(_) => OperationKind::Search,
        }
    }

    pub fn header(&self) -> &OperationHeader {
        match self {
            ClientRequest::Add(r) => &r.header,
            ClientRequest::Delete(r) => &r.header,
            ClientRequest::ModRdn(r) => &r.header,
            ClientRequest::Compare(r) => &r.header,
            ClientRequest::Search(r) => &r.header,
        }
    }

    pub fn id(&self) -> OperationId {
        self.header().id
    }

    /// The DN that decides which targets are candidates.
    pub fn target_dn(&self) -> &Dn {
        match self {
            ClientRequest::Add(r) => &r.dn,
            ClientRequest::Delete(r) => &r.dn,
            ClientRequest::ModRdn(r) => &r.dn,
            ClientRequest::Compare(r) => &r.dn,
            ClientRequest::Search(r) => &r.base,
        }
    }

    /// Scope used for candidate selection; non-search operations name a
    /// single entry.
    pub fn scope(&self) -> Scope {
        match self {
            ClientRequest::Search(r) => r.scope,
            _ => Scope::Base,
        }
    }

    pub fn filter(&self) -> Option<&str> {
        match self {
            ClientRequest::Search(r) => Some(r.filter.as_str()),
            _ => None,
        }
    }
}

/// A request as it is sent to one target, after DN rewriting and schema
/// mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundRequest {
    Bind {
        dn: Dn,
        password: String,
    },
    Add {
        dn: Dn,
        attributes: Vec<Attribute>,
    },
    Delete {
        dn: Dn,
    },
    ModRdn {
        dn: Dn,
        new_rdn: String,
        delete_old_rdn: bool,
        new_superior: Option<Dn>,
    },
    Compare {
        dn: Dn,
        attribute: String,
        value: String,
    },
    Search {
        base: Dn,
        scope: Scope,
        filter: String,
        attributes: Vec<String>,
        attrs_only: bool,
        size_limit: u32,
        time_limit: u32,
    },
}

impl OutboundRequest {
    pub fn kind_name(&self) -> &'static str {
        match self {
            OutboundRequest::Bind { .. } => "bind",
            OutboundRequest::Add { .. } => "add",
            OutboundRequest::Delete { .. } => "delete",
            OutboundRequest::ModRdn { .. } => "modrdn",
            OutboundRequest::Compare { .. } => "compare",
            OutboundRequest::Search { .. } => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub request: OutboundRequest,
    pub controls: Vec<Control>,
}

impl OutboundMessage {
    pub fn new(request: OutboundRequest) -> Self {
        OutboundMessage {
            request,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }
}
