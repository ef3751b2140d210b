//! AsyncMeta Common Types and Transport Traits
//!
//! This crate provides the shared vocabulary of the asyncmeta dispatcher:
//! the LDAP operation model, distinguished name handling, target
//! configuration and the traits through which the dispatcher talks to
//! remote directory servers.
//!
//! # Overview
//!
//! AsyncMeta is a fan-out layer that presents several remote LDAP servers
//! ("targets") as one virtual directory tree. Every client operation is
//! routed to the subset of targets whose naming context can hold the
//! requested entry, forwarded asynchronously, and the replies are merged
//! into a single client-visible answer.
//!
//! # Components
//!
//! - [`protocol`] - Requests, responses, result codes and the error type
//! - [`dn`] - Normalized distinguished names and suffix arithmetic
//! - [`target`] - Target configuration and validated target descriptors
//! - [`transport`] - [`transport::RemoteSession`] and [`transport::Connector`]
//! - [`rewrite`], [`mapping`], [`controls`] - Pluggable per-target rewriting
//!
//! # Example
//!
//! ```
//! use asyncmeta_common::{Dn, Scope, SearchRequest};
//!
//! let base = Dn::parse("ou=People, dc=example, dc=com").unwrap();
//! let request = SearchRequest::new(7, base.clone(), Scope::Subtree, "(uid=jdoe)")
//!     .with_size_limit(10);
//!
//! assert_eq!(request.base.as_str(), "ou=People,dc=example,dc=com");
//! assert!(base.is_within(&Dn::parse("dc=example,dc=com").unwrap()));
//! ```

pub mod controls;
pub mod dn;
pub mod mapping;
pub mod protocol;
pub mod rewrite;
pub mod target;
pub mod transport;

pub use controls::{ControlBuilder, IdentityAssertion, PROXIED_AUTHZ_OID};
pub use dn::Dn;
pub use mapping::{AttributeRenames, FilterMapping, IdentityMapping, SchemaMapper};
pub use protocol::*;
pub use rewrite::{DnRewriter, RewriteContext, RewriteDirection, RewriteError, SuffixMassage};
pub use target::{
    BindPolicy, OperationTimeouts, QuarantineConfig, SuffixScope, TargetConfig, TargetDescriptor,
};
pub use transport::{Connection, Connector, MessageId, RemoteSession, SessionId};
