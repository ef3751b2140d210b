//! Building target requests from client operations, and translating
//! target responses back.

use asyncmeta_common::protocol::error::{AsyncMetaError, Result};
use asyncmeta_common::{
    Attribute, ClientRequest, ControlBuilder, Dn, DnRewriter, FilterMapping, IdentityAssertion,
    IdentityMapping, LdapResult, OutboundMessage, OutboundRequest, RewriteContext,
    RewriteDirection, RewriteError, Scope, SchemaMapper, SearchEntry, SuffixMassage,
    TargetDescriptor,
};
use std::sync::Arc;

/// The pluggable per-target translation steps.
///
/// # Example
///
/// ```
/// use asyncmeta_common::AttributeRenames;
/// use asyncmeta_core::Collaborators;
/// use std::sync::Arc;
///
/// let collaborators = Collaborators::default()
///     .with_mapper(Arc::new(AttributeRenames::new().rename("mail", "email")));
/// ```
#[derive(Clone)]
pub struct Collaborators {
    pub rewriter: Arc<dyn DnRewriter>,
    pub mapper: Arc<dyn SchemaMapper>,
    pub controls: Arc<dyn ControlBuilder>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            rewriter: Arc::new(SuffixMassage),
            mapper: Arc::new(IdentityMapping),
            controls: Arc::new(IdentityAssertion),
        }
    }
}

impl Collaborators {
    pub fn with_rewriter(mut self, rewriter: Arc<dyn DnRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn SchemaMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_controls(mut self, controls: Arc<dyn ControlBuilder>) -> Self {
        self.controls = controls;
        self
    }
}

/// What to do with a candidate that is ready to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Send(OutboundMessage),
    /// Schema mapping shows the target cannot serve the request.
    NotCandidate,
}

/// Builds the request for one target.
///
/// `base` and `scope` are the candidate's effective values; `base` is
/// already rewritten for the target.
///
/// # Errors
///
/// Control construction, DN rewrite and DN syntax failures. They end the
/// candidate, not the operation.
pub fn prepare(
    request: &ClientRequest,
    base: &Dn,
    scope: Scope,
    target: &TargetDescriptor,
    collaborators: &Collaborators,
) -> Result<Prepared> {
    let controls = collaborators
        .controls
        .build(request.kind(), request.header(), target)?;
    let mapper = collaborators.mapper.as_ref();
    let rewriter = collaborators.rewriter.as_ref();

    let outbound = match request {
        ClientRequest::Add(add) => {
            let mut attributes = Vec::with_capacity(add.attributes.len());
            for attribute in &add.attributes {
                if let Some(mapped) = map_attribute_to_target(attribute, target, collaborators)? {
                    attributes.push(mapped);
                }
            }
            OutboundRequest::Add {
                dn: base.clone(),
                attributes,
            }
        }
        ClientRequest::Delete(_) => OutboundRequest::Delete { dn: base.clone() },
        ClientRequest::ModRdn(modrdn) => {
            let new_superior = match &modrdn.new_superior {
                Some(superior) => Some(
                    rewriter
                        .rewrite(
                            superior,
                            RewriteDirection::ToTarget,
                            RewriteContext::NewSuperior,
                            target,
                        )
                        .map_err(|e| match e {
                            RewriteError::Unwilling => {
                                AsyncMetaError::RewriteRefused(superior.as_str())
                            }
                            RewriteError::OutOfScope => AsyncMetaError::CrossTargetRename,
                        })?,
                ),
                None => None,
            };
            OutboundRequest::ModRdn {
                dn: base.clone(),
                new_rdn: modrdn.new_rdn.clone(),
                delete_old_rdn: modrdn.delete_old_rdn,
                new_superior,
            }
        }
        ClientRequest::Compare(compare) => {
            let Some(attribute) =
                mapper.map_attribute(&compare.attribute, RewriteDirection::ToTarget, target)
            else {
                return Ok(Prepared::NotCandidate);
            };
            let value = if compare.dn_valued {
                rewrite_value(&compare.value, RewriteDirection::ToTarget, target, rewriter)?
            } else if compare.attribute.eq_ignore_ascii_case("objectclass") {
                match mapper.map_object_class(&compare.value, RewriteDirection::ToTarget, target) {
                    Some(value) => value,
                    None => return Ok(Prepared::NotCandidate),
                }
            } else {
                compare.value.clone()
            };
            OutboundRequest::Compare {
                dn: base.clone(),
                attribute,
                value,
            }
        }
        ClientRequest::Search(search) => {
            let filter = match mapper.map_filter(&search.filter, target) {
                FilterMapping::Mapped(filter) => filter,
                FilterMapping::NotCandidate => return Ok(Prepared::NotCandidate),
            };
            let mut attributes: Vec<String> = search
                .attributes
                .iter()
                .filter_map(|name| mapper.map_attribute(name, RewriteDirection::ToTarget, target))
                .collect();
            if attributes.is_empty() && !search.attributes.is_empty() {
                // None of the requested attributes exist on the target.
                attributes.push("1.1".to_string());
            }
            OutboundRequest::Search {
                base: base.clone(),
                scope,
                filter,
                attributes,
                attrs_only: search.attrs_only,
                size_limit: search.size_limit,
                time_limit: search.time_limit,
            }
        }
    };

    Ok(Prepared::Send(
        OutboundMessage::new(outbound).with_controls(controls),
    ))
}

fn map_attribute_to_target(
    attribute: &Attribute,
    target: &TargetDescriptor,
    collaborators: &Collaborators,
) -> Result<Option<Attribute>> {
    let mapper = collaborators.mapper.as_ref();
    let Some(name) = mapper.map_attribute(&attribute.name, RewriteDirection::ToTarget, target)
    else {
        return Ok(None);
    };

    let values: Vec<String> = if attribute.is_object_class() {
        attribute
            .values
            .iter()
            .filter_map(|v| mapper.map_object_class(v, RewriteDirection::ToTarget, target))
            .collect()
    } else if attribute.dn_valued {
        attribute
            .values
            .iter()
            .map(|v| {
                rewrite_value(
                    v,
                    RewriteDirection::ToTarget,
                    target,
                    collaborators.rewriter.as_ref(),
                )
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        attribute.values.clone()
    };

    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(Attribute {
        name,
        values,
        dn_valued: attribute.dn_valued,
    }))
}

/// Rewrites a DN-syntax attribute value. Values outside the rewritten
/// naming context are kept as they are.
fn rewrite_value(
    value: &str,
    direction: RewriteDirection,
    target: &TargetDescriptor,
    rewriter: &dyn DnRewriter,
) -> Result<String> {
    let dn = Dn::parse(value)?;
    match rewriter.rewrite(&dn, direction, RewriteContext::AttributeValue, target) {
        Ok(rewritten) => Ok(rewritten.as_str()),
        Err(RewriteError::OutOfScope) => Ok(value.to_string()),
        Err(RewriteError::Unwilling) => Err(AsyncMetaError::RewriteRefused(value.to_string())),
    }
}

/// Translates an entry returned by a target into the client's view.
///
/// Returns `None` for entries whose DN the rewriter refuses to show.
pub fn restore_entry(
    entry: SearchEntry,
    target: &TargetDescriptor,
    collaborators: &Collaborators,
) -> Option<SearchEntry> {
    let rewriter = collaborators.rewriter.as_ref();
    let mapper = collaborators.mapper.as_ref();

    let dn = match rewriter.rewrite(
        &entry.dn,
        RewriteDirection::FromTarget,
        RewriteContext::SearchResultDn,
        target,
    ) {
        Ok(dn) => dn,
        Err(RewriteError::OutOfScope) => entry.dn,
        Err(RewriteError::Unwilling) => return None,
    };

    let attributes = entry
        .attributes
        .into_iter()
        .filter_map(|attribute| {
            let name =
                mapper.map_attribute(&attribute.name, RewriteDirection::FromTarget, target)?;
            let values: Vec<String> = if attribute.is_object_class() {
                attribute
                    .values
                    .iter()
                    .filter_map(|v| mapper.map_object_class(v, RewriteDirection::FromTarget, target))
                    .collect()
            } else if attribute.dn_valued {
                attribute
                    .values
                    .iter()
                    .map(|v| {
                        rewrite_value(v, RewriteDirection::FromTarget, target, rewriter)
                            .unwrap_or_else(|_| v.clone())
                    })
                    .collect()
            } else {
                attribute.values
            };
            Some(Attribute {
                name,
                values,
                dn_valued: attribute.dn_valued,
            })
        })
        .collect();

    Some(SearchEntry::new(dn, attributes))
}

/// Rewrites the matched DN and referrals of a target result.
///
/// A matched DN outside the rewritten naming context is kept as it is,
/// like an entry DN; one the rewriter refuses is dropped.
pub fn restore_result(
    mut result: LdapResult,
    target: &TargetDescriptor,
    collaborators: &Collaborators,
) -> LdapResult {
    let rewriter = collaborators.rewriter.as_ref();
    if let Some(matched) = result.matched_dn.take() {
        result.matched_dn = match rewriter.rewrite(
            &matched,
            RewriteDirection::FromTarget,
            RewriteContext::MatchedDn,
            target,
        ) {
            Ok(dn) => Some(dn),
            Err(RewriteError::OutOfScope) => Some(matched),
            Err(RewriteError::Unwilling) => None,
        };
    }
    result.referrals = restore_referrals(result.referrals, target, rewriter);
    result
}

/// Rewrites the DN part of LDAP URLs.
pub fn restore_referrals(
    urls: Vec<String>,
    target: &TargetDescriptor,
    rewriter: &dyn DnRewriter,
) -> Vec<String> {
    urls.into_iter()
        .map(|url| restore_url(&url, target, rewriter).unwrap_or(url))
        .collect()
}

fn restore_url(url: &str, target: &TargetDescriptor, rewriter: &dyn DnRewriter) -> Option<String> {
    let authority_start = url.find("://")? + 3;
    let path_start = authority_start + url[authority_start..].find('/')? + 1;
    let path_end = url[path_start..]
        .find('?')
        .map(|i| path_start + i)
        .unwrap_or(url.len());

    let dn = Dn::parse(&url[path_start..path_end]).ok()?;
    let rewritten = rewriter
        .rewrite(
            &dn,
            RewriteDirection::FromTarget,
            RewriteContext::Referral,
            target,
        )
        .ok()?;
    Some(format!(
        "{}{}{}",
        &url[..path_start],
        rewritten.as_str(),
        &url[path_end..]
    ))
}
