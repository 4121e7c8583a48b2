//! SF-001: Decoded stack configuration types.
//!
//! A `Stack` is what the single-stack loader produces for one directory:
//! embedded stack calls, component calls, typed input variables and output
//! values, and the provider requirements local to that stack. The raw YAML
//! schema lives in `parser`; these types carry parsed addresses and
//! constraints.

use super::diagnostics::SourceRange;
use super::sourceaddr::{FinalSource, Source, DEFAULT_REGISTRY_HOST};
use super::typeexpr::{Type, TypeDefaults};
use super::versions::VersionConstraints;
use indexmap::IndexMap;
use std::fmt;

// ============================================================================
// Providers
// ============================================================================

/// Error parsing a provider source address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid provider source {input:?}: {reason}")]
pub struct ProviderAddrError {
    pub input: String,
    pub reason: String,
}

/// Fully-qualified provider address: `hostname/namespace/type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderAddr {
    pub hostname: String,
    pub namespace: String,
    pub type_name: String,
}

impl ProviderAddr {
    /// Parse `namespace/type` or `hostname/namespace/type`.
    pub fn parse(raw: &str) -> Result<Self, ProviderAddrError> {
        let err = |reason: &str| ProviderAddrError {
            input: raw.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = raw.trim().split('/').collect();
        let (hostname, namespace, type_name) = match parts.as_slice() {
            [ns, ty] => (DEFAULT_REGISTRY_HOST, *ns, *ty),
            [host, ns, ty] => (*host, *ns, *ty),
            _ => return Err(err("expected [hostname/]namespace/type")),
        };
        for part in [hostname, namespace, type_name] {
            if part.is_empty() {
                return Err(err("address parts must not be empty"));
            }
            if !part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(err("address parts may only contain letters, digits, '-', '_' and '.'"));
            }
        }
        Ok(Self {
            hostname: hostname.to_ascii_lowercase(),
            namespace: namespace.to_ascii_lowercase(),
            type_name: type_name.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }
}

/// One entry under `required_providers`.
#[derive(Debug, Clone)]
pub struct ProviderRequirement {
    pub local_name: String,
    pub provider: ProviderAddr,
    pub version_constraints: VersionConstraints,
    pub decl_range: SourceRange,
}

/// Provider requirements for a single stack, keyed by local name.
///
/// Local names are scoped to the stack that declares them; embedded stacks
/// do not inherit their caller's names.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequirements {
    pub requirements: IndexMap<String, ProviderRequirement>,
}

impl ProviderRequirements {
    pub fn provider_for_local_name(&self, local_name: &str) -> Option<&ProviderAddr> {
        self.requirements.get(local_name).map(|r| &r.provider)
    }
}

// ============================================================================
// Stack
// ============================================================================

/// The decoded definition of one stack directory.
#[derive(Debug, Clone)]
pub struct Stack {
    /// Address the stack was loaded from.
    pub source_addr: FinalSource,

    pub embedded_stacks: IndexMap<String, EmbeddedStackCall>,
    pub components: IndexMap<String, ComponentCall>,
    pub input_variables: IndexMap<String, InputVariable>,
    pub output_values: IndexMap<String, OutputValue>,

    /// Absent when the stack declares no `required_providers` at all.
    pub required_providers: Option<ProviderRequirements>,
}

impl Stack {
    pub fn empty(source_addr: FinalSource) -> Self {
        Self {
            source_addr,
            embedded_stacks: IndexMap::new(),
            components: IndexMap::new(),
            input_variables: IndexMap::new(),
            output_values: IndexMap::new(),
            required_providers: None,
        }
    }
}

/// A call to an embedded (child) stack.
#[derive(Debug, Clone)]
pub struct EmbeddedStackCall {
    pub name: String,
    pub source_addr: Source,
    pub version_constraints: VersionConstraints,
    pub inputs: IndexMap<String, serde_yaml_ng::Value>,
    pub source_addr_range: SourceRange,
    pub decl_range: SourceRange,
}

/// A call to a leaf component.
#[derive(Debug, Clone)]
pub struct ComponentCall {
    pub name: String,
    pub source_addr: Source,
    pub version_constraints: VersionConstraints,
    pub inputs: IndexMap<String, serde_yaml_ng::Value>,
    pub source_addr_range: SourceRange,
    pub decl_range: SourceRange,

    /// Absolute, version-pinned address of the component's source. Set by
    /// the config tree builder; `None` if resolution failed.
    pub final_source_addr: Option<FinalSource>,
}

/// An input variable declaration.
#[derive(Debug, Clone)]
pub struct InputVariable {
    pub name: String,
    pub description: Option<String>,
    pub sensitive: bool,
    pub r#type: TypeConstraint,
    pub decl_range: SourceRange,
}

/// An output value declaration.
#[derive(Debug, Clone)]
pub struct OutputValue {
    pub name: String,
    pub description: Option<String>,
    pub sensitive: bool,
    /// Unevaluated value expression.
    pub value: Option<String>,
    pub r#type: TypeConstraint,
    pub decl_range: SourceRange,
}

/// A type expression and, once decoded, the type it describes.
#[derive(Debug, Clone)]
pub struct TypeConstraint {
    pub expression: String,
    pub expression_range: SourceRange,

    /// Populated by the type-constraint pass in `typecheck`.
    pub constraint: Option<Type>,
    pub defaults: Option<TypeDefaults>,
}

impl TypeConstraint {
    pub fn new(expression: impl Into<String>, expression_range: SourceRange) -> Self {
        Self {
            expression: expression.into(),
            expression_range,
            constraint: None,
            defaults: None,
        }
    }
}
