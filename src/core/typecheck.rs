//! SF-010: Tree-wide type constraint decoding.
//!
//! Runs after the whole tree is built so that every stack sees the same
//! provider config type for a given provider, whichever stack mentions it
//! first.

use super::config::{Config, ConfigNode};
use super::diagnostics::Diagnostics;
use super::typeexpr::{type_constraint, Type, TypeInformation};
use super::types::{ProviderAddr, ProviderRequirements, Stack, TypeConstraint};
use rustc_hash::FxHashMap;

/// Canonical provider config types for one configuration load.
#[derive(Debug, Default)]
pub struct ProviderTypes {
    types: FxHashMap<ProviderAddr, Type>,
}

impl ProviderTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: &ProviderAddr) -> Option<&Type> {
        self.types.get(provider)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Type information for the stack at one node: local names come from that
/// stack alone, provider types from the shared registry.
pub struct NodeTypeInfo<'a> {
    required_providers: Option<&'a ProviderRequirements>,
    types: &'a mut ProviderTypes,
}

impl<'a> NodeTypeInfo<'a> {
    pub fn new(required_providers: Option<&'a ProviderRequirements>, types: &'a mut ProviderTypes) -> Self {
        Self {
            required_providers,
            types,
        }
    }
}

impl TypeInformation for NodeTypeInfo<'_> {
    fn provider_config_type(&self, provider: &ProviderAddr) -> Option<Type> {
        self.types.get(provider).cloned()
    }

    fn provider_for_local_name(&self, local_name: &str) -> Option<ProviderAddr> {
        self.required_providers?
            .provider_for_local_name(local_name)
            .cloned()
    }

    fn set_provider_config_type(&mut self, provider: ProviderAddr, ty: Type) {
        tracing::debug!(%provider, "registered provider config type");
        let previous = self.types.types.insert(provider, ty);
        debug_assert!(previous.is_none(), "provider config type registered twice");
    }
}

/// Decode every input variable and output value type in the tree.
pub fn decode_type_constraints(config: &mut Config) -> Diagnostics {
    let mut types = ProviderTypes::new();
    decode_node_types(&mut config.root, &mut types)
}

/// Decode the types at `node` and below, sharing `types` with the caller.
pub fn decode_node_types(node: &mut ConfigNode, types: &mut ProviderTypes) -> Diagnostics {
    let mut diags = Diagnostics::new();
    let Stack {
        required_providers,
        input_variables,
        output_values,
        ..
    } = &mut node.stack;

    let mut info = NodeTypeInfo::new(required_providers.as_ref(), types);
    for var in input_variables.values_mut() {
        diags.extend(decode_constraint(&mut var.r#type, &mut info));
    }
    for out in output_values.values_mut() {
        diags.extend(decode_constraint(&mut out.r#type, &mut info));
    }

    for child in node.children.values_mut() {
        diags.extend(decode_node_types(child, types));
    }
    diags
}

fn decode_constraint(tc: &mut TypeConstraint, info: &mut dyn TypeInformation) -> Diagnostics {
    let (ty, defaults, diags) = type_constraint(&tc.expression, &tc.expression_range, info);
    tc.constraint = Some(ty);
    tc.defaults = defaults;
    diags
}
