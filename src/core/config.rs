//! SF-009: Stack configuration tree loading.
//!
//! Starting from a root stack, follows every embedded stack call and loads
//! the stack it refers to, resolving each call's source address against the
//! address of the stack that made it. Component source addresses are resolved
//! too but components are leaves and are not loaded.
//!
//! Problems are collected as diagnostics. A call that cannot be resolved or
//! loaded is left out of its parent's children and loading carries on with
//! its siblings.

use super::bundle::SourceBundle;
use super::diagnostics::{Diagnostic, Diagnostics};
use super::parser::{StackLoader, YamlStackLoader};
use super::resolver::{resolve_final_source_addr, ResolveError};
use super::sourceaddr::{FinalSource, Source};
use super::typecheck::decode_type_constraints;
use super::types::{Stack, TypeConstraint};
use indexmap::IndexMap;
use std::fmt::Write;

/// How many levels of embedded stacks may be nested below the root.
///
/// Self-referencing sources or call cycles would otherwise recurse forever.
pub const MAX_EMBEDDED_STACK_NESTING: usize = 20;

/// A fully loaded stack configuration tree.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: ConfigNode,
}

/// One stack in the tree.
#[derive(Debug, Clone)]
pub struct ConfigNode {
    pub stack: Stack,

    /// Loaded embedded stacks, keyed by call name. Calls that failed to
    /// resolve or load are absent.
    pub children: IndexMap<String, ConfigNode>,
}

// ============================================================================
// Loading
// ============================================================================

/// Load the configuration tree rooted at `addr` from `.stack.yaml` files.
pub fn load_config_dir(addr: &FinalSource, bundle: &SourceBundle) -> (Option<Config>, Diagnostics) {
    load_config_dir_with(&YamlStackLoader, addr, bundle)
}

/// Load the configuration tree rooted at `addr` using `loader` for each
/// individual stack, then decode all type constraints.
pub fn load_config_dir_with(
    loader: &dyn StackLoader,
    addr: &FinalSource,
    bundle: &SourceBundle,
) -> (Option<Config>, Diagnostics) {
    let (root, mut diags) = load_config_node(addr, bundle, loader, &[]);
    let Some(root) = root else {
        if !diags.has_errors() {
            panic!("loading the root stack at {} produced no stack and no errors", addr);
        }
        return (None, diags);
    };

    let mut config = Config { root };
    diags.extend(decode_type_constraints(&mut config));
    tracing::info!(
        root = %addr,
        stacks = config.stack_count(),
        components = config.component_count(),
        errors = diags.errors().count(),
        "loaded stack configuration"
    );
    (Some(config), diags)
}

/// Load the stack at `addr` and, recursively, its embedded stacks.
///
/// `callers` holds the addresses of every stack above this one, root first.
pub fn load_config_node(
    addr: &FinalSource,
    bundle: &SourceBundle,
    loader: &dyn StackLoader,
    callers: &[FinalSource],
) -> (Option<ConfigNode>, Diagnostics) {
    let (stack, mut diags) = loader.load_stack(addr, bundle);
    let Some(mut stack) = stack else {
        if !diags.has_errors() {
            panic!("stack loader returned no stack and no errors for {}", addr);
        }
        return (None, diags);
    };

    let mut children = IndexMap::new();
    let mut chain: Vec<FinalSource> = Vec::with_capacity(callers.len() + 1);
    chain.extend_from_slice(callers);
    chain.push(addr.clone());

    for call in stack.embedded_stacks.values() {
        let child_addr =
            match resolve_final_source_addr(addr, &call.source_addr, &call.version_constraints, bundle) {
                Ok(a) => a,
                Err(e) => {
                    diags.push(
                        invalid_source_addr(&call.source_addr, &e).with_subject(call.source_addr_range.clone()),
                    );
                    continue;
                }
            };

        if callers.len() == MAX_EMBEDDED_STACK_NESTING {
            tracing::warn!(call = %call.name, %addr, "embedded stack nesting limit reached");
            diags.push(
                Diagnostic::error("Too much embedded stack nesting")
                    .with_detail(nesting_detail(callers))
                    .with_subject(call.decl_range.clone()),
            );
            continue;
        }

        tracing::debug!(call = %call.name, from = %addr, to = %child_addr, "loading embedded stack");
        let (child, child_diags) = load_config_node(&child_addr, bundle, loader, &chain);
        diags.extend(child_diags);
        if let Some(child) = child {
            children.insert(call.name.clone(), child);
        }
    }

    for component in stack.components.values_mut() {
        match resolve_final_source_addr(
            addr,
            &component.source_addr,
            &component.version_constraints,
            bundle,
        ) {
            Ok(a) => component.final_source_addr = Some(a),
            Err(e) => diags.push(
                invalid_source_addr(&component.source_addr, &e)
                    .with_subject(component.source_addr_range.clone()),
            ),
        }
    }

    (Some(ConfigNode { stack, children }), diags)
}

fn invalid_source_addr(source: &Source, err: &ResolveError) -> Diagnostic {
    if err.is_internal() {
        tracing::error!(%source, error = %err, "source bundle is inconsistent with the configuration");
    } else {
        tracing::warn!(%source, error = %err, "cannot resolve source address");
    }
    Diagnostic::error("Invalid source address").with_detail(format!(
        "Cannot use {:?} as a source address here: {}.",
        source.to_string(),
        err
    ))
}

fn nesting_detail(callers: &[FinalSource]) -> String {
    let mut chain = String::new();
    for (i, addr) in callers.iter().enumerate() {
        let _ = write!(chain, "\n  {:2}: {}", i + 1, addr);
    }
    format!(
        "This embedded stack call is nested {} levels deep, which is greater than the nesting safety limit.\n\n\
         We recommend keeping stack configuration trees relatively flat, ideally using composition of a flat set of nested calls at the root.\n\n\
         Embedded stacks leading to this point:{}",
        callers.len(),
        chain
    )
}

// ============================================================================
// Inspection
// ============================================================================

impl Config {
    /// Visit every node, parents before children, with the call names
    /// leading to it from the root.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&[&str], &ConfigNode),
    {
        let mut path = Vec::new();
        walk_node(&self.root, &mut path, &mut visit);
    }

    pub fn stack_count(&self) -> usize {
        let mut n = 0;
        self.walk(|_, _| n += 1);
        n
    }

    pub fn component_count(&self) -> usize {
        let mut n = 0;
        self.walk(|_, node| n += node.stack.components.len());
        n
    }

    /// BLAKE3 digest of every resolved address and type in the tree.
    /// Returns `"blake3:{hex}"`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        self.walk(|path, node| {
            let prefix = path.join(".");
            hasher.update(format!("stack\0{}\0{}\n", prefix, node.stack.source_addr).as_bytes());
            for (name, c) in &node.stack.components {
                let addr = c
                    .final_source_addr
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                hasher.update(format!("component\0{}\0{}\0{}\n", prefix, name, addr).as_bytes());
            }
            for (name, v) in &node.stack.input_variables {
                hasher.update(format!("variable\0{}\0{}\0{}\n", prefix, name, type_key(&v.r#type)).as_bytes());
            }
            for (name, o) in &node.stack.output_values {
                hasher.update(format!("output\0{}\0{}\0{}\n", prefix, name, type_key(&o.r#type)).as_bytes());
            }
        });
        format!("blake3:{}", hasher.finalize().to_hex())
    }
}

fn walk_node<'a, F>(node: &'a ConfigNode, path: &mut Vec<&'a str>, visit: &mut F)
where
    F: FnMut(&[&str], &ConfigNode),
{
    visit(path, node);
    for (name, child) in &node.children {
        path.push(name);
        walk_node(child, path, visit);
        path.pop();
    }
}

fn type_key(tc: &TypeConstraint) -> String {
    let ty = tc.constraint.as_ref().map(|t| t.to_string()).unwrap_or_default();
    let defaults = match &tc.defaults {
        Some(d) => serde_json::to_string(&d.defaults).unwrap_or_default() + &d.paths().join(","),
        None => String::new(),
    };
    format!("{}\0{}", ty, defaults)
}

impl ConfigNode {
    /// The node reached by following `path` call names from this one.
    pub fn descendant(&self, path: &[&str]) -> Option<&ConfigNode> {
        path.iter()
            .try_fold(self, |node, name| node.children.get(*name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sourceaddr::{parse_final_source, RegistryPackage, RemotePackage, RemoteSource};
    use crate::core::typeexpr::Type;
    use semver::Version;
    use std::collections::HashMap;
    use std::path::Path;

    fn write_stack(root: &Path, rel: &str, yaml: &str) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.stack.yaml"), yaml).unwrap();
    }

    fn root_addr() -> FinalSource {
        parse_final_source("./").unwrap()
    }

    #[test]
    fn test_sf009_load_simple_tree() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(
            dir.path(),
            ".",
            r#"
stacks:
  network:
    source: ./network
  app:
    source: ./app
components:
  dns:
    source: ./components/dns
"#,
        );
        write_stack(
            dir.path(),
            "network",
            r#"
required_providers:
  aws:
    source: hashicorp/aws
variables:
  provider:
    type: providerconfig(aws)
components:
  vpc:
    source: ../components/vpc
"#,
        );
        write_stack(dir.path(), "app", "variables:\n  replicas:\n    type: number\n");

        let bundle = SourceBundle::new(dir.path());
        let (config, diags) = load_config_dir(&root_addr(), &bundle);
        assert!(diags.is_empty(), "unexpected: {:?}", diags);
        let config = config.unwrap();

        assert_eq!(config.stack_count(), 3);
        assert_eq!(config.component_count(), 2);
        assert_eq!(
            config.root.children.keys().collect::<Vec<_>>(),
            vec!["network", "app"]
        );
        let network = config.root.descendant(&["network"]).unwrap();
        assert_eq!(network.stack.source_addr.to_string(), "./network");
        assert_eq!(
            network.stack.components["vpc"].final_source_addr.as_ref().unwrap().to_string(),
            "./components/vpc"
        );
        assert!(matches!(
            network.stack.input_variables["provider"].r#type.constraint,
            Some(Type::ProviderConfig(_))
        ));
        assert_eq!(
            config.root.descendant(&["app"]).unwrap().stack.input_variables["replicas"]
                .r#type
                .constraint,
            Some(Type::Number)
        );
    }

    #[test]
    fn test_sf009_nesting_limit() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(
            dir.path(),
            ".",
            "stacks:\n  chain:\n    source: ./chain\n  sibling:\n    source: ./sibling\n",
        );
        write_stack(dir.path(), "chain", "stacks:\n  again:\n    source: ./\n");
        write_stack(dir.path(), "sibling", "components:\n  c:\n    source: ./c\n");

        let bundle = SourceBundle::new(dir.path());
        let (config, diags) = load_config_dir(&root_addr(), &bundle);
        let config = config.unwrap();

        assert_eq!(diags.len(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.summary, "Too much embedded stack nesting");
        assert!(diag.detail.contains("nested 20 levels deep"));
        assert!(diag.detail.contains("\n   1: ./\n   2: ./chain"));
        assert!(diag.detail.ends_with("\n  20: ./chain"));
        assert_eq!(
            diag.subject.as_ref().and_then(|s| s.path.as_deref()),
            Some("stacks.again")
        );

        // root, twenty chain levels, and the sibling
        assert_eq!(config.stack_count(), 22);
        let mut path = vec!["chain"];
        path.extend(std::iter::repeat("again").take(19));
        let deepest = config.root.descendant(&path).unwrap();
        assert!(deepest.children.is_empty());
        assert!(config.root.children["sibling"].stack.components["c"]
            .final_source_addr
            .is_some());
    }

    #[test]
    fn test_sf009_failed_calls_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(
            dir.path(),
            ".",
            r#"
stacks:
  missing:
    source: ./does-not-exist
  unpublished:
    source: acme/unknown/aws
  ok:
    source: ./ok
components:
  db:
    source: acme/db/aws
    version: ">= 1.0"
  web:
    source: ./web
"#,
        );
        write_stack(dir.path(), "ok", "{}\n");

        let bundle = SourceBundle::new(dir.path());
        let (config, diags) = load_config_dir(&root_addr(), &bundle);
        let config = config.unwrap();

        assert_eq!(config.root.children.keys().collect::<Vec<_>>(), vec!["ok"]);
        assert_eq!(diags.count_summary("Cannot read stack directory"), 1);
        assert_eq!(diags.count_summary("Invalid source address"), 2);

        let components = &config.root.stack.components;
        assert!(components["db"].final_source_addr.is_none());
        assert!(components["web"].final_source_addr.is_some());

        let db_diag = diags
            .iter()
            .find(|d| d.subject.as_ref().and_then(|s| s.path.as_deref()) == Some("components.db.source"))
            .unwrap();
        assert!(db_diag.detail.starts_with(
            "Cannot use \"registry.stackform.io/acme/db/aws\" as a source address here: no cached versions"
        ));
    }

    #[test]
    fn test_sf009_registry_stack_escaping_package() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_stack(
            work.path(),
            ".",
            r#"
stacks:
  net:
    source: example.com/acme/network/aws//vpc
    version: "~> 1.0"
"#,
        );
        write_stack(
            cache.path(),
            "mono/network/vpc",
            "stacks:\n  shared:\n    source: ../../shared\n",
        );
        write_stack(cache.path(), "mono/shared", "{}\n");

        let bundle = SourceBundle::new(work.path())
            .with_remote_package(
                RemotePackage::parse("git::https://example.com/mono.git?ref=v1").unwrap(),
                cache.path().join("mono"),
            )
            .with_registry_package(
                RegistryPackage::parse("example.com/acme/network/aws").unwrap(),
                Version::new(1, 0, 0),
                RemoteSource::parse("git::https://example.com/mono.git//network?ref=v1").unwrap(),
            );

        let (config, diags) = load_config_dir(&root_addr(), &bundle);
        assert!(diags.is_empty(), "unexpected: {:?}", diags);
        let config = config.unwrap();
        let net = config.root.descendant(&["net"]).unwrap();
        assert_eq!(
            net.stack.source_addr.to_string(),
            "example.com/acme/network/aws@1.0.0//vpc"
        );
        let shared = net.descendant(&["shared"]).unwrap();
        assert_eq!(
            shared.stack.source_addr.to_string(),
            "git::https://example.com/mono.git//shared?ref=v1"
        );
    }

    #[test]
    fn test_sf009_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = SourceBundle::new(dir.path());
        let (config, diags) = load_config_dir(&root_addr(), &bundle);
        assert!(config.is_none());
        assert!(diags.has_errors());
    }

    #[test]
    fn test_sf009_reload_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(
            dir.path(),
            ".",
            r#"
variables:
  settings:
    type: "object({ size = optional(number, 3), name = string })"
stacks:
  child:
    source: ./child
components:
  app:
    source: ./app
"#,
        );
        write_stack(dir.path(), "child", "outputs:\n  id:\n    type: string\n");

        let bundle = SourceBundle::new(dir.path());
        let (first, d1) = load_config_dir(&root_addr(), &bundle);
        let (second, d2) = load_config_dir(&root_addr(), &bundle);
        assert!(d1.is_empty() && d2.is_empty());
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert!(first.fingerprint().starts_with("blake3:"));

        write_stack(dir.path(), "child", "outputs:\n  id:\n    type: number\n");
        let (third, _) = load_config_dir(&root_addr(), &bundle);
        assert_ne!(first.fingerprint(), third.unwrap().fingerprint());
    }

    #[test]
    fn test_sf009_walk_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_stack(dir.path(), ".", "stacks:\n  a:\n    source: ./a\n  b:\n    source: ./b\n");
        write_stack(dir.path(), "a", "stacks:\n  inner:\n    source: ./inner\n");
        write_stack(dir.path(), "a/inner", "{}\n");
        write_stack(dir.path(), "b", "{}\n");

        let (config, _) = load_config_dir(&root_addr(), &SourceBundle::new(dir.path()));
        let mut paths = Vec::new();
        config.unwrap().walk(|path, _| paths.push(path.join(".")));
        assert_eq!(paths, vec!["", "a", "a.inner", "b"]);
    }

    struct MapLoader(HashMap<String, Stack>);

    impl StackLoader for MapLoader {
        fn load_stack(&self, addr: &FinalSource, _: &SourceBundle) -> (Option<Stack>, Diagnostics) {
            match self.0.get(&addr.to_string()) {
                Some(stack) => (Some(stack.clone()), Diagnostics::new()),
                None => (None, Diagnostics::new()),
            }
        }
    }

    #[test]
    fn test_sf009_custom_loader() {
        let mut stacks = HashMap::new();
        stacks.insert("./".to_string(), Stack::empty(root_addr()));
        let loader = MapLoader(stacks);
        let (config, diags) = load_config_dir_with(&loader, &root_addr(), &SourceBundle::new("/unused"));
        assert!(diags.is_empty());
        assert_eq!(config.unwrap().stack_count(), 1);
    }

    #[test]
    #[should_panic(expected = "no stack and no errors")]
    fn test_sf009_loader_contract_violation_panics() {
        let loader = MapLoader(HashMap::new());
        let _ = load_config_dir_with(&loader, &root_addr(), &SourceBundle::new("/unused"));
    }
}
