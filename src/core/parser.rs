//! SF-007: Stack file parsing and the single-stack loader.
//!
//! A stack is a directory holding one or more `*.stack.yaml` files. The files
//! are read in name order and merged into one `Stack`. Declarations may be
//! split across files but a name may only be declared once.
//!
//! Problems with an individual declaration drop that declaration and are
//! reported as diagnostics. Problems with a whole file (unreadable, invalid
//! YAML) mean no stack is returned at all.

use super::bundle::SourceBundle;
use super::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use super::sourceaddr::{parse_source, FinalSource, Source};
use super::types::*;
use super::versions::VersionConstraints;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

/// Suffix that marks a file as part of a stack definition.
pub const STACK_FILE_SUFFIX: &str = ".stack.yaml";

/// A near miss of `STACK_FILE_SUFFIX` that is skipped with a warning.
const MISNAMED_STACK_FILE_SUFFIX: &str = ".stack.yml";

// ============================================================================
// Raw YAML schema
// ============================================================================

/// One `*.stack.yaml` file as written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackFile {
    #[serde(default)]
    pub required_providers: Option<IndexMap<String, RawProviderRequirement>>,

    #[serde(default)]
    pub variables: IndexMap<String, RawVariable>,

    #[serde(default)]
    pub outputs: IndexMap<String, RawOutput>,

    /// Embedded stack calls
    #[serde(default)]
    pub stacks: IndexMap<String, RawCall>,

    #[serde(default)]
    pub components: IndexMap<String, RawCall>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProviderRequirement {
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawVariable {
    #[serde(rename = "type", default = "default_type")]
    pub type_expr: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOutput {
    #[serde(rename = "type", default = "default_type")]
    pub type_expr: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub value: Option<String>,
}

/// An embedded stack or component call.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCall {
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub inputs: IndexMap<String, serde_yaml_ng::Value>,
}

fn default_type() -> String {
    "any".to_string()
}

// ============================================================================
// Loader
// ============================================================================

/// Loads the definition of a single stack, without following its calls.
///
/// Implementations must return at least one error diagnostic whenever they
/// return no stack.
pub trait StackLoader {
    fn load_stack(&self, addr: &FinalSource, bundle: &SourceBundle) -> (Option<Stack>, Diagnostics);
}

/// Loads `*.stack.yaml` files from the directory the bundle maps an address
/// to.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlStackLoader;

impl StackLoader for YamlStackLoader {
    fn load_stack(&self, addr: &FinalSource, bundle: &SourceBundle) -> (Option<Stack>, Diagnostics) {
        load_single_stack(addr, bundle)
    }
}

/// Load and decode every stack file for the stack at `addr`.
pub fn load_single_stack(addr: &FinalSource, bundle: &SourceBundle) -> (Option<Stack>, Diagnostics) {
    let mut diags = Diagnostics::new();

    let dir = match bundle.local_path_for_source(addr) {
        Ok(dir) => dir,
        Err(e) => {
            diags.push(
                Diagnostic::error("Stack source not available")
                    .with_detail(format!("Cannot load the stack at {}: {}.", addr, e)),
            );
            return (None, diags);
        }
    };

    let (files, misnamed) = match stack_files(&dir) {
        Ok(found) => found,
        Err(e) => {
            diags.push(
                Diagnostic::error("Cannot read stack directory")
                    .with_detail(format!("Cannot load the stack at {}: {}.", addr, e)),
            );
            return (None, diags);
        }
    };
    for name in misnamed {
        diags.push(
            Diagnostic::warning("Ignored stack file")
                .with_detail(format!(
                    "The file {} in stack {} is not loaded. Stack files must be named *{}.",
                    name, addr, STACK_FILE_SUFFIX
                ))
                .with_subject(SourceRange::file(&name)),
        );
    }
    if files.is_empty() {
        diags.push(Diagnostic::error("No stack configuration files").with_detail(format!(
            "The directory {} for stack {} contains no files named *{}.",
            dir.display(),
            addr,
            STACK_FILE_SUFFIX
        )));
        return (None, diags);
    }

    let mut stack = Stack::empty(addr.clone());
    let mut complete = true;
    for name in files {
        let path = dir.join(&name);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                diags.push(
                    Diagnostic::error("Cannot read stack file")
                        .with_detail(format!("Cannot read {}: {}.", path.display(), e))
                        .with_subject(SourceRange::file(&name)),
                );
                complete = false;
                continue;
            }
        };
        match parse_stack_file(&name, &content) {
            Ok(file) => diags.extend(decode_stack_file(&name, file, &mut stack)),
            Err(diag) => {
                diags.push(diag);
                complete = false;
            }
        }
    }

    tracing::debug!(
        %addr,
        stacks = stack.embedded_stacks.len(),
        components = stack.components.len(),
        errors = diags.errors().count(),
        "loaded stack"
    );

    if complete {
        (Some(stack), diags)
    } else {
        (None, diags)
    }
}

/// Stack file names in `dir`, sorted, along with misnamed ones that will be
/// skipped.
fn stack_files(dir: &Path) -> Result<(Vec<String>, Vec<String>), String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("cannot read {}: {}", dir.display(), e))?;
    let (mut names, mut misnamed): (Vec<String>, Vec<String>) = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(STACK_FILE_SUFFIX) || n.ends_with(MISNAMED_STACK_FILE_SUFFIX))
        .partition(|n| n.ends_with(STACK_FILE_SUFFIX));
    names.sort();
    misnamed.sort();
    Ok((names, misnamed))
}

/// Parse one stack file's YAML.
pub fn parse_stack_file(filename: &str, yaml: &str) -> Result<StackFile, Diagnostic> {
    serde_yaml_ng::from_str(yaml).map_err(|e| {
        let subject = match e.location() {
            Some(loc) => SourceRange::at_position(filename, loc.line(), loc.column()),
            None => SourceRange::file(filename),
        };
        Diagnostic::error("Invalid stack file")
            .with_detail(format!("Failed to parse {}: {}.", filename, e))
            .with_subject(subject)
    })
}

/// Decode a parsed file into `stack`, returning any declaration problems.
pub fn decode_stack_file(filename: &str, file: StackFile, stack: &mut Stack) -> Diagnostics {
    let mut diags = Diagnostics::new();

    if let Some(reqs) = file.required_providers {
        let target = stack.required_providers.get_or_insert_with(ProviderRequirements::default);
        for (local_name, raw) in reqs {
            let range = SourceRange::at_path(filename, format!("required_providers.{}", local_name));
            if let Some(prev) = target.requirements.get(&local_name) {
                diags.push(duplicate("provider local name", &local_name, &prev.decl_range, range));
                continue;
            }
            if let Some(req) = decode_provider_requirement(&local_name, raw, range, &mut diags) {
                target.requirements.insert(local_name, req);
            }
        }
    }

    for (name, raw) in file.variables {
        let range = SourceRange::at_path(filename, format!("variables.{}", name));
        if let Some(prev) = stack.input_variables.get(&name) {
            diags.push(duplicate("input variable", &name, &prev.decl_range, range));
            continue;
        }
        if !check_name(&name, &range, &mut diags) {
            continue;
        }
        let var = InputVariable {
            name: name.clone(),
            description: raw.description,
            sensitive: raw.sensitive,
            r#type: TypeConstraint::new(raw.type_expr, range.child("type")),
            decl_range: range,
        };
        stack.input_variables.insert(name, var);
    }

    for (name, raw) in file.outputs {
        let range = SourceRange::at_path(filename, format!("outputs.{}", name));
        if let Some(prev) = stack.output_values.get(&name) {
            diags.push(duplicate("output value", &name, &prev.decl_range, range));
            continue;
        }
        if !check_name(&name, &range, &mut diags) {
            continue;
        }
        let out = OutputValue {
            name: name.clone(),
            description: raw.description,
            sensitive: raw.sensitive,
            value: raw.value,
            r#type: TypeConstraint::new(raw.type_expr, range.child("type")),
            decl_range: range,
        };
        stack.output_values.insert(name, out);
    }

    for (name, raw) in file.stacks {
        let range = SourceRange::at_path(filename, format!("stacks.{}", name));
        if let Some(prev) = stack.embedded_stacks.get(&name) {
            diags.push(duplicate("embedded stack call", &name, &prev.decl_range, range));
            continue;
        }
        if !check_name(&name, &range, &mut diags) {
            continue;
        }
        let Some((source_addr, version_constraints)) = decode_call_source(&raw, &range, &mut diags) else {
            continue;
        };
        let call = EmbeddedStackCall {
            name: name.clone(),
            source_addr,
            version_constraints,
            inputs: raw.inputs,
            source_addr_range: range.child("source"),
            decl_range: range,
        };
        stack.embedded_stacks.insert(name, call);
    }

    for (name, raw) in file.components {
        let range = SourceRange::at_path(filename, format!("components.{}", name));
        if let Some(prev) = stack.components.get(&name) {
            diags.push(duplicate("component call", &name, &prev.decl_range, range));
            continue;
        }
        if !check_name(&name, &range, &mut diags) {
            continue;
        }
        let Some((source_addr, version_constraints)) = decode_call_source(&raw, &range, &mut diags) else {
            continue;
        };
        let call = ComponentCall {
            name: name.clone(),
            source_addr,
            version_constraints,
            inputs: raw.inputs,
            source_addr_range: range.child("source"),
            decl_range: range,
            final_source_addr: None,
        };
        stack.components.insert(name, call);
    }

    diags
}

fn decode_provider_requirement(
    local_name: &str,
    raw: RawProviderRequirement,
    range: SourceRange,
    diags: &mut Diagnostics,
) -> Option<ProviderRequirement> {
    let provider = match ProviderAddr::parse(&raw.source) {
        Ok(p) => p,
        Err(e) => {
            diags.push(
                Diagnostic::error("Invalid provider source address")
                    .with_detail(format!("{}.", e))
                    .with_subject(range.child("source")),
            );
            return None;
        }
    };
    let version_constraints = match raw.version.as_deref().map(VersionConstraints::parse) {
        None => VersionConstraints::any(),
        Some(Ok(c)) => c,
        Some(Err(e)) => {
            diags.push(
                Diagnostic::error("Invalid version constraints")
                    .with_detail(format!("{}.", e))
                    .with_subject(range.child("version")),
            );
            return None;
        }
    };
    Some(ProviderRequirement {
        local_name: local_name.to_string(),
        provider,
        version_constraints,
        decl_range: range,
    })
}

fn decode_call_source(
    raw: &RawCall,
    range: &SourceRange,
    diags: &mut Diagnostics,
) -> Option<(Source, VersionConstraints)> {
    let source = match parse_source(&raw.source) {
        Ok(s) => s,
        Err(e) => {
            diags.push(
                Diagnostic::error("Invalid source address")
                    .with_detail(format!(
                        "Cannot use {:?} as a source address here: {}.",
                        raw.source, e
                    ))
                    .with_subject(range.child("source")),
            );
            return None;
        }
    };
    let constraints = match raw.version.as_deref() {
        None => VersionConstraints::any(),
        Some(_) if !source.is_registry() => {
            diags.push(
                Diagnostic::error("Invalid version constraints")
                    .with_detail(format!(
                        "Version constraints are only allowed for registry sources, but {} is not a registry source address.",
                        source
                    ))
                    .with_subject(range.child("version")),
            );
            return None;
        }
        Some(v) => match VersionConstraints::parse(v) {
            Ok(c) => c,
            Err(e) => {
                diags.push(
                    Diagnostic::error("Invalid version constraints")
                        .with_detail(format!("{}.", e))
                        .with_subject(range.child("version")),
                );
                return None;
            }
        },
    };
    Some((source, constraints))
}

fn check_name(name: &str, range: &SourceRange, diags: &mut Diagnostics) -> bool {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        diags.push(
            Diagnostic::error("Invalid name")
                .with_detail(format!(
                    "{:?} is not a valid name: names must start with a letter or underscore and contain only letters, digits, underscores, and dashes.",
                    name
                ))
                .with_subject(range.clone()),
        );
    }
    valid
}

fn duplicate(kind: &str, name: &str, first: &SourceRange, range: SourceRange) -> Diagnostic {
    Diagnostic::error(format!("Duplicate {} declaration", kind))
        .with_detail(format!(
            "A {} named {:?} was already declared at {}. Each name must be unique within a stack.",
            kind, name, first
        ))
        .with_subject(range)
}
