//! SF-011: CLI subcommands: init, validate, show.

use crate::core::bundle::SourceBundle;
use crate::core::config::{load_config_dir, Config, ConfigNode};
use crate::core::diagnostics::Diagnostics;
use crate::core::sourceaddr::{FinalSource, LocalSource};
use crate::core::types::TypeConstraint;
use clap::Subcommand;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "STACKFORM_LOG";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter stack in a directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Load a stack configuration tree and report problems
    Validate {
        /// Root stack directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Source bundle directory containing bundle.yaml
        #[arg(short, long)]
        bundle: Option<PathBuf>,
    },

    /// Print the resolved stack tree
    Show {
        /// Root stack directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Source bundle directory containing bundle.yaml
        #[arg(short, long)]
        bundle: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Install the stderr log subscriber. `level` overrides `STACKFORM_LOG`;
/// with neither set only warnings and errors are shown.
pub fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { path, bundle } => cmd_validate(&path, bundle.as_deref()),
        Commands::Show { path, bundle, json } => cmd_show(&path, bundle.as_deref(), json),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let stack_path = path.join("main.stack.yaml");
    if stack_path.exists() {
        return Err(format!("{} already exists", stack_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = r#"required_providers: {}

variables: {}

outputs: {}

# Embedded stacks, e.g.
#   network:
#     source: ./network
stacks: {}

# Components, e.g.
#   database:
#     source: example.com/acme/db/aws
#     version: "~> 1.0"
components: {}
"#;
    std::fs::write(&stack_path, template)
        .map_err(|e| format!("cannot write {}: {}", stack_path.display(), e))?;

    println!("Initialized stack at {}", path.display());
    println!("  Created: {}", stack_path.display());
    Ok(())
}

fn cmd_validate(path: &Path, bundle_dir: Option<&Path>) -> Result<(), String> {
    let (config, diags) = load(path, bundle_dir)?;
    print_diagnostics(&diags);
    check_errors(&diags)?;
    if let Some(config) = config {
        println!(
            "OK: {} ({} stacks, {} components)",
            path.display(),
            config.stack_count(),
            config.component_count()
        );
    }
    Ok(())
}

fn cmd_show(path: &Path, bundle_dir: Option<&Path>, json: bool) -> Result<(), String> {
    let (config, diags) = load(path, bundle_dir)?;
    print_diagnostics(&diags);
    if let Some(config) = &config {
        if json {
            let out = serde_json::to_string_pretty(&render_json(config))
                .map_err(|e| format!("JSON serialization error: {}", e))?;
            println!("{}", out);
        } else {
            print!("{}", render_text(config));
        }
    }
    check_errors(&diags)
}

/// Load the tree rooted at `path`, reading non-local sources from the
/// bundle in `bundle_dir` when given.
fn load(path: &Path, bundle_dir: Option<&Path>) -> Result<(Option<Config>, Diagnostics), String> {
    let bundle = match bundle_dir {
        Some(dir) => SourceBundle::open(dir)?.with_local_root(path),
        None => SourceBundle::new(path),
    };
    let root = LocalSource::new("./").map_err(|e| e.to_string())?;
    Ok(load_config_dir(&FinalSource::Local(root), &bundle))
}

fn print_diagnostics(diags: &Diagnostics) {
    for d in diags {
        eprintln!("{}\n", d);
    }
}

fn check_errors(diags: &Diagnostics) -> Result<(), String> {
    let n = diags.errors().count();
    if n == 0 {
        Ok(())
    } else {
        Err(format!("{} configuration error(s)", n))
    }
}

fn type_label(tc: &TypeConstraint) -> String {
    match &tc.constraint {
        Some(ty) => ty.to_string(),
        None => tc.expression.clone(),
    }
}

fn render_text(config: &Config) -> String {
    let mut out = String::new();
    config.walk(|path, node| {
        let indent = "  ".repeat(path.len());
        let name = path.last().copied().unwrap_or("<root>");
        let _ = writeln!(out, "{}stack {} ({})", indent, name, node.stack.source_addr);
        for (name, v) in &node.stack.input_variables {
            let _ = writeln!(out, "{}  variable {}: {}", indent, name, type_label(&v.r#type));
        }
        for (name, o) in &node.stack.output_values {
            let _ = writeln!(out, "{}  output {}: {}", indent, name, type_label(&o.r#type));
        }
        for (name, c) in &node.stack.components {
            let addr = match &c.final_source_addr {
                Some(a) => a.to_string(),
                None => "<unresolved>".to_string(),
            };
            let _ = writeln!(out, "{}  component {} -> {}", indent, name, addr);
        }
    });
    let _ = writeln!(out, "fingerprint: {}", config.fingerprint());
    out
}

fn types_json<'a>(
    decls: impl Iterator<Item = (&'a String, &'a TypeConstraint)>,
) -> serde_json::Map<String, serde_json::Value> {
    decls
        .map(|(name, tc)| {
            let defaults = tc.defaults.as_ref().map(|d| d.paths()).unwrap_or_default();
            (
                name.clone(),
                serde_json::json!({ "type": type_label(tc), "defaults": defaults }),
            )
        })
        .collect()
}

fn render_node_json(path: &[&str], node: &ConfigNode) -> serde_json::Value {
    let components: serde_json::Map<String, serde_json::Value> = node
        .stack
        .components
        .iter()
        .map(|(name, c)| {
            let addr = c.final_source_addr.as_ref().map(|a| a.to_string());
            (name.clone(), serde_json::json!(addr))
        })
        .collect();
    serde_json::json!({
        "path": path.join("."),
        "source": node.stack.source_addr.to_string(),
        "variables": types_json(node.stack.input_variables.iter().map(|(n, v)| (n, &v.r#type))),
        "outputs": types_json(node.stack.output_values.iter().map(|(n, o)| (n, &o.r#type))),
        "components": components,
    })
}

fn render_json(config: &Config) -> serde_json::Value {
    let mut stacks = Vec::new();
    config.walk(|path, node| stacks.push(render_node_json(path, node)));
    serde_json::json!({
        "stacks": stacks,
        "fingerprint": config.fingerprint(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tree(root: &Path) {
        std::fs::write(
            root.join("main.stack.yaml"),
            r#"
variables:
  region:
    type: string
stacks:
  net:
    source: ./net
components:
  app:
    source: ./app
"#,
        )
        .unwrap();
        std::fs::create_dir_all(root.join("net")).unwrap();
        std::fs::write(root.join("net/main.stack.yaml"), "outputs:\n  id:\n    type: number\n").unwrap();
    }

    #[test]
    fn test_sf011_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("new-stack");
        cmd_init(&sub).unwrap();
        assert!(sub.join("main.stack.yaml").exists());
        // the starter stack must itself be valid
        cmd_validate(&sub, None).unwrap();
    }

    #[test]
    fn test_sf011_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.stack.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_sf011_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        cmd_validate(dir.path(), None).unwrap();
    }

    #[test]
    fn test_sf011_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.stack.yaml"),
            "stacks:\n  gone:\n    source: ./gone\n",
        )
        .unwrap();
        let err = cmd_validate(dir.path(), None).unwrap_err();
        assert_eq!(err, "1 configuration error(s)");
    }

    #[test]
    fn test_sf011_validate_passes_with_warnings() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        std::fs::write(dir.path().join("old.stack.yml"), "stacks: {}\n").unwrap();
        let (_, diags) = load(dir.path(), None).unwrap();
        assert_eq!(diags.len(), 1);
        assert!(!diags.has_errors());
        cmd_validate(dir.path(), None).unwrap();
    }

    #[test]
    fn test_sf011_validate_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let err = cmd_validate(dir.path(), Some(&dir.path().join("nope"))).unwrap_err();
        assert!(err.contains("bundle.yaml"));
    }

    #[test]
    fn test_sf011_validate_with_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.stack.yaml"),
            "components:\n  db:\n    source: acme/db/aws\n    version: \"~> 2.0\"\n",
        )
        .unwrap();
        std::fs::write(
            bundle.path().join("bundle.yaml"),
            r#"
registry:
  - package: acme/db/aws
    versions:
      "2.3.1": "https://example.com/db-2.3.1.tgz"
"#,
        )
        .unwrap();
        cmd_validate(dir.path(), Some(bundle.path())).unwrap();

        let (config, _) = load(dir.path(), Some(bundle.path())).unwrap();
        let config = config.unwrap();
        assert_eq!(
            config.root.stack.components["db"]
                .final_source_addr
                .as_ref()
                .unwrap()
                .to_string(),
            "registry.stackform.io/acme/db/aws@2.3.1"
        );
    }

    #[test]
    fn test_sf011_render_text() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (config, _) = load(dir.path(), None).unwrap();
        let text = render_text(&config.unwrap());
        assert!(text.starts_with("stack <root> (./)\n  variable region: string\n"));
        assert!(text.contains("  component app -> ./app\n"));
        assert!(text.contains("  stack net (./net)\n    output id: number\n"));
        assert!(text.contains("fingerprint: blake3:"));
    }

    #[test]
    fn test_sf011_render_json() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (config, _) = load(dir.path(), None).unwrap();
        let json = render_json(&config.unwrap());
        let stacks = json["stacks"].as_array().unwrap();
        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0]["components"]["app"], "./app");
        assert_eq!(stacks[1]["path"], "net");
        assert_eq!(stacks[1]["outputs"]["id"]["type"], "number");
    }

    #[test]
    fn test_sf011_dispatch_show() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        dispatch(Commands::Show {
            path: dir.path().to_path_buf(),
            bundle: None,
            json: true,
        })
        .unwrap();
    }

    #[test]
    fn test_sf011_init_logging_twice() {
        init_logging(Some("debug"));
        init_logging(None);
    }
}
