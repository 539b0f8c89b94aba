//! KL-016: CLI subcommands — init, validate, generate, show, check.

use crate::core::generator::{self, Generation};
use crate::core::resolver::{self, AuthMode, Resolved, RoleScope, SecretPlacement};
use crate::core::{output, parser, types};
use crate::tripwire::drift;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new keel project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate keel.yaml
    Validate {
        /// Path to keel.yaml
        #[arg(short, long, default_value = "keel.yaml")]
        file: PathBuf,
    },

    /// Write manifest.json and Bicep modules
    Generate {
        /// Path to keel.yaml
        #[arg(short, long, default_value = "keel.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "infra")]
        output: PathBuf,
    },

    /// Show how each resource will be provisioned
    Show {
        /// Path to keel.yaml
        #[arg(short, long, default_value = "keel.yaml")]
        file: PathBuf,
    },

    /// Compare generated output on disk with a fresh generation
    Check {
        /// Path to keel.yaml
        #[arg(short, long, default_value = "keel.yaml")]
        file: PathBuf,

        /// Output directory to check
        #[arg(short, long, default_value = "infra")]
        output: PathBuf,

        /// Exit non-zero on any drift (for CI)
        #[arg(long)]
        tripwire: bool,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Generate { file, output } => cmd_generate(&file, &output),
        Commands::Show { file } => cmd_show(&file),
        Commands::Check {
            file,
            output,
            tripwire,
        } => cmd_check(&file, &output, tripwire),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("keel.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = r#"version: "1.0"
name: my-app
description: "Managed by keel"

resources:
  cache:
    type: cache
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized keel project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let (app, _) = load_generation(file)?;
    println!("OK: {} ({} resources)", app.name, app.resources.len());
    Ok(())
}

/// Parse and validate a keel.yaml, printing every validation error.
fn parse_and_validate(file: &Path) -> Result<types::AppConfig, String> {
    let app = parser::parse_app_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_app(&app);
    if errors.is_empty() {
        return Ok(app);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

/// Parse, validate, build and generate.
fn load_generation(file: &Path) -> Result<(types::AppConfig, Generation), String> {
    let app = parse_and_validate(file)?;
    let graph = parser::build_graph(&app).map_err(|e| e.to_string())?;
    let generation = generator::generate(&graph, &app.context).map_err(|e| e.to_string())?;
    Ok((app, generation))
}

fn cmd_generate(file: &Path, out: &Path) -> Result<(), String> {
    let (app, generation) = load_generation(file)?;
    let written = output::write_generation(out, &generation).map_err(|e| e.to_string())?;
    let fingerprint = generation.fingerprint().map_err(|e| e.to_string())?;

    println!("Generated {} into {}", app.name, out.display());
    for path in &written {
        println!("  Wrote: {}", path.display());
    }
    println!("  Fingerprint: {}", fingerprint);
    Ok(())
}

fn cmd_show(file: &Path) -> Result<(), String> {
    let app = parse_and_validate(file)?;
    let graph = parser::build_graph(&app).map_err(|e| e.to_string())?;
    let resolved = resolver::resolve_all(&graph, &app.context).map_err(|e| e.to_string())?;

    println!("{} ({} resources)", app.name, resolved.len());
    for r in &resolved {
        println!("  {}: {}", r.name(), describe(r));
    }
    Ok(())
}

/// One-line summary of a resolved resource.
fn describe(resolved: &Resolved) -> String {
    match resolved {
        Resolved::Cache(c) => {
            let auth = match &c.auth {
                AuthMode::Identity { scope, policies } => {
                    let names: Vec<String> = policies.iter().map(|p| p.to_string()).collect();
                    let who = match scope {
                        RoleScope::PerResource => "deploying principal".to_string(),
                        RoleScope::Environment(env) => format!("environment '{}'", env),
                    };
                    format!("identity ({}) for {}", names.join(", "), who)
                }
                AuthMode::AccessKey(SecretPlacement::Inline) => "access key, inline".to_string(),
                AuthMode::AccessKey(SecretPlacement::Vault(v)) => {
                    format!("access key, secret in vault '{}'", v.name)
                }
            };
            format!("cache {}: {}", c.sku.name, auth)
        }
        Resolved::Container(c) => format!("container {}", c.spec.reference()),
        Resolved::Vault(v) => match &v.derived_for {
            Some(owner) => format!("key vault (derived for '{}')", owner),
            None => "key vault".to_string(),
        },
        Resolved::Project(p) => {
            if p.connections.is_empty() {
                format!("project {}", p.path)
            } else {
                format!("project {} ← {}", p.path, p.connections.join(", "))
            }
        }
    }
}

fn cmd_check(file: &Path, out: &Path, tripwire_mode: bool) -> Result<(), String> {
    let (_, generation) = load_generation(file)?;
    let findings = drift::detect_drift(out, &generation).map_err(|e| e.to_string())?;

    println!("Checking {}...", out.display());
    if findings.is_empty() {
        println!("  No drift detected.");
        return Ok(());
    }
    for f in &findings {
        println!("  {}: {}", f.kind, f.path);
        println!("    Expected: {}", f.expected_hash);
        println!("    Actual:   {}", f.actual_hash);
    }
    println!();
    println!("Drift detected: {} file(s)", findings.len());
    if tripwire_mode {
        return Err(format!("{} drift finding(s)", findings.len()));
    }
    Ok(())
}
