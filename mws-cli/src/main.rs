use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use mws_coordinator::target::{needs_new_instance, resolve_existing};
use mws_coordinator::{ControlState, CoordinatorSettings, GcDirective, InstanceKey, MetadataStore};
use mws_core::{mws_error_hint, mws_println, mws_success, mws_warning};
use std::path::PathBuf;
use tracing::debug;

mod cli;

use cli::{Args, Command};

fn main() -> Result<()> {
    let _log_guard = mws_logging::init_subscriber();
    let args = Args::parse();
    let store = MetadataStore::on_disk(resolve_root(&args)?);
    debug!(root = %store.root().display(), command = ?args.command, "running command");

    match args.command {
        Command::Status => handle_status_command(&store),
        Command::NewInstance => handle_new_instance_command(&store),
        Command::Pin { key } => handle_pin_command(&store, key),
        Command::Unpin => handle_unpin_command(&store),
        Command::Gc {
            delete,
            prune_before,
        } => handle_gc_command(&store, delete, prune_before),
        Command::ClearGc => handle_clear_gc_command(&store),
    }
}

fn resolve_root(args: &Args) -> Result<PathBuf> {
    if let Some(root) = &args.root {
        return Ok(root.clone());
    }
    if let Some(path) = &args.config {
        let settings = CoordinatorSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        return Ok(settings.root);
    }
    std::env::current_dir().context("Failed to get current directory")
}

fn load_control(store: &MetadataStore) -> Result<ControlState> {
    store.load_control().context("Failed to load control state")
}

fn save_control(store: &MetadataStore, control: &ControlState) -> Result<()> {
    store
        .save_control(control)
        .context("Failed to save control state")
}

fn handle_status_command(store: &MetadataStore) -> Result<()> {
    let control = load_control(store)?;
    let registry = store
        .load_registry()
        .context("Failed to load instance registry")?;

    mws_println!("📊 Multiworkspace: {}", store.root().display());
    if registry.is_empty() {
        mws_println!("   No instances");
    } else {
        mws_println!("   Instances: {}", registry.keys.len());
        for key in &registry.keys {
            let mut markers = Vec::new();
            if registry.current.as_ref() == Some(key) {
                markers.push("current");
            }
            if control.target.as_ref() == Some(key) {
                markers.push("target");
            }
            if !store.instance_exists(key) {
                markers.push("missing");
            }
            if markers.is_empty() {
                mws_println!("   - {}", key);
            } else {
                mws_println!("   - {} ({})", key, markers.join(", "));
            }
        }
    }

    if let Some(target) = control
        .target
        .as_ref()
        .filter(|target| !registry.contains(target))
    {
        mws_println!("   Stale target: {} (ignored)", target);
    }

    if needs_new_instance(&control, &registry) {
        mws_println!("   Next apply: creates a new instance");
    } else if let Some(resolved) = resolve_existing(&control, &registry) {
        mws_println!("   Next apply: {}", resolved.key);
    }

    match control.pending_gc() {
        None => mws_println!("   Pending GC: none"),
        Some(gc) => {
            let mut parts = Vec::new();
            if !gc.delete_keys.is_empty() {
                let keys: Vec<&str> = gc.delete_keys.iter().map(InstanceKey::as_str).collect();
                parts.push(format!("delete {}", keys.join(", ")));
            }
            if let Some(cutoff) = &gc.prune_before {
                parts.push(format!("prune before {cutoff}"));
            }
            mws_println!("   Pending GC: {}", parts.join("; "));
        }
    }

    Ok(())
}

fn handle_new_instance_command(store: &MetadataStore) -> Result<()> {
    let mut control = load_control(store)?;
    control.request_new_instance();
    save_control(store, &control)?;
    mws_success!("The next apply will create a new instance");
    Ok(())
}

fn handle_pin_command(store: &MetadataStore, key: String) -> Result<()> {
    let key = InstanceKey::from(key);
    let registry = store
        .load_registry()
        .context("Failed to load instance registry")?;
    if !registry.contains(&key) {
        mws_error_hint!("Run 'mws status' to list registered instances");
        bail!("Instance {} is not registered", key);
    }

    let mut control = load_control(store)?;
    control.pin(key.clone());
    save_control(store, &control)?;
    mws_success!("Pinned {}", key);
    Ok(())
}

fn handle_unpin_command(store: &MetadataStore) -> Result<()> {
    let mut control = load_control(store)?;
    match control.unpin() {
        Some(previous) => {
            save_control(store, &control)?;
            mws_success!("Unpinned {}", previous);
        }
        None => mws_warning!("No instance is pinned"),
    }
    Ok(())
}

fn parse_cutoff(raw: &str) -> Result<DateTime<Utc>> {
    let cutoff = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid --prune-before '{raw}', expected RFC3339"))?;
    Ok(cutoff.with_timezone(&Utc))
}

fn handle_gc_command(
    store: &MetadataStore,
    delete: Vec<String>,
    prune_before: Option<String>,
) -> Result<()> {
    let mut directive = GcDirective::delete(delete);
    if let Some(raw) = prune_before.as_deref() {
        directive = directive.with_prune_before(parse_cutoff(raw)?);
    }
    if directive.is_empty() {
        mws_error_hint!("Pass --delete KEY or --prune-before RFC3339");
        bail!("Nothing to schedule");
    }

    let registry = store
        .load_registry()
        .context("Failed to load instance registry")?;
    for key in directive.delete_keys.iter().filter(|k| !registry.contains(k)) {
        mws_warning!("Instance {} is not registered and will be ignored", key);
    }

    let mut control = load_control(store)?;
    control.schedule_gc(directive);
    save_control(store, &control)?;
    mws_success!("Garbage collection scheduled for the next apply or refresh");
    Ok(())
}

fn handle_clear_gc_command(store: &MetadataStore) -> Result<()> {
    let mut control = load_control(store)?;
    match control.clear_gc() {
        Some(_) => {
            save_control(store, &control)?;
            mws_success!("Pending garbage collection cleared");
        }
        None => mws_warning!("No garbage collection is pending"),
    }
    Ok(())
}
