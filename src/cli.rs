// CLI module - command-line argument parsing and handlers
//
// Top-level flags pre-seed the timeline filter; subcommands cover
// configuration management and server-side log export:
// - config --show: Display effective configuration
// - config --reset: Regenerate config file with defaults
// - config --edit: Open config file in $EDITOR
// - config --update: Merge new defaults into existing config
// - export: Download the server-side log archive

use crate::config::{Config, VERSION};
use crate::events::Severity;
use crate::filter::{CategoryFilter, FilterPatch, SeverityFilter};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

/// lectail - live activity console for the lecture-manager server
#[derive(Parser)]
#[command(name = "lectail")]
#[command(version = VERSION)]
#[command(about = "Live activity console for the lecture-manager server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Only show entries at this severity (info, warning, error, critical).
    /// "error" includes critical entries.
    #[arg(long)]
    pub severity: Option<String>,

    /// Only show entries in this category (exact match, case-insensitive)
    #[arg(long)]
    pub category: Option<String>,

    /// Only show entries carrying this correlation id (substring match)
    #[arg(long)]
    pub correlation: Option<String>,

    /// Only show entries for this task id (substring match)
    #[arg(long)]
    pub task: Option<String>,

    /// Free-text search over message, category, and context
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Open config file in $EDITOR
        #[arg(long)]
        edit: bool,

        /// Update config with new defaults (preserves user values)
        #[arg(long)]
        update: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Download the server-side log archive
    Export {
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Initial filter from the top-level flags. Exits with a message on an
    /// unrecognized severity name rather than silently showing everything.
    pub fn filter_patch(&self) -> FilterPatch {
        let severity = self.severity.as_deref().map(|s| {
            let Some(parsed) = Severity::parse(s) else {
                eprintln!("Error: unknown severity '{s}' (expected info, warning, error, or critical)");
                std::process::exit(2);
            };
            SeverityFilter::Exact(parsed)
        });

        FilterPatch {
            severity,
            category: self.category.clone().map(CategoryFilter::Exact),
            correlation: self.correlation.clone(),
            task: self.task.clone(),
            query: self.query.clone(),
        }
    }
}

/// Handle the config subcommand.
pub fn handle_config(show: bool, reset: bool, edit: bool, update: bool, path: bool) {
    if path {
        handle_config_path();
    } else if show {
        handle_config_show();
    } else if reset {
        handle_config_reset();
    } else if edit {
        handle_config_edit();
    } else if update {
        handle_config_update();
    } else {
        // No flag provided, show help
        println!("Usage: lectail config [--show|--reset|--edit|--update|--path]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --reset   Reset config file to defaults");
        println!("  --edit    Open config file in $EDITOR");
        println!("  --update  Update config with new defaults (preserves user values)");
        println!("  --path    Show config file path");
    }
}

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_config_show() {
    let config = Config::from_env();

    println!("# Effective configuration (env > file > defaults)");
    println!();
    println!("server_url = {:?}", config.server_url);
    println!("demo_mode = {}", config.demo_mode);
    println!();
    println!("[stream]");
    println!("retention_window_secs = {}", config.stream.retention_window_secs);
    println!("reconnect_delay_secs = {}", config.stream.reconnect_delay_secs);
    println!("poll_interval_secs = {}", config.stream.poll_interval_secs);
    println!("ack_debounce_ms = {}", config.stream.ack_debounce_ms);
    println!();
    println!("[logging]");
    println!("level = {:?}", config.logging.level);
    println!("file_enabled = {}", config.logging.file_enabled);
    println!("file_dir = {:?}", config.logging.file_dir.display().to_string());

    // Show source info
    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        let _ = std::io::stderr().flush();

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            eprintln!("Aborted.");
            return;
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return;
        }
    }

    // Create parent directory
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating directory: {}", e);
            std::process::exit(1);
        }
    }

    // Write the default config (using Config's single source of truth)
    if let Err(e) = std::fs::write(&path, Config::default().to_toml()) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}

fn handle_config_edit() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    // Ensure config exists
    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
    }

    // Get editor from environment
    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            // Platform-specific fallback
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        });

    println!("Opening {} with {}", path.display(), editor);

    let status = Command::new(&editor).arg(&path).status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            eprintln!("Editor exited with status: {}", s);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to launch editor '{}': {}", editor, e);
            eprintln!("Set $EDITOR environment variable to your preferred editor");
            std::process::exit(1);
        }
    }
}

fn handle_config_update() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if !path.exists() {
        // No existing config, just create default
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
        return;
    }

    // Read existing config and regenerate the file preserving user values
    let existing = Config::from_env();

    // Backup existing
    let backup_path = path.with_extension("toml.bak");
    if let Err(e) = std::fs::copy(&path, &backup_path) {
        eprintln!("Warning: Could not create backup: {}", e);
    } else {
        println!("Backup created: {}", backup_path.display());
    }

    // Write updated config
    if let Err(e) = existing.save() {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config updated with latest structure: {}", path.display());
    println!("Your values have been preserved.");
}
