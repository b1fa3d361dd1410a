//! ShameBlock CLI
//!
//! Compiles block lists into declarative rulesets and drives the
//! reconciliation engine against a JSON copy of the extension's storage.

mod state;

use std::fs;
use std::path::Path;
use std::time::Instant;

use clap::{Parser, Subcommand};

use sb_compiler::{build_ruleset, parse_block_list, ruleset_json};
use sb_core::config::default_blocked_sites;
use sb_core::url::{is_valid_domain, normalize_site};
use sb_core::whitelist::{active_bypasses, format_time_remaining};
use sb_core::{Clock, ManualClock, MemoryRuleTable, PassOutcome, Reconciler, RuleOptions, Storage, SystemClock, Trigger};

use crate::state::FileStore;

#[derive(Parser)]
#[command(name = "sb-cli")]
#[command(about = "ShameBlock ruleset compiler and state tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile block lists into a declarative_net_request ruleset
    Compile {
        /// Input block list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output ruleset file
        #[arg(short, long, default_value = "rules.json")]
        output: String,

        /// Extension base URL (chrome-extension://<id>/) for absolute redirects
        #[arg(long)]
        extension_base: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run one reconciliation pass over a state file and print the rules
    Reconcile {
        /// State file (created if missing)
        #[arg(short, long)]
        state: String,

        /// Treat the run as a fresh install: seed the default list first
        #[arg(long)]
        install: bool,

        /// Current time in epoch milliseconds
        #[arg(long)]
        now: Option<u64>,

        /// Write the installed rules here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show blocked sites and running bypasses
    Status {
        #[arg(short, long)]
        state: String,

        #[arg(long)]
        now: Option<u64>,
    },

    /// Add a site to the block list
    Add {
        #[arg(short, long)]
        state: String,

        site: String,
    },

    /// Remove a site from the block list
    Remove {
        #[arg(short, long)]
        state: String,

        site: String,
    },

    /// Unblock a site for 30 minutes
    Bypass {
        #[arg(short, long)]
        state: String,

        site: String,

        #[arg(long)]
        now: Option<u64>,
    },

    /// Print the default block list
    Defaults,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            extension_base,
            verbose,
        } => cmd_compile(&input, &output, extension_base.as_deref(), verbose),
        Commands::Reconcile {
            state,
            install,
            now,
            output,
        } => block_on(cmd_reconcile(&state, install, now, output.as_deref())),
        Commands::Status { state, now } => block_on(cmd_status(&state, now)),
        Commands::Add { state, site } => block_on(cmd_add(&state, &site)),
        Commands::Remove { state, site } => block_on(cmd_remove(&state, &site)),
        Commands::Bypass { state, site, now } => block_on(cmd_bypass(&state, &site, now)),
        Commands::Defaults => {
            for site in default_blocked_sites() {
                println!("{}", site);
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn block_on<F>(future: F) -> Result<(), String>
where
    F: std::future::Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(future)
}

fn clock_at(now: Option<u64>) -> ManualClock {
    ManualClock::new(now.unwrap_or_else(|| SystemClock.now_ms()))
}

fn open_storage(path: &str) -> Result<Storage<FileStore>, String> {
    Ok(Storage::new(FileStore::open(path)?))
}

fn cmd_compile(inputs: &[String], output: &str, extension_base: Option<&str>, verbose: bool) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut domains = Vec::new();
    let mut total_lines = 0usize;

    for (idx, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let line_count = content.lines().count();
        total_lines += line_count;

        let parsed = parse_block_list(&content);
        if verbose {
            println!(
                "  [{}] {} - {} lines, {} domains",
                idx,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                line_count,
                parsed.len()
            );
        }
        domains.extend(parsed);
    }

    let options = extension_base.map(RuleOptions::for_extension).unwrap_or_default();
    let ruleset = build_ruleset(domains, &options).map_err(|e| e.to_string())?;
    let json = ruleset_json(&ruleset.rules).map_err(|e| e.to_string())?;

    fs::write(output, &json).map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    println!("Compiled {} block lists to '{}'", inputs.len(), output);
    println!("  Lines:    {}", total_lines);
    println!(
        "  Domains:  {} -> {} (dedupe removed {}, covered by parent {})",
        ruleset.stats.before, ruleset.stats.after, ruleset.stats.deduped, ruleset.stats.covered
    );
    println!("  Rules:    {}", ruleset.rules.len());
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

async fn cmd_reconcile(path: &str, install: bool, now: Option<u64>, output: Option<&str>) -> Result<(), String> {
    let reconciler = Reconciler::new(FileStore::open(path)?, MemoryRuleTable::new(), clock_at(now));

    let trigger = if install {
        Trigger::Installed
    } else {
        Trigger::Message(sb_core::Message::update_rules())
    };

    match reconciler.handle(&trigger).await {
        Some(PassOutcome::Applied(report)) => {
            eprintln!(
                "Blocking {} domains with {} rules ({} expired bypasses pruned)",
                report.blocked_domains, report.install.added, report.whitelist_pruned
            );
        }
        Some(PassOutcome::Failed(err)) => return Err(err.to_string()),
        Some(PassOutcome::Skipped) | None => return Err("Reconciliation did not run".to_string()),
    }

    let json = ruleset_json(&reconciler.table().rules()).map_err(|e| e.to_string())?;
    match output {
        Some(output) => fs::write(output, &json).map_err(|e| format!("Failed to write '{}': {}", output, e))?,
        None => println!("{}", json),
    }

    Ok(())
}

async fn cmd_status(path: &str, now: Option<u64>) -> Result<(), String> {
    let storage = open_storage(path)?;
    let state = storage.sync_state().await.map_err(|e| e.to_string())?;
    let whitelist = storage.temp_whitelist().await.map_err(|e| e.to_string())?;
    let now = clock_at(now).now_ms();

    println!("Blocking: {}", if state.is_enabled { "enabled" } else { "disabled" });
    println!("Blocked sites ({}):", state.blocked_sites.len());
    for site in &state.blocked_sites {
        println!("  {}", site);
    }

    let bypasses = active_bypasses(&whitelist, now);
    if !bypasses.is_empty() {
        println!("Bypassed:");
        for (site, expires_at) in bypasses {
            println!("  {} ({} left)", site, format_time_remaining(expires_at, now));
        }
    }

    Ok(())
}

async fn cmd_add(path: &str, input: &str) -> Result<(), String> {
    let site = normalize_site(input)
        .filter(|site| is_valid_domain(site))
        .ok_or_else(|| format!("'{}' is not a valid domain", input))?;

    let storage = open_storage(path)?;
    if storage.add_site(&site).await.map_err(|e| e.to_string())? {
        println!("Added {}", site);
    } else {
        println!("{} is already blocked", site);
    }
    Ok(())
}

async fn cmd_remove(path: &str, site: &str) -> Result<(), String> {
    let storage = open_storage(path)?;
    storage.remove_site(site).await.map_err(|e| e.to_string())?;
    println!("Removed {}", site);
    Ok(())
}

async fn cmd_bypass(path: &str, site: &str, now: Option<u64>) -> Result<(), String> {
    let storage = open_storage(path)?;
    let now = clock_at(now).now_ms();
    let expires_at = storage.grant_bypass(site, now).await.map_err(|e| e.to_string())?;
    println!("{} unblocked for {}", site, format_time_remaining(expires_at, now));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_compile_writes_ruleset() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("social.txt");
        let output = dir.path().join("rules.json");
        fs::write(&list, "# social\nreddit.com\n0.0.0.0 old.reddit.com\n||x.com^\n").unwrap();

        cmd_compile(
            &[list.to_string_lossy().into_owned()],
            &output.to_string_lossy(),
            Some("chrome-extension://abc/"),
            false,
        )
        .unwrap();

        let rules = read_json(&output);
        assert_eq!(rules.as_array().unwrap().len(), 4);
        assert_eq!(
            rules[0]["action"]["redirect"]["url"],
            "chrome-extension://abc/blocked.html?site=reddit.com"
        );
    }

    #[tokio::test]
    async fn test_reconcile_prunes_expired_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let output = dir.path().join("rules.json");
        let output_path = output.to_string_lossy().into_owned();
        fs::write(
            &state,
            r#"{"sync":{"blockedSites":["x.com","y.com"],"isEnabled":true},
                "local":{"tempWhitelist":{"x.com":500,"y.com":5000}}}"#,
        )
        .unwrap();

        cmd_reconcile(&state.to_string_lossy(), false, Some(1_000), Some(output_path.as_str()))
            .await
            .unwrap();

        let rules = read_json(&output);
        assert_eq!(rules.as_array().unwrap().len(), 2);
        assert_eq!(rules[0]["condition"]["urlFilter"], "*://x.com/*");
        assert_eq!(read_json(&state)["local"]["tempWhitelist"], json!({ "y.com": 5000 }));
    }

    #[tokio::test]
    async fn test_reconcile_install_seeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let output = dir.path().join("rules.json");
        let output_path = output.to_string_lossy().into_owned();

        cmd_reconcile(&state.to_string_lossy(), true, Some(1_000), Some(output_path.as_str()))
            .await
            .unwrap();

        let defaults = default_blocked_sites();
        assert_eq!(read_json(&output).as_array().unwrap().len(), defaults.len() * 2);
        assert_eq!(read_json(&state)["sync"]["blockedSites"], json!(defaults));
    }

    #[tokio::test]
    async fn test_add_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        assert!(cmd_add(&state.to_string_lossy(), "not a domain").await.is_err());
        assert!(cmd_add(&state.to_string_lossy(), "https://www.Reddit.com/r/all").await.is_ok());
        assert_eq!(read_json(&state)["sync"]["blockedSites"], json!(["reddit.com"]));
    }
}
