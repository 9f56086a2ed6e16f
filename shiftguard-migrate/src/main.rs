//! Shiftguard Migration CLI Tool
//!
//! Applies the timesheet backend's schema fixes (or a TOML plan) to PostgreSQL.
//! Exit status: 0 on success, 1 when a step fails, 2 when nothing could be attempted.

use clap::{Parser, Subcommand};
use colored::Colorize;
use shiftguard::config::MigratorConfig;
use shiftguard::migration::{MigrationPlan, Migrator};
use shiftguard::PgStore;
use shiftguard_migrate::plan_loader::load_plan;
use shiftguard_migrate::settings::resolve_database_url;
use shiftguard_migrate::{EXIT_OK, EXIT_SETUP_FAILED, EXIT_STEP_FAILED};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "shiftguard-migrate")]
#[command(about = "Schema migration tool for the shiftguard timesheet backend")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every step of the plan, stopping at the first failure
    Run {
        /// TOML plan file (default: configured plan, else the built-in timesheet plan)
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Print the SQL each step would execute, without connecting
    Plan {
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Check that the plan parses and is well formed
    Validate {
        #[arg(long)]
        plan: Option<PathBuf>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = match MigratorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error loading configuration: {}", e);
            process::exit(EXIT_SETUP_FAILED);
        }
    };

    let code = match cli.command {
        Commands::Run { plan } => {
            let plan_path = plan.or_else(|| config.plan_path.clone());
            let database_url = resolve_database_url(cli.database_url, |k| std::env::var(k).ok(), &config);
            handle_run(plan_path, &database_url, &config, cli.quiet)
        }
        Commands::Plan { plan } => handle_plan(plan.or_else(|| config.plan_path.clone())),
        Commands::Validate { plan } => handle_validate(plan.or_else(|| config.plan_path.clone())),
    };

    process::exit(code);
}

fn load_or_report(path: Option<PathBuf>) -> Option<MigrationPlan> {
    match load_plan(path.as_deref()) {
        Ok(plan) => Some(plan),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            None
        }
    }
}

fn handle_run(plan_path: Option<PathBuf>, database_url: &str, config: &MigratorConfig, quiet: bool) -> i32 {
    let Some(plan) = load_or_report(plan_path) else {
        return EXIT_SETUP_FAILED;
    };
    let migrator = Migrator::new(plan);
    let total = migrator.plan().len();

    // the connection lives for this scope only and closes on every exit path
    let mut store = match PgStore::open(database_url, config.statement_timeout_seconds) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Error connecting to database: {}", e);
            eprintln!("   No migration steps were attempted.");
            return EXIT_SETUP_FAILED;
        }
    };

    if !quiet {
        println!("Applying {} migration step(s)...", total);
    }
    let result = migrator.run_with_progress(&mut store, |step| {
        if !quiet {
            println!(
                "  {} [{}/{}] {} ({}, {}ms)",
                "✓".green(),
                step.index,
                total,
                step.name,
                step.outcome,
                step.elapsed.as_millis()
            );
        }
    });

    match result {
        Ok(report) => {
            if !quiet {
                println!("\n✅ {}", report.summary());
            }
            EXIT_OK
        }
        Err(failure) => {
            eprintln!("  {} [{}/{}] {}", "✗".red(), failure.index, total, failure.name);
            eprintln!("\n❌ Error: {}", failure);
            if !failure.sql.is_empty() {
                eprintln!("   Statement: {}", failure.sql);
            }
            if !failure.completed.is_empty() {
                eprintln!(
                    "   {} earlier step(s) remain applied; re-run once the cause is fixed.",
                    failure.completed.len()
                );
            }
            EXIT_STEP_FAILED
        }
    }
}

fn handle_plan(plan_path: Option<PathBuf>) -> i32 {
    let Some(plan) = load_or_report(plan_path) else {
        return EXIT_SETUP_FAILED;
    };
    if let Err(e) = plan.validate() {
        eprintln!("❌ Error: {}", e);
        return EXIT_SETUP_FAILED;
    }

    let migrator = Migrator::new(plan);
    println!("\n📋 Migration Plan ({})\n", migrator.plan().fingerprint());
    for (i, (step, sql)) in migrator.plan().steps().iter().zip(migrator.dry_run()).enumerate() {
        println!("  {}. {} -- {}", i + 1, step.name.as_str().bold(), step.change.describe());
        println!("     {};", sql);
    }
    EXIT_OK
}

fn handle_validate(plan_path: Option<PathBuf>) -> i32 {
    let Some(plan) = load_or_report(plan_path) else {
        return EXIT_SETUP_FAILED;
    };
    match plan.validate() {
        Ok(()) => {
            println!("✅ Plan is valid ({} step(s))", plan.len());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            EXIT_SETUP_FAILED
        }
    }
}
