//! eagg CLI: load a YAML plan, run eager aggregation, print the result.

use clap::{Parser, Subcommand};
use eagg_core::config::EagerAggConfig;
use eagg_core::function::BuiltinFunctions;
use eagg_core::plan::LogicalPlan;
use eagg_planner::{
    explain, explain_decisions, parse_plan_file, AppliedRule, CollectingSink, HeuristicOptimizer,
    PushDownDecision, StatsEstimator,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eagg")]
#[command(about = "Eager aggregation push-down for join-heavy query plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a plan and show it before and after (EXPLAIN)
    Explain {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Minimum rows-per-group ratio (overrides settings and env)
        #[arg(long)]
        threshold: Option<f64>,

        /// Search below the first join for deeper targets
        #[arg(long)]
        every_join: bool,

        /// Comma-separated join ids never pushed below
        #[arg(long)]
        blocklist: Option<String>,

        /// Comma-separated <join_id>-<child_index> targets; replaces the cost model
        #[arg(long)]
        whitelist: Option<String>,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate a plan YAML file (syntax, schema and settings)
    Validate {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,
    },
}

struct Overrides {
    threshold: Option<f64>,
    every_join: bool,
    blocklist: Option<String>,
    whitelist: Option<String>,
}

#[derive(Serialize)]
struct Report<'a> {
    settings: &'a EagerAggConfig,
    original: &'a LogicalPlan,
    optimized: &'a LogicalPlan,
    passes: usize,
    applied: &'a [AppliedRule],
    decisions: &'a [PushDownDecision],
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Explain {
            plan,
            threshold,
            every_join,
            blocklist,
            whitelist,
            json,
        } => {
            let overrides = Overrides {
                threshold,
                every_join,
                blocklist,
                whitelist,
            };
            if let Err(e) = explain_plan(&plan, overrides, json) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { plan } => {
            if let Err(e) = validate_plan(&plan) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Plan is valid");
        }
    }
}

/// Plan-file settings, then `EAGG_*` env, then command-line flags.
fn load_config(
    settings: EagerAggConfig,
    overrides: &Overrides,
) -> Result<EagerAggConfig, Box<dyn std::error::Error>> {
    let mut config = settings.with_overrides(|key| std::env::var(key).ok())?;
    if let Some(t) = overrides.threshold {
        config.agg_push_down_threshold = t;
    }
    if overrides.every_join {
        config.agg_push_down_every_join = true;
    }
    if let Some(list) = &overrides.blocklist {
        config.eager_agg_join_id_blocklist = list.clone();
    }
    if let Some(list) = &overrides.whitelist {
        config.eager_agg_join_id_whitelist = list.clone();
    }
    config.validate()?;
    Ok(config)
}

fn explain_plan(
    plan_path: &PathBuf,
    overrides: Overrides,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(plan_path)?;
    let file = parse_plan_file(&yaml_content)?;
    let original = file.build(&BuiltinFunctions)?;
    let config = load_config(file.settings, &overrides)?;

    let sink = CollectingSink::new();
    let optimizer = HeuristicOptimizer::new(config.clone());
    let outcome = optimizer.optimize(original.clone(), &BuiltinFunctions, &StatsEstimator, &sink)?;
    let decisions = sink.decisions();
    tracing::info!(
        rewrites = outcome.applied.len(),
        passes = outcome.passes,
        "optimized {}",
        plan_path.display()
    );

    if json {
        let report = Report {
            settings: &config,
            original: &original,
            optimized: &outcome.plan,
            passes: outcome.passes,
            applied: &outcome.applied,
            decisions: &decisions,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Original Plan");
    println!("=============");
    print!("{}", explain(&original));
    println!();
    println!("Push-down Decisions");
    println!("===================");
    print!("{}", explain_decisions(&decisions));
    println!();
    println!("Optimized Plan ({} rewrite(s), {} pass(es))", outcome.applied.len(), outcome.passes);
    println!("==============");
    print!("{}", explain(&outcome.plan));
    Ok(())
}

fn validate_plan(plan_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(plan_path)?;
    let file = parse_plan_file(&yaml_content)?;
    file.settings.validate()?;
    let _plan = file.build(&BuiltinFunctions)?;
    Ok(())
}
