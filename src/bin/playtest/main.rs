// Ecosystem Playtest Runner — scripted multi-seat games over a shared store
// Checks round bookkeeping end to end and writes playtest-results/playtest-{timestamp}.json
//
// Usage:
//   cargo run --release --bin playtest                      # All scenarios, 5 runs each
//   cargo run --release --bin playtest -- --runs 1          # Quick mode
//   cargo run --release --bin playtest -- OUTAGE            # Filter by name/label/category
//   cargo run --release --bin playtest -- --policy random   # Random dilemma selection
//   cargo run --release --bin playtest -- --players 8       # Override table size
//   RUST_LOG=ecosystem_engine=debug cargo run --bin playtest -- CHURN

mod report;
mod runner;
mod scenarios;

use ecosystem_engine::SelectionPolicy;
use report::*;
use scenarios::*;
use std::error::Error;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

// ─── CLI ────────────────────────────────────────────────────────────────────

struct CliArgs {
    runs: usize,
    seed: u64,
    players: Option<usize>,
    policy: SelectionPolicy,
    filter: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> CliArgs {
    let mut cli =
        CliArgs { runs: 5, seed: 0, players: None, policy: SelectionPolicy::Sequential, filter: None };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--runs" => cli.runs = args.next().and_then(|v| v.parse().ok()).unwrap_or(cli.runs),
            "--seed" => cli.seed = args.next().and_then(|v| v.parse().ok()).unwrap_or(cli.seed),
            "--players" => cli.players = args.next().and_then(|v| v.parse().ok()),
            "--policy" => {
                if args.next().is_some_and(|v| v.eq_ignore_ascii_case("random")) {
                    cli.policy = SelectionPolicy::Random;
                }
            }
            other if !other.starts_with('-') => cli.filter = Some(other.to_lowercase()),
            other => tracing::warn!(argument = other, "ignoring unknown argument"),
        }
    }
    cli
}

fn matches_filter(scenario: &Scenario, filter: &str) -> bool {
    [scenario.name, scenario.label, scenario.category]
        .iter()
        .any(|field| field.to_lowercase().contains(filter))
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = parse_args(std::env::args().skip(1));
    let to_run: Vec<Scenario> = scenarios()
        .into_iter()
        .filter(|s| cli.filter.as_deref().map_or(true, |f| matches_filter(s, f)))
        .collect();
    if to_run.is_empty() {
        return Err(format!("no scenario matches {:?}", cli.filter).into());
    }

    println!(
        "\n  {} scenario(s) x {} run(s), seed {}, {:?} dilemmas\n",
        to_run.len(),
        cli.runs,
        cli.seed,
        cli.policy
    );
    println!("  {:<30} {:>5} {:>7} {:>7} {:>8}", "Scenario", "Pass%", "Rounds", "Votes", "Health");

    let suite_start = Instant::now();
    let reports: Vec<ScenarioReport> = to_run
        .iter()
        .map(|scenario| {
            let report = runner::run_scenario(scenario, cli.runs, cli.seed, cli.policy, cli.players);
            println!(
                "  {:<30} {:>4}% {:>7.1} {:>7.1} {:>7.2}%",
                report.label,
                (report.pass_rate * 100.0) as u32,
                report.rounds_tallied.mean,
                report.votes_submitted.mean,
                report.final_health.mean,
            );
            for run in report.individual_runs.iter().filter(|r| !r.pass) {
                for failure in &run.failures {
                    println!("      seed {}: {}", run.seed, failure);
                }
            }
            report
        })
        .collect();

    let passed = reports.iter().filter(|r| r.pass_rate >= 1.0).count();
    let summary = Summary {
        total: reports.len(),
        passed,
        failed: reports.len() - passed,
        pass_rate: passed as f64 / reports.len() as f64,
    };
    println!(
        "\n  {}/{} scenarios passed in {:.1}s",
        summary.passed,
        summary.total,
        suite_start.elapsed().as_secs_f64()
    );

    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    let failed = summary.failed;
    let report = PlaytestReport {
        timestamp: timestamp.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        prng: "ChaCha8Rng",
        policy: format!("{:?}", cli.policy),
        n_runs_per_scenario: cli.runs,
        summary,
        scenarios: reports,
    };

    let dir = std::path::Path::new("playtest-results");
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("playtest-{timestamp}.json"));
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    println!("  report: {}\n", path.display());

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(args(&["--runs", "2", "--policy", "RANDOM", "Outage", "--players", "x"]));
        assert_eq!(cli.runs, 2);
        assert_eq!(cli.policy, SelectionPolicy::Random);
        assert_eq!(cli.filter.as_deref(), Some("outage"));
        assert_eq!(cli.players, None);
    }

    #[test]
    fn test_filter_matches_category() {
        let all = scenarios();
        assert!(all.iter().any(|s| matches_filter(s, "voting")));
        assert!(!all.iter().any(|s| matches_filter(s, "no-such-scenario")));
    }
}
