// Playtest Report Types
// Structured output saved under playtest-results/

use ecosystem_engine::EcosystemState;
use serde::Serialize;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

impl Stats {
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self { mean: 0.0, min: 0.0, max: 0.0, n: 0 };
        }
        Self {
            mean: samples.iter().sum::<f64>() / n as f64,
            min: samples.iter().cloned().fold(f64::INFINITY, f64::min),
            max: samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            n,
        }
    }
}

// ─── Single-Run Result ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PlaytestResult {
    pub scenario: String,
    pub label: String,
    pub category: String,
    pub seed: u64,
    pub pass: bool,
    pub players: usize,
    pub rounds_tallied: u64,
    pub contiguous_rounds: bool,
    pub single_announcement: bool,
    pub votes_submitted: u32,
    pub votes_rejected: u32,
    /// RoundTallied events summed over all seats.
    pub tally_events: u32,
    pub final_health: f64,
    pub final_status: String,
    pub final_state: EcosystemState,
    pub simulated_ms: u64,
    pub elapsed_ms: u128,
    pub failures: Vec<String>,
}

// ─── Per-Scenario Aggregation ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario_name: String,
    pub label: String,
    pub category: String,
    pub n_runs: usize,
    pub pass_rate: f64,
    pub final_health: Stats,
    pub rounds_tallied: Stats,
    pub votes_submitted: Stats,
    pub elapsed_ms: Stats,
    pub individual_runs: Vec<PlaytestResult>,
}

impl ScenarioReport {
    pub fn from_runs(name: &str, label: &str, category: &str, runs: Vec<PlaytestResult>) -> Self {
        let sample = |f: &dyn Fn(&PlaytestResult) -> f64| -> Stats {
            Stats::from_samples(&runs.iter().map(f).collect::<Vec<_>>())
        };
        let passed = runs.iter().filter(|r| r.pass).count();
        Self {
            scenario_name: name.to_string(),
            label: label.to_string(),
            category: category.to_string(),
            n_runs: runs.len(),
            pass_rate: if runs.is_empty() { 0.0 } else { passed as f64 / runs.len() as f64 },
            final_health: sample(&|r| r.final_health),
            rounds_tallied: sample(&|r| r.rounds_tallied as f64),
            votes_submitted: sample(&|r| r.votes_submitted as f64),
            elapsed_ms: sample(&|r| r.elapsed_ms as f64),
            individual_runs: runs,
        }
    }
}

// ─── Top-Level Report ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PlaytestReport {
    pub timestamp: String,
    pub version: &'static str,
    pub prng: &'static str,
    pub policy: String,
    pub n_runs_per_scenario: usize,
    pub summary: Summary,
    pub scenarios: Vec<ScenarioReport>,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
}
