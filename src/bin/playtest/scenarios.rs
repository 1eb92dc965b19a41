// Playtest Scenarios — scripted tables of local players over one shared store
// Each scenario fixes who votes how and what goes wrong mid-game

use ecosystem_engine::OptionLabel;

// ─── Scenario Configuration ─────────────────────────────────────────────────

pub struct Scenario {
    pub name: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub players: usize,
    pub rounds: u64,
    pub behaviour: Behaviour,
    pub disruption: Disruption,
    pub criteria: PassCriteria,
}

/// How seats vote once they see a round.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Everyone picks the same option right away.
    Unanimous(OptionLabel),
    /// Even seats pick A, odd seats pick B.
    Split,
    /// Each seat votes with probability `participation`, at a random delay.
    Random { participation: f64 },
}

#[derive(Debug, Clone, Copy)]
pub enum Disruption {
    None,
    /// `seat` loses its connection between the two times.
    Outage { seat: usize, from_ms: u64, to_ms: u64 },
    /// Every `every_rounds` tallied rounds the newest seat leaves and a fresh
    /// one takes its place.
    Churn { every_rounds: u64 },
}

pub struct PassCriteria {
    /// Round sequences under `rounds/` are exactly 1..=n.
    pub require_contiguous_rounds: bool,
    /// Every seat saw each round start at most once.
    pub require_single_announcement: bool,
    pub min_final_health: Option<f64>,
    pub min_rounds: u64,
}

impl Default for PassCriteria {
    fn default() -> Self {
        Self {
            require_contiguous_rounds: true,
            require_single_announcement: true,
            min_final_health: None,
            min_rounds: 1,
        }
    }
}

// ─── Scenario Definitions ───────────────────────────────────────────────────

pub fn scenarios() -> Vec<Scenario> {
    vec![
        // ─── Voting patterns ────────────────────────────────────────────
        Scenario { name: "STEWARDS", label: "Unanimous Stewardship", category: "voting",
            players: 4, rounds: 8, behaviour: Behaviour::Unanimous(OptionLabel::B),
            disruption: Disruption::None,
            // every B option raises health
            criteria: PassCriteria { min_final_health: Some(56.15), min_rounds: 8, ..Default::default() } },
        Scenario { name: "ACCELERATIONISTS", label: "Unanimous Growth", category: "voting",
            players: 4, rounds: 8, behaviour: Behaviour::Unanimous(OptionLabel::A),
            disruption: Disruption::None,
            criteria: PassCriteria { min_rounds: 8, ..Default::default() } },
        Scenario { name: "DEADLOCK", label: "Even Split", category: "voting",
            players: 6, rounds: 8, behaviour: Behaviour::Split,
            disruption: Disruption::None,
            criteria: PassCriteria { min_rounds: 8, ..Default::default() } },
        Scenario { name: "CROWD", label: "Full Table, Random", category: "voting",
            players: 20, rounds: 6, behaviour: Behaviour::Random { participation: 0.8 },
            disruption: Disruption::None,
            criteria: PassCriteria { min_rounds: 6, ..Default::default() } },
        Scenario { name: "QUIET", label: "Low Participation", category: "voting",
            players: 3, rounds: 6, behaviour: Behaviour::Random { participation: 0.2 },
            disruption: Disruption::None,
            criteria: PassCriteria { min_rounds: 6, ..Default::default() } },

        // ─── Failure modes ──────────────────────────────────────────────
        Scenario { name: "OUTAGE", label: "Seat Outage Mid-Game", category: "failure",
            players: 3, rounds: 6, behaviour: Behaviour::Random { participation: 0.9 },
            disruption: Disruption::Outage { seat: 0, from_ms: 40_000, to_ms: 95_000 },
            criteria: PassCriteria { min_rounds: 6, ..Default::default() } },
        Scenario { name: "CHURN", label: "Player Churn", category: "failure",
            players: 3, rounds: 8, behaviour: Behaviour::Random { participation: 0.9 },
            disruption: Disruption::Churn { every_rounds: 2 },
            criteria: PassCriteria { min_rounds: 8, ..Default::default() } },
    ]
}
