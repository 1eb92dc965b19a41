// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Dilemma Catalog

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GameError, GameResult};
use crate::types::{Dilemma, DilemmaOption, Metric, MetricDelta};

// ─── Selection Policy ────────────────────────────────────────────────────────

/// How the next round's dilemma is picked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Cycle through the catalog in order, wrapping at the end.
    #[default]
    Sequential,
    /// Uniform random index, repeats allowed.
    Random,
}

// ─── Category display info ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CategoryInfo {
    pub name: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
}

pub fn category_info(category: &str) -> CategoryInfo {
    match category {
        "privacy" => CategoryInfo { name: "Privacy", color: "#2196F3", icon: "🔒" },
        "social" => CategoryInfo { name: "Social", color: "#4CAF50", icon: "🤝" },
        "ethics" => CategoryInfo { name: "Ethics", color: "#9C27B0", icon: "⚖️" },
        "transparency" => CategoryInfo { name: "Transparency", color: "#FF9800", icon: "🔍" },
        _ => CategoryInfo { name: "General", color: "#607D8B", icon: "❓" },
    }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DilemmaCatalog {
    dilemmas: Vec<Dilemma>,
}

impl DilemmaCatalog {
    pub fn new(dilemmas: Vec<Dilemma>) -> GameResult<Self> {
        if dilemmas.is_empty() {
            return Err(GameError::EmptyCatalog);
        }
        Ok(Self { dilemmas })
    }

    pub fn from_json(json: &str) -> GameResult<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn len(&self) -> usize {
        self.dilemmas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dilemmas.is_empty()
    }

    pub fn get(&self, index: usize) -> GameResult<&Dilemma> {
        self.dilemmas
            .get(index)
            .ok_or(GameError::InvalidDilemmaIndex { index, len: self.dilemmas.len() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dilemma> {
        self.dilemmas.iter()
    }

    /// Index of the dilemma for the round after `previous`.
    ///
    /// Sequential selection starts at 0 and wraps; an out-of-range previous
    /// index (from a catalog that shrank) still yields a valid position.
    pub fn next_index<R: Rng + ?Sized>(
        &self,
        policy: SelectionPolicy,
        previous: Option<usize>,
        rng: &mut R,
    ) -> usize {
        let len = self.dilemmas.len();
        match policy {
            SelectionPolicy::Sequential => previous.map_or(0, |i| (i % len + 1) % len),
            SelectionPolicy::Random => rng.gen_range(0..len),
        }
    }

    /// The built-in dilemma set.
    pub fn builtin() -> Self {
        Self { dilemmas: builtin_dilemmas() }
    }
}

impl Default for DilemmaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn option(text: &str, impact: [i64; 5], consequences: [&str; 3]) -> DilemmaOption {
    let pairs: Vec<(Metric, i64)> = Metric::ALL.iter().copied().zip(impact).collect();
    DilemmaOption {
        text: text.to_string(),
        impact: MetricDelta::from_pairs(&pairs),
        consequences: consequences.iter().map(|c| c.to_string()).collect(),
    }
}

// Impacts are ordered eco, pollution, inclusivity, transparency, innovation.
fn builtin_dilemmas() -> Vec<Dilemma> {
    vec![
        Dilemma {
            id: 1,
            text: "A proposed AI feature would boost platform efficiency by 300% but requires \
                   extensive user data collection."
                .to_string(),
            category: "privacy".to_string(),
            option_a: option(
                "Deploy AI for maximum efficiency",
                [-1, 0, -2, -3, 4],
                ["Data vulnerability increases", "Short-term profits rise", "Public trust declines"],
            ),
            option_b: option(
                "Prioritize privacy with limited AI",
                [1, -1, 2, 3, 1],
                ["User trust strengthens", "Sustainable growth", "Competitive disadvantage"],
            ),
        },
        Dilemma {
            id: 2,
            text: "A breakthrough renewable energy source is available but would displace a \
                   traditional community."
                .to_string(),
            category: "social".to_string(),
            option_a: option(
                "Adopt new energy immediately",
                [3, -2, -3, 0, 3],
                ["Carbon emissions plummet", "Community disruption", "Economic polarization"],
            ),
            option_b: option(
                "Develop gradual transition plan",
                [1, -1, 2, 2, 1],
                ["Social harmony maintained", "Slower climate progress", "Inclusive development"],
            ),
        },
        Dilemma {
            id: 3,
            text: "An automated hiring model cuts recruiting costs in half, but its decisions \
                   cannot be explained to rejected candidates."
                .to_string(),
            category: "ethics".to_string(),
            option_a: option(
                "Roll out the model company-wide",
                [0, 1, -3, -2, 3],
                ["Faster hiring cycles", "Hidden bias persists", "Candidate complaints grow"],
            ),
            option_b: option(
                "Keep humans in the loop",
                [0, 0, 3, 2, -1],
                ["Fairer outcomes", "Higher recruiting costs", "Slower growth"],
            ),
        },
        Dilemma {
            id: 4,
            text: "An audit finds your supply chain emits far more than reported. Publishing \
                   it will hurt the share price."
                .to_string(),
            category: "transparency".to_string(),
            option_a: option(
                "Quietly fix it over five years",
                [1, 1, 0, -3, 0],
                ["Stock stays stable", "Regulatory risk lingers", "Insiders lose faith"],
            ),
            option_b: option(
                "Publish the audit now",
                [2, -2, 1, 4, -1],
                ["Investor backlash", "Industry follows suit", "Credibility rises"],
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_builtin_catalog_impacts() {
        let catalog = DilemmaCatalog::builtin();
        assert_eq!(catalog.len(), 4);

        let first = catalog.get(0).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.option_a.impact.get(Metric::Innovation), 4);
        assert_eq!(first.option_a.impact.get(Metric::Transparency), -3);
        assert_eq!(first.option_b.impact.get(Metric::Pollution), -1);
        assert_eq!(first.option_b.consequences.len(), 3);
    }

    #[test]
    fn test_invalid_index() {
        let catalog = DilemmaCatalog::builtin();
        assert!(matches!(
            catalog.get(9),
            Err(GameError::InvalidDilemmaIndex { index: 9, len: 4 })
        ));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(matches!(DilemmaCatalog::new(Vec::new()), Err(GameError::EmptyCatalog)));
    }

    #[test]
    fn test_sequential_selection_wraps() {
        let catalog = DilemmaCatalog::builtin();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let seq = SelectionPolicy::Sequential;
        assert_eq!(catalog.next_index(seq, None, &mut rng), 0);
        assert_eq!(catalog.next_index(seq, Some(0), &mut rng), 1);
        assert_eq!(catalog.next_index(seq, Some(3), &mut rng), 0);
        // stale index from a larger catalog
        assert!(catalog.next_index(seq, Some(42), &mut rng) < catalog.len());
    }

    #[test]
    fn test_random_selection_in_range_and_seeded() {
        let catalog = DilemmaCatalog::builtin();
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let i = catalog.next_index(SelectionPolicy::Random, Some(0), &mut a);
            assert!(i < catalog.len());
            assert_eq!(i, catalog.next_index(SelectionPolicy::Random, Some(0), &mut b));
        }
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"[{
            "id": 9, "text": "t", "category": "unknown",
            "optionA": { "text": "a", "impact": { "eco": 2 }, "consequences": [] },
            "optionB": { "text": "b", "impact": { "eco": -2 }, "consequences": ["c"] }
        }]"#;
        let catalog = DilemmaCatalog::from_json(json).unwrap();
        let d = catalog.get(0).unwrap();
        assert_eq!(d.option_b.impact.get(Metric::Eco), -2);
        assert_eq!(category_info(&d.category).name, "General");
    }
}
