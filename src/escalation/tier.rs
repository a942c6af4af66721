use serde::{Deserialize, Serialize};

pub const CHEAP_MODEL: &str = "gpt-4o-mini-2024-07-18";
pub const STRONG_MODEL: &str = "gpt-4o-2024-08-06";

/// One oracle configuration in the escalation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub model: String,
    /// Maximum number of trials voted on.
    pub trials: usize,
    /// Send a fresh random seed with every trial.
    #[serde(default)]
    pub seeded: bool,
}

impl Tier {
    pub fn new(name: impl Into<String>, model: impl Into<String>, trials: usize, seeded: bool) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            trials,
            seeded,
        }
    }

    /// Small model, five seeded votes.
    pub fn cheap() -> Self {
        Self::new("cheap", CHEAP_MODEL, 5, true)
    }

    /// Large model, single shot.
    pub fn strong() -> Self {
        Self::new("strong", STRONG_MODEL, 1, false)
    }

    /// Large model reviewing another tier's answer.
    pub fn supervisor() -> Self {
        Self::new("supervisor", STRONG_MODEL, 1, false)
    }

    /// Same tier with at most `max` trials.
    pub fn capped(&self, max: usize) -> Self {
        Self {
            trials: self.trials.min(max),
            ..self.clone()
        }
    }
}

pub fn default_tiers() -> Vec<Tier> {
    vec![Tier::cheap(), Tier::strong()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_is_cheap_then_strong() {
        let tiers = default_tiers();
        assert_eq!(tiers[0].model, CHEAP_MODEL);
        assert_eq!(tiers[0].trials, 5);
        assert!(tiers[0].seeded);
        assert_eq!(tiers[1].model, STRONG_MODEL);
        assert_eq!(tiers[1].trials, 1);
        assert!(!tiers[1].seeded);
    }

    #[test]
    fn capping_only_lowers() {
        assert_eq!(Tier::cheap().capped(3).trials, 3);
        assert_eq!(Tier::strong().capped(3).trials, 1);
    }
}
