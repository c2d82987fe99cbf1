use serde::{Deserialize, Serialize};

use agent_api::StepUsage;

/// Running cost and token totals for one turn, summed over its
/// `step-finish` events and attached to the completed assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnUsage {
    pub cost: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_reasoning: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TurnUsage {
    pub fn add_step(&mut self, step: &StepUsage) {
        self.cost += step.cost;
        self.tokens_in += step.tokens_in;
        self.tokens_out += step.tokens_out;
        self.tokens_reasoning += step.tokens_reasoning;
        self.cache_read += step.cache_read;
        self.cache_write += step.cache_write;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_sum_each_category_independently() {
        let mut usage = TurnUsage::default();
        usage.add_step(&StepUsage {
            cost: 0.001,
            tokens_in: 100,
            tokens_out: 20,
            tokens_reasoning: 5,
            cache_read: 400,
            cache_write: 0,
        });
        usage.add_step(&StepUsage {
            cost: 0.002,
            tokens_in: 50,
            tokens_out: 80,
            tokens_reasoning: 0,
            cache_read: 0,
            cache_write: 60,
        });

        assert!((usage.cost - 0.003).abs() < 1e-12);
        assert_eq!(usage.tokens_in, 150);
        assert_eq!(usage.tokens_out, 100);
        assert_eq!(usage.tokens_reasoning, 5);
        assert_eq!(usage.cache_read, 400);
        assert_eq!(usage.cache_write, 60);
        assert!(!usage.is_empty());
    }

    #[test]
    fn default_usage_is_empty() {
        assert!(TurnUsage::default().is_empty());
    }
}
