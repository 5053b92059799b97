use std::collections::HashMap;
use std::sync::Mutex;

use charla_core::{ExecutionCost, UsageStats};

/// Accumulates usage per `(bot_id, model)` across one conversation.
#[derive(Default)]
pub struct CostAccumulator {
    totals: Mutex<HashMap<(String, String), UsageStats>>,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bot_id: &str, model: &str, usage: &UsageStats) {
        if usage.is_empty() && usage.cost_usd == 0.0 {
            return;
        }
        let mut totals = self.totals.lock().unwrap();
        totals
            .entry((bot_id.to_string(), model.to_string()))
            .or_default()
            .add(usage);
    }

    /// Drain into the `ExecutionCost` vector attached to the outcome.
    pub fn into_costs(self) -> Vec<ExecutionCost> {
        let totals = self.totals.into_inner().unwrap();
        let mut costs: Vec<ExecutionCost> = totals
            .into_iter()
            .map(|((bot_id, model), usage)| ExecutionCost {
                bot_id,
                model,
                usage,
            })
            .collect();
        costs.sort_by(|a, b| (&a.bot_id, &a.model).cmp(&(&b.bot_id, &b.model)));
        costs
    }

    pub fn total(&self) -> UsageStats {
        let totals = self.totals.lock().unwrap();
        let mut sum = UsageStats::default();
        for usage in totals.values() {
            sum.add(usage);
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_bot_and_model() {
        let acc = CostAccumulator::new();
        let usage = UsageStats {
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: 0.001,
            ..Default::default()
        };
        acc.add("bot-1", "gemini-2.0-flash", &usage);
        acc.add("bot-1", "gemini-2.0-flash", &usage);
        acc.add("bot-1", "gemini-2.0-pro", &usage);

        assert_eq!(acc.total().input_tokens, 30);

        let costs = acc.into_costs();
        assert_eq!(costs.len(), 2);
        assert_eq!(costs[0].model, "gemini-2.0-flash");
        assert_eq!(costs[0].usage.input_tokens, 20);
    }
}
