use async_trait::async_trait;

use common::{Bias, DecisionContext, DecisionMaker, Result};

/// Deterministic decision-maker: nets long against short evidence and acts
/// when one side leads by at least `min_margin` votes.
///
/// Every detected signal is one vote; a leaning order book adds one more.
/// The answer carries no levels, so configured percentages apply.
#[derive(Debug, Clone)]
pub struct RuleTable {
    min_margin: usize,
}

impl RuleTable {
    pub fn new(min_margin: usize) -> Self {
        Self {
            min_margin: min_margin.max(1),
        }
    }

    fn votes(ctx: &DecisionContext) -> (usize, usize) {
        let biases = ctx
            .signals
            .iter()
            .map(|s| s.bias)
            .chain(ctx.order_book.map(|ob| ob.bias));
        biases.fold((0, 0), |(long, short), bias| match bias {
            Bias::Long => (long + 1, short),
            Bias::Short => (long, short + 1),
            Bias::Neutral => (long, short),
        })
    }
}

#[async_trait]
impl DecisionMaker for RuleTable {
    fn name(&self) -> &str {
        "rules"
    }

    async fn decide(&self, ctx: &DecisionContext) -> Result<String> {
        let (long, short) = Self::votes(ctx);
        let summary = format!("{long} long vs {short} short votes, margin {}", self.min_margin);
        let text = if long >= short + self.min_margin {
            format!("LONG\nreason: {summary}")
        } else if short >= long + self.min_margin {
            format!("SHORT\nreason: {summary}")
        } else {
            format!("STANDBY\nreason: {summary}")
        };
        Ok(text)
    }
}
