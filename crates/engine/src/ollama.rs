use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{DecisionContext, DecisionMaker, Error, Result};

const SYSTEM_PROMPT: &str = "You are a disciplined intraday trading assistant. \
You judge only from the indicator values and signals you are given. \
Answer with the decision on the first line, in exactly one of these forms:\n\
LONG SL <price> TP <price>\n\
SHORT SL <price> TP <price>\n\
STANDBY\n\
Then give at most three short lines of reasoning.";

/// Decision-maker backed by a local model served by Ollama.
pub struct OllamaClient {
    host: String,
    model: String,
    http: Client,
}

/// Connect deadline only. The overall deadline is `decision.timeout_secs`,
/// applied per cycle by the decision loop.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl OllamaClient {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http,
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl DecisionMaker for OllamaClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn decide(&self, ctx: &DecisionContext) -> Result<String> {
        let prompt = build_prompt(ctx);
        debug!(model = %self.model, chars = prompt.len(), "Requesting decision");

        let resp = self
            .http
            .post(format!("{}/api/generate", self.host))
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &prompt,
                system: SYSTEM_PROMPT,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("ollama: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Decision(format!("ollama HTTP {status}: {body}")));
        }
        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| Error::Decision(format!("ollama response: {e}")))?;
        Ok(body.response.trim().to_string())
    }
}

/// Render everything the model is shown for one cycle.
pub fn build_prompt(ctx: &DecisionContext) -> String {
    let digits = ctx.quote.digits as usize;
    let mut p = String::new();

    let _ = writeln!(p, "Instrument: {}", ctx.symbol);
    let _ = writeln!(
        p,
        "Quote: bid {:.digits$} / ask {:.digits$}",
        ctx.quote.bid, ctx.quote.ask
    );
    let _ = writeln!(
        p,
        "Indicators ({} bars of {}m): {}",
        ctx.bar_count,
        ctx.timeframe_minutes,
        ctx.snapshot.summary(digits)
    );

    p.push_str("\nSignals:\n");
    if ctx.signals.is_empty() {
        p.push_str("- none\n");
    }
    for signal in &ctx.signals {
        let _ = writeln!(p, "- {signal}");
    }

    if let Some(ob) = &ctx.order_book {
        let _ = writeln!(
            p,
            "\nOrder book: bid volume {:.3}, ask volume {:.3}, bid share {:.1}% ({})",
            ob.bid_volume,
            ob.ask_volume,
            ob.bid_ratio * 100.0,
            ob.bias
        );
    }

    p.push_str("\nStrategy:\n");
    if !ctx.long_strategy.trim().is_empty() {
        let _ = writeln!(p, "Long: {}", ctx.long_strategy.trim());
    }
    if !ctx.short_strategy.trim().is_empty() {
        let _ = writeln!(p, "Short: {}", ctx.short_strategy.trim());
    }
    if !ctx.rules.trim().is_empty() {
        let _ = writeln!(p, "Rules: {}", ctx.rules.trim());
    }

    let fmt = |v: Option<f64>| v.map_or("none".to_string(), |v| format!("{v:.digits$}"));
    p.push_str("\nPrecomputed levels (use these prices as they are):\n");
    let _ = writeln!(
        p,
        "LONG SL {} TP {}",
        fmt(ctx.preview.long_stop),
        fmt(ctx.preview.long_target)
    );
    let _ = writeln!(
        p,
        "SHORT SL {} TP {}",
        fmt(ctx.preview.short_stop),
        fmt(ctx.preview.short_target)
    );

    if !ctx.recent_history.is_empty() {
        p.push_str("\nRecent decisions (oldest first):\n");
        for entry in &ctx.recent_history {
            let _ = writeln!(p, "- {entry}");
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        Bias, IndicatorSnapshot, LevelPreview, MaKey, Quote, RiskConfig, Signal, SignalKind,
    };

    fn context() -> DecisionContext {
        let mut snapshot = IndicatorSnapshot::default();
        snapshot.moving_averages.insert(MaKey::Sma(20), 1948.5);
        snapshot.rsi = Some(41.25);
        DecisionContext {
            symbol: "XAUUSDT".into(),
            quote: Quote {
                bid: 1949.8,
                ask: 1950.0,
                digits: 2,
            },
            timeframe_minutes: 1,
            bar_count: 200,
            snapshot,
            signals: vec![Signal::new(
                SignalKind::Crossover,
                "SMA5 crossed above SMA20 (golden cross)",
                Bias::Long,
            )],
            order_book: None,
            long_strategy: "Buy pullbacks to SMA20".into(),
            short_strategy: String::new(),
            rules: "Never trade against SMA200".into(),
            risk: RiskConfig::default(),
            preview: LevelPreview {
                long_stop: Some(1944.15),
                long_target: Some(1961.7),
                short_stop: None,
                short_target: None,
            },
            recent_history: vec!["12:00:01 STANDBY".into()],
        }
    }

    #[test]
    fn prompt_carries_evidence_and_levels() {
        let prompt = build_prompt(&context());
        assert!(prompt.contains("Instrument: XAUUSDT"));
        assert!(prompt.contains("bid 1949.80 / ask 1950.00"));
        assert!(prompt.contains("SMA20=1948.50"));
        assert!(prompt.contains("RSI=41.2") || prompt.contains("RSI=41.3"));
        assert!(prompt.contains("- SMA5 crossed above SMA20 (golden cross) (long)"));
        assert!(prompt.contains("Long: Buy pullbacks to SMA20"));
        assert!(!prompt.contains("Short:"));
        assert!(prompt.contains("Rules: Never trade against SMA200"));
        assert!(prompt.contains("LONG SL 1944.15 TP 1961.70"));
        assert!(prompt.contains("SHORT SL none TP none"));
        assert!(prompt.contains("- 12:00:01 STANDBY"));
        assert!(!prompt.contains("Order book"));
    }

    #[test]
    fn prompt_marks_missing_signals() {
        let mut ctx = context();
        ctx.signals.clear();
        ctx.recent_history.clear();
        let prompt = build_prompt(&ctx);
        assert!(prompt.contains("Signals:\n- none\n"));
        assert!(!prompt.contains("Recent decisions"));
    }
}
