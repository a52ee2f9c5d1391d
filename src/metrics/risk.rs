//! Hybrid risk scoring from rule-based and model-based signals
use crate::config::RiskConfig;
use crate::core::{RiskLevel, RiskRecord, RiskSignals, TokenSnapshot};

/// Snapshot-only risk heuristics, used when no upstream rule score exists
#[derive(Debug, Clone)]
pub struct RuleRiskScorer {
    pub thin_liquidity_usd: f64,
    pub shallow_liquidity_usd: f64,
    pub few_holders: u64,
    pub some_holders: u64,
    pub min_liquidity_ratio: f64,
    pub low_liquidity_ratio: f64,
    pub crash_percent: f64,
    pub drop_percent: f64,
}

impl Default for RuleRiskScorer {
    fn default() -> Self {
        Self {
            thin_liquidity_usd: 5_000.0,     // Under $5K a single sell moves price
            shallow_liquidity_usd: 25_000.0, // Under $25K still easy to drain
            few_holders: 100,
            some_holders: 500,
            min_liquidity_ratio: 0.05,       // Liquidity under 5% of market cap
            low_liquidity_ratio: 0.10,
            crash_percent: -50.0,            // 24h change
            drop_percent: -25.0,
        }
    }
}

impl RuleRiskScorer {
    /// Score in [0, 100] with the reasons that contributed, heaviest first
    pub fn score(&self, s: &TokenSnapshot) -> (f64, Vec<String>) {
        let mut factors: Vec<(f64, String)> = Vec::new();

        if s.liquidity <= 0.0 {
            factors.push((35.0, "no measurable liquidity".to_string()));
        } else if s.liquidity < self.thin_liquidity_usd {
            factors.push((30.0, format!("thin liquidity (${:.0})", s.liquidity)));
        } else if s.liquidity < self.shallow_liquidity_usd {
            factors.push((15.0, format!("shallow liquidity (${:.0})", s.liquidity)));
        }

        if s.holder_count == 0 {
            factors.push((10.0, "holder count unknown".to_string()));
        } else if s.holder_count < self.few_holders {
            factors.push((20.0, format!("only {} holders", s.holder_count)));
        } else if s.holder_count < self.some_holders {
            factors.push((10.0, format!("{} holders", s.holder_count)));
        }

        if s.market_cap > 0.0 && s.liquidity > 0.0 {
            let ratio = s.liquidity / s.market_cap;
            if ratio < self.min_liquidity_ratio {
                factors.push((20.0, format!("liquidity is {:.1}% of market cap", ratio * 100.0)));
            } else if ratio < self.low_liquidity_ratio {
                factors.push((10.0, format!("liquidity is {:.1}% of market cap", ratio * 100.0)));
            }
        }

        if s.price_change_24h <= self.crash_percent {
            factors.push((20.0, format!("price down {:.0}% in 24h", s.price_change_24h.abs())));
        } else if s.price_change_24h <= self.drop_percent {
            factors.push((10.0, format!("price down {:.0}% in 24h", s.price_change_24h.abs())));
        }

        factors.sort_by(|a, b| b.0.total_cmp(&a.0));
        let score = factors.iter().map(|(points, _)| points).sum::<f64>().clamp(0.0, 100.0);
        (score, factors.into_iter().map(|(_, reason)| reason).collect())
    }
}

pub struct RiskCalculator {
    rule_weight: f64,
    model_weight: f64,
    scorer: RuleRiskScorer,
}

impl RiskCalculator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            rule_weight: config.rule_weight,
            model_weight: config.model_weight,
            scorer: RuleRiskScorer::default(),
        }
    }

    /// `clamp(0.4 * rule + 0.6 * ml * 100)`, or the rule score alone without a model signal
    pub fn hybrid_score(&self, rule_score: f64, ml_probability: Option<f64>) -> f64 {
        let rule = sanitize(rule_score, 100.0);
        let blended = match ml_probability.filter(|p| p.is_finite()) {
            Some(p) => self.rule_weight * rule + self.model_weight * p.clamp(0.0, 1.0) * 100.0,
            None => rule,
        };
        blended.clamp(0.0, 100.0)
    }

    pub fn assemble(&self, snapshot: &TokenSnapshot, signals: Option<&RiskSignals>) -> RiskRecord {
        let upstream = signals.cloned().unwrap_or_default();

        let (rule_score, mut factors) = match upstream.rule_risk_score.filter(|s| s.is_finite()) {
            Some(score) => (sanitize(score, 100.0), Vec::new()),
            None => self.scorer.score(snapshot),
        };
        if !upstream.top_risk_factors.is_empty() {
            factors = upstream.top_risk_factors.clone();
        }

        let ml_probability = upstream.ml_probability.filter(|p| p.is_finite()).map(|p| p.clamp(0.0, 1.0));
        let hybrid = self.hybrid_score(rule_score, ml_probability);

        RiskRecord {
            token: snapshot.token.clone(),
            rule_risk_score: rule_score,
            rule_risk_level: RiskLevel::from_score(rule_score),
            ml_probability,
            ml_confidence: upstream.ml_confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0)),
            ml_time_to_rug_secs: upstream.ml_time_to_rug_secs,
            top_risk_factors: factors,
            hybrid_risk_score: hybrid,
            hybrid_risk_level: RiskLevel::from_score(hybrid),
        }
    }
}

fn sanitize(value: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> RiskCalculator {
        RiskCalculator::new(&RiskConfig::default())
    }

    fn healthy_snapshot() -> TokenSnapshot {
        let mut s = TokenSnapshot::empty("mint");
        s.price = 1.0;
        s.liquidity = 500_000.0;
        s.market_cap = 2_000_000.0;
        s.holder_count = 10_000;
        s.price_change_24h = 4.0;
        s
    }

    #[test]
    fn test_hybrid_blend() {
        let calc = calculator();
        assert!((calc.hybrid_score(50.0, Some(0.9)) - 74.0).abs() < 1e-9);
        assert_eq!(calc.hybrid_score(50.0, None), 50.0);
    }

    #[test]
    fn test_hybrid_bounds() {
        let calc = calculator();
        for rule in [0.0, 25.0, 50.0, 100.0, 250.0, -10.0] {
            for ml in [0.0, 0.5, 1.0, 1.5, -0.2] {
                let score = calc.hybrid_score(rule, Some(ml));
                assert!((0.0..=100.0).contains(&score), "rule={} ml={} score={}", rule, ml, score);
            }
        }
        assert_eq!(calc.hybrid_score(f64::NAN, Some(f64::NAN)), 0.0);
    }

    #[test]
    fn test_upstream_signals_pass_through() {
        let signals = RiskSignals {
            rule_risk_score: Some(50.0),
            ml_probability: Some(0.9),
            ml_confidence: Some(0.66),
            ml_time_to_rug_secs: Some(7200),
            top_risk_factors: vec!["freeze authority".to_string(), "dev wallet".to_string()],
        };
        let record = calculator().assemble(&healthy_snapshot(), Some(&signals));
        assert_eq!(record.rule_risk_score, 50.0);
        assert_eq!(record.rule_risk_level, RiskLevel::Moderate);
        assert!((record.hybrid_risk_score - 74.0).abs() < 1e-9);
        assert_eq!(record.hybrid_risk_level, RiskLevel::High);
        assert_eq!(record.ml_time_to_rug_secs, Some(7200));
        assert_eq!(record.top_risk_factors[0], "freeze authority");
    }

    #[test]
    fn test_rule_scorer_fallback() {
        let record = calculator().assemble(&healthy_snapshot(), None);
        assert_eq!(record.rule_risk_score, 0.0);
        assert_eq!(record.hybrid_risk_level, RiskLevel::Minimal);
        assert!(record.top_risk_factors.is_empty());

        let mut risky = healthy_snapshot();
        risky.liquidity = 3_000.0;
        risky.holder_count = 40;
        risky.price_change_24h = -60.0;
        let record = calculator().assemble(&risky, None);
        // 30 thin + 20 holders + 20 ratio + 20 crash
        assert_eq!(record.rule_risk_score, 90.0);
        assert_eq!(record.hybrid_risk_level, RiskLevel::Critical);
        assert_eq!(record.top_risk_factors.len(), 4);
        assert!(record.top_risk_factors[0].contains("thin liquidity"));
    }
}
