pub mod risk;
pub mod velocity;

pub use risk::{RiskCalculator, RuleRiskScorer};
pub use velocity::VelocityCalculator;
