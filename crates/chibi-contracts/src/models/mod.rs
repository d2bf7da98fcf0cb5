mod tiers;

pub use tiers::{ModelTier, ModelTiers, QuotaClass};
