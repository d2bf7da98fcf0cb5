use anyhow::bail;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaClass {
    Standard,
    /// Free-tier or heavily throttled model kept as the last resort.
    LowQuota,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTier {
    pub name: String,
    pub quota: QuotaClass,
}

impl ModelTier {
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quota: QuotaClass::Standard,
        }
    }

    pub fn low_quota(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quota: QuotaClass::LowQuota,
        }
    }
}

/// Ordered fallback chain of models, most capable first.
///
/// Never empty. Built once at startup and shared read-only by every
/// pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTiers {
    tiers: IndexMap<String, ModelTier>,
}

impl ModelTiers {
    pub fn new(tiers: Vec<ModelTier>) -> anyhow::Result<Self> {
        let mut map = IndexMap::new();
        for tier in tiers {
            let name = tier.name.trim().to_string();
            if name.is_empty() || map.contains_key(&name) {
                continue;
            }
            map.insert(
                name.clone(),
                ModelTier {
                    name,
                    quota: tier.quota,
                },
            );
        }
        if map.is_empty() {
            bail!("model tier list must contain at least one model");
        }
        Ok(Self { tiers: map })
    }

    /// Parses a comma-separated override such as `CHIBI_SCAN_MODELS`.
    /// The last entry is treated as the low-quota fallback.
    pub fn from_csv(raw: &str) -> anyhow::Result<Self> {
        let names = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect::<Vec<&str>>();
        let last = names.len().saturating_sub(1);
        Self::new(
            names
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    if idx == last {
                        ModelTier::low_quota(*name)
                    } else {
                        ModelTier::standard(*name)
                    }
                })
                .collect(),
        )
    }

    /// Vision/text models used to describe people in photos.
    pub fn default_scan() -> Self {
        Self {
            tiers: index(vec![
                ModelTier::standard("gemini-2.5-flash"),
                ModelTier::standard("gemini-2.0-flash"),
                ModelTier::low_quota("gemini-2.0-flash-lite"),
            ]),
        }
    }

    /// Image-capable models used to synthesize characters.
    pub fn default_image() -> Self {
        Self {
            tiers: index(vec![
                ModelTier::standard("gemini-2.5-flash-image"),
                ModelTier::standard("gemini-2.0-flash-preview-image-generation"),
                ModelTier::low_quota("gemini-2.0-flash-exp"),
            ]),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelTier> {
        self.tiers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelTier> {
        self.tiers.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.tiers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

fn index(tiers: Vec<ModelTier>) -> IndexMap<String, ModelTier> {
    tiers
        .into_iter()
        .map(|tier| (tier.name.clone(), tier))
        .collect()
}
