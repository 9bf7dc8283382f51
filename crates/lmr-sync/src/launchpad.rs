//! Launch site resolution: manifest site code -> canonical launchpad name ->
//! catalog launchpad record and timezone.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use lmr_core::{LaunchpadRecord, ReconError};
use lmr_storage::CatalogStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchpadRule {
    pub prefix: String,
    pub canonical: String,
}

impl LaunchpadRule {
    fn new(prefix: &str, canonical: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            canonical: canonical.to_string(),
        }
    }

    fn matches(&self, site: &str) -> bool {
        site.to_ascii_uppercase()
            .starts_with(&self.prefix.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LaunchpadRulesFile {
    version: u32,
    #[serde(default)]
    rules: Vec<LaunchpadRule>,
}

/// Ordered prefix table; the first matching prefix wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchpadResolver {
    rules: Vec<LaunchpadRule>,
}

impl Default for LaunchpadResolver {
    fn default() -> Self {
        Self {
            rules: vec![
                LaunchpadRule::new("SLC-40", "CCSFS SLC 40"),
                LaunchpadRule::new("LC-39A", "KSC LC 39A"),
                LaunchpadRule::new("SLC-4E", "VAFB SLC 4E"),
                LaunchpadRule::new("BC", "STLS"),
                // Unknown site: assume the busiest pad.
                LaunchpadRule::new("?", "CCSFS SLC 40"),
            ],
        }
    }
}

impl LaunchpadResolver {
    pub fn new(rules: Vec<LaunchpadRule>) -> Result<Self> {
        if rules.is_empty() {
            bail!("launchpad rule table is empty");
        }
        if let Some(rule) = rules.iter().find(|r| r.prefix.trim().is_empty()) {
            bail!("launchpad rule for {:?} has an empty prefix", rule.canonical);
        }
        Ok(Self { rules })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: LaunchpadRulesFile = serde_yaml::from_str(text).context("parsing launchpad rules")?;
        if file.version != 1 {
            bail!("unsupported launchpad rules version {}", file.version);
        }
        Self::new(file.rules)
    }

    /// Load `rules/launchpads.yaml` under `root`, falling back to the built-in
    /// table when the file does not exist.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("launchpads.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn rules(&self) -> &[LaunchpadRule] {
        &self.rules
    }

    pub fn canonical_name(&self, site: &str) -> Result<&str, ReconError> {
        let site = site.trim();
        self.rules
            .iter()
            .find(|rule| rule.matches(site))
            .map(|rule| rule.canonical.as_str())
            .ok_or_else(|| ReconError::UnresolvedLaunchpad {
                raw: site.to_string(),
            })
    }
}

/// A canonical site name resolved against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSite {
    pub record: LaunchpadRecord,
    pub tz: Tz,
}

pub async fn lookup_site(store: &dyn CatalogStore, canonical: &str) -> Result<ResolvedSite, ReconError> {
    let record = store
        .resolve_site(canonical)
        .await
        .map_err(|e| ReconError::UpstreamFetch(format!("launchpad lookup {canonical:?}: {e}")))?
        .ok_or_else(|| ReconError::SiteLookupMiss {
            canonical: canonical.to_string(),
        })?;
    let tz: Tz = record
        .timezone
        .parse()
        .map_err(|_| ReconError::UnknownTimezone {
            launchpad: record.id.clone(),
            timezone: record.timezone.clone(),
        })?;
    Ok(ResolvedSite { record, tz })
}
