//! Optimizer settings for eager aggregation.
//!
//! Settings come from three places, later ones overriding earlier ones:
//! compiled-in defaults, the `settings:` block of a plan file (serde), and
//! `EAGG_*` environment variables ([`EagerAggConfig::from_env`]).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::PlanNodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EagerAggConfig {
    /// Minimum `input rows / estimated groups` ratio for a push-down to be taken.
    pub agg_push_down_threshold: f64,
    /// Keep searching below the first join for a deeper insertion point.
    pub agg_push_down_every_join: bool,
    /// Damping factor applied to every grouping key after the first.
    pub multi_agg_keys_correlated_coefficient: f64,
    /// Reject targets whose partial aggregate computes no function.
    pub only_push_agg_with_functions: bool,
    /// Comma-separated join ids that are never pushed below.
    pub eager_agg_join_id_blocklist: String,
    /// Comma-separated `<join id>-<child index>` pairs. When non-empty it
    /// replaces the cost model.
    pub eager_agg_join_id_whitelist: String,
    /// Inputs above this many rows may skip long-tail grouping keys.
    pub large_input_row_threshold: u64,
    /// A key is long-tail when its NDV is below this fraction of the leading key's NDV.
    pub tail_key_ndv_ratio: f64,
    /// Upper bound on fixed-point iterations of the heuristic driver.
    pub max_optimizer_passes: usize,
}

impl Default for EagerAggConfig {
    fn default() -> Self {
        Self {
            agg_push_down_threshold: 0.0,
            agg_push_down_every_join: false,
            multi_agg_keys_correlated_coefficient: 0.5,
            only_push_agg_with_functions: false,
            eager_agg_join_id_blocklist: String::new(),
            eager_agg_join_id_whitelist: String::new(),
            large_input_row_threshold: 1_000_000,
            tail_key_ndv_ratio: 0.001,
            max_optimizer_passes: 16,
        }
    }
}

fn tokens(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{}: cannot parse '{}'", key, raw)))
}

impl EagerAggConfig {
    /// Defaults overridden by `EAGG_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (`EAGG_<FIELD NAME IN UPPER CASE>`).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        const P: &str = "EAGG_";
        let key = |field: &str| format!("{}{}", P, field.to_uppercase());

        if let Some(v) = lookup(&key("agg_push_down_threshold")) {
            self.agg_push_down_threshold = parse_env("agg_push_down_threshold", &v)?;
        }
        if let Some(v) = lookup(&key("agg_push_down_every_join")) {
            self.agg_push_down_every_join = parse_env("agg_push_down_every_join", &v)?;
        }
        if let Some(v) = lookup(&key("multi_agg_keys_correlated_coefficient")) {
            self.multi_agg_keys_correlated_coefficient =
                parse_env("multi_agg_keys_correlated_coefficient", &v)?;
        }
        if let Some(v) = lookup(&key("only_push_agg_with_functions")) {
            self.only_push_agg_with_functions = parse_env("only_push_agg_with_functions", &v)?;
        }
        if let Some(v) = lookup(&key("eager_agg_join_id_blocklist")) {
            self.eager_agg_join_id_blocklist = v;
        }
        if let Some(v) = lookup(&key("eager_agg_join_id_whitelist")) {
            self.eager_agg_join_id_whitelist = v;
        }
        if let Some(v) = lookup(&key("large_input_row_threshold")) {
            self.large_input_row_threshold = parse_env("large_input_row_threshold", &v)?;
        }
        if let Some(v) = lookup(&key("tail_key_ndv_ratio")) {
            self.tail_key_ndv_ratio = parse_env("tail_key_ndv_ratio", &v)?;
        }
        if let Some(v) = lookup(&key("max_optimizer_passes")) {
            self.max_optimizer_passes = parse_env("max_optimizer_passes", &v)?;
        }
        Ok(self)
    }

    /// Join ids listed in the blocklist.
    ///
    /// An entry that is not a join id is a configuration error instead of
    /// an entry that silently matches nothing, so a typo cannot leave a
    /// join unblocked. [`validate`](Self::validate) reports it up front.
    pub fn blocked_join_ids(&self) -> Result<BTreeSet<PlanNodeId>> {
        tokens(&self.eager_agg_join_id_blocklist)
            .map(|t| {
                t.parse::<u32>().map(PlanNodeId::new).map_err(|_| {
                    Error::Config(format!("bad blocklist entry '{}': expected a join id", t))
                })
            })
            .collect()
    }

    /// `(join id, child index)` pairs listed in the whitelist.
    pub fn whitelisted_targets(&self) -> Result<BTreeSet<(PlanNodeId, usize)>> {
        tokens(&self.eager_agg_join_id_whitelist)
            .map(|t| {
                let bad = || {
                    Error::Config(format!(
                        "bad whitelist entry '{}': expected <join_id>-<child_index>",
                        t
                    ))
                };
                let (id, idx) = t.split_once('-').ok_or_else(bad)?;
                let id = id.trim().parse::<u32>().map_err(|_| bad())?;
                let idx = idx.trim().parse::<usize>().map_err(|_| bad())?;
                if idx > 1 {
                    return Err(bad());
                }
                Ok((PlanNodeId::new(id), idx))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.agg_push_down_threshold >= 0.0) {
            return Err(Error::Config(format!(
                "agg_push_down_threshold must be >= 0, got {}",
                self.agg_push_down_threshold
            )));
        }
        if !(self.multi_agg_keys_correlated_coefficient >= 0.0) {
            return Err(Error::Config(format!(
                "multi_agg_keys_correlated_coefficient must be >= 0, got {}",
                self.multi_agg_keys_correlated_coefficient
            )));
        }
        if !(0.0..=1.0).contains(&self.tail_key_ndv_ratio) {
            return Err(Error::Config(format!(
                "tail_key_ndv_ratio must be within [0, 1], got {}",
                self.tail_key_ndv_ratio
            )));
        }
        if self.max_optimizer_passes == 0 {
            return Err(Error::Config("max_optimizer_passes must be positive".into()));
        }
        self.blocked_join_ids()?;
        self.whitelisted_targets()?;
        Ok(())
    }
}
