//! Feature Vector — four numeric semantic metrics per miner per cycle,
//! plus derived scalars (§3.2).

/// Derived per-miner metrics for one cycle. Every field is `None` when its
/// defining precondition does not hold (e.g. `hashrate_ratio` needs
/// `hashrate_expected > 0`), never a sentinel zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub miner_id: String,
    pub site_id: i64,
    pub model: String,
    pub firmware: String,
    pub is_online: bool,

    pub hashrate_ratio: Option<f64>,
    pub boards_ratio: Option<f64>,
    pub temp_max: Option<f64>,
    pub efficiency: Option<f64>,
    pub fan_speed_min: Option<i32>,

    /// Robust z-score vs. peer group; populated by the orchestrator after
    /// `FleetBaseliner::compute_all_groups`, not by `FeatureExtractor`.
    pub fleet_z_hashrate: Option<f64>,
    /// Populated by `ModeInferer`; defaults to `unknown` until inferred.
    pub inferred_mode: String,
}

impl FeatureVector {
    /// Peer-group key segment contributed by this feature vector, before
    /// the optional `:mode` suffix FleetBaseliner appends.
    pub fn base_group_key(&self) -> String {
        format!("{}:{}:{}", self.site_id, self.model, self.firmware)
    }
}
