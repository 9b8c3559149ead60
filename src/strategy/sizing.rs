//! Bet sizer.
//!
//! Pure function from the runtime counters to a stake amount. A zero
//! stake is a control signal ("cannot bet, pause"), never an error.

use tracing::debug;

use crate::state::RuntimeCounters;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Stake sizing configuration.
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// All stakes are multiples of this denomination.
    pub denomination: i64,
    /// Uplift applied to progression stakes so a win still nets a small
    /// profit after the platform's rake.
    pub rake_uplift: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            denomination: 500,
            rake_uplift: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct BetSizer {
    config: SizingConfig,
}

impl BetSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Compute the next stake.
    ///
    /// - No outstanding losses: the preset's initial stake.
    /// - Progression would exceed `lose_stop`: 0 (hard stop signal).
    /// - Otherwise: base stake x step multiplier x rake uplift, rounded
    ///   to the denomination.
    pub fn stake(&self, counters: &RuntimeCounters) -> i64 {
        let preset = &counters.preset;

        if counters.loss_count == 0 {
            return round_to_denomination(preset.initial_stake as f64, self.config.denomination);
        }

        if counters.loss_count + 1 > preset.lose_stop {
            debug!(
                loss_count = counters.loss_count,
                lose_stop = preset.lose_stop,
                "Progression cap reached, signalling stop"
            );
            return 0;
        }

        let multiplier = preset.multiplier_for_depth(counters.loss_count);
        let target = counters.stake_base as f64 * multiplier * (1.0 + self.config.rake_uplift);
        round_to_denomination(target, self.config.denomination)
    }
}

/// Round to the nearest multiple of `denomination`, ties rounding up.
/// Negative targets clamp to zero.
pub fn round_to_denomination(target: f64, denomination: i64) -> i64 {
    if denomination <= 0 {
        return target.max(0.0).round() as i64;
    }
    let units = target / denomination as f64;
    let lower = units.floor();
    let n = if units - lower >= 0.5 { lower + 1.0 } else { lower };
    (n.max(0.0) as i64) * denomination
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
