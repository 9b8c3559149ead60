//! Preset ladder projection.
//!
//! Answers "what does this preset cost if the table runs cold": the stake
//! at each loss depth, the cumulative outlay, and the net profit a win at
//! that depth would recover. Reported when a preset is applied so the
//! operator can see the capital the progression requires.

use crate::types::StakePreset;

/// Rows always projected, regardless of `lose_stop`.
pub const TABLE_STEPS: usize = 15;

/// Safety ceiling on any single projected stake.
pub const MAX_SINGLE_STAKE: i64 = 50_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRow {
    /// 1-based position in the losing run.
    pub step: u32,
    pub multiplier: f64,
    pub stake: i64,
    /// Net result if this step wins: stake recovered minus prior losses.
    pub profit_if_win: i64,
    pub cumulative_outlay: i64,
}

#[derive(Debug, Clone)]
pub struct PresetProjection {
    pub rows: Vec<ProjectionRow>,
    pub total_outlay: i64,
    pub max_stake: i64,
    /// Figures at the preset's `lose_stop`, where the ladder actually ends.
    pub effective_steps: u32,
    pub effective_outlay: i64,
    pub effective_profit: i64,
}

/// Project the martingale ladder for a preset.
pub fn project(preset: &StakePreset) -> PresetProjection {
    let initial = preset.initial_stake.max(0);
    let lose_stop = preset.lose_stop.max(1) as usize;

    let mut rows = Vec::with_capacity(TABLE_STEPS);
    let mut prev_stake = initial;
    let mut cumulative = 0i64;

    for i in 0..TABLE_STEPS {
        let (multiplier, stake) = if i == 0 {
            (1.0, initial)
        } else {
            let m = preset.multipliers[(i - 1).min(3)];
            (m, (prev_stake as f64 * m) as i64)
        };
        let stake = stake.min(MAX_SINGLE_STAKE);

        cumulative += stake;
        rows.push(ProjectionRow {
            step: (i + 1) as u32,
            multiplier,
            stake,
            profit_if_win: stake - (cumulative - stake),
            cumulative_outlay: cumulative,
        });
        prev_stake = stake;
    }

    let total_outlay = rows.last().map(|r| r.cumulative_outlay).unwrap_or(0);
    let max_stake = rows.iter().map(|r| r.stake).max().unwrap_or(0);
    let effective = &rows[..lose_stop.min(rows.len())];
    let (effective_steps, effective_outlay, effective_profit) = effective
        .last()
        .map(|r| (r.step, r.cumulative_outlay, r.profit_if_win))
        .unwrap_or((0, 0, 0));

    PresetProjection {
        rows,
        total_outlay,
        max_stake,
        effective_steps,
        effective_outlay,
        effective_profit,
    }
}

/// One-line operator summary of a projection.
pub fn summarise(preset: &StakePreset, projection: &PresetProjection) -> String {
    format!(
        "Preset {} | ladder ends at step {} | outlay to cap {} | max single stake {} | win at cap nets {}",
        preset,
        projection.effective_steps,
        projection.effective_outlay,
        projection.max_stake,
        projection.effective_profit,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
