//! Statistical features over the outcome history.
//!
//! These feed the predictor's model payload and the statistical fallback,
//! and back the periodic streak digests.

use std::collections::BTreeMap;

use crate::types::{Direction, WagerLogEntry};

// ---------------------------------------------------------------------------
// Trend gap
// ---------------------------------------------------------------------------

/// Deviation of the recent window from the 50/50 equilibrium line.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendGap {
    pub window: usize,
    pub big_count: usize,
    pub small_count: usize,
    pub big_ratio: f64,
    pub small_ratio: f64,
    /// 0.0 = balanced, 1.0 = fully one-sided.
    pub deviation_score: f64,
    /// Rounds "missing" to restore balance: positive = big is short.
    pub gap: i64,
    /// The underrepresented outcome the window would regress toward.
    pub regression_target: Direction,
}

/// Compute the trend gap over at most `window` recent outcomes.
pub fn trend_gap(history: &[u8], window: usize) -> TrendGap {
    let window = window.min(history.len());
    let recent = &history[history.len() - window..];
    let big_count = recent.iter().filter(|&&b| b == 1).count();
    let small_count = window - big_count;

    let (big_ratio, small_ratio) = if window > 0 {
        (
            big_count as f64 / window as f64,
            small_count as f64 / window as f64,
        )
    } else {
        (0.5, 0.5)
    };

    TrendGap {
        window,
        big_count,
        small_count,
        big_ratio,
        small_ratio,
        deviation_score: (big_ratio - 0.5).abs() * 2.0,
        gap: (window as f64 / 2.0 - big_count as f64).trunc() as i64,
        regression_target: if big_count < small_count {
            Direction::Big
        } else {
            Direction::Small
        },
    }
}

/// Statistical fallback direction: whatever the recent window is short of.
/// Empty history defaults to big, matching the first-round behaviour.
pub fn regression_target(history: &[u8], window: usize) -> Direction {
    if history.is_empty() {
        return Direction::Big;
    }
    let window = window.min(history.len());
    let recent = &history[history.len() - window..];
    let big_count = recent.iter().filter(|&&b| b == 1).count();
    if big_count < window - big_count {
        Direction::Big
    } else {
        Direction::Small
    }
}

// ---------------------------------------------------------------------------
// Pattern features
// ---------------------------------------------------------------------------

/// Shape of the recent tail of the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTag {
    /// Tail streak of 5 or more.
    LongDragon,
    /// Tail streak of 3 or 4.
    DragonCandidate,
    /// Last 6 outcomes strictly alternate.
    SingleJump,
    /// Last 5 outcomes form a palindrome.
    SymmetricWrap,
    /// None of the above.
    ChaosSwitch,
    /// Fewer than 3 outcomes recorded.
    InsufficientData,
}

impl std::fmt::Display for PatternTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatternTag::LongDragon => "LONG_DRAGON",
            PatternTag::DragonCandidate => "DRAGON_CANDIDATE",
            PatternTag::SingleJump => "SINGLE_JUMP",
            PatternTag::SymmetricWrap => "SYMMETRIC_WRAP",
            PatternTag::ChaosSwitch => "CHAOS_SWITCH",
            PatternTag::InsufficientData => "INSUFFICIENT_DATA",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternFeatures {
    pub tag: PatternTag,
    pub tail_streak_len: usize,
    pub tail_streak_bit: Option<u8>,
    pub is_alternating: bool,
    pub is_symmetric: bool,
}

/// Detect tail streaks, single-jump alternation and symmetric wraps.
pub fn pattern_features(history: &[u8]) -> PatternFeatures {
    if history.len() < 3 {
        return PatternFeatures {
            tag: PatternTag::InsufficientData,
            tail_streak_len: 0,
            tail_streak_bit: None,
            is_alternating: false,
            is_symmetric: false,
        };
    }

    let tail = history[history.len() - 1];
    let mut tail_streak_len = 1;
    for &bit in history[..history.len() - 1].iter().rev() {
        if bit == tail {
            tail_streak_len += 1;
        } else {
            break;
        }
    }

    let is_alternating = history.len() >= 6
        && history[history.len() - 6..]
            .windows(2)
            .all(|w| w[0] != w[1]);

    let is_symmetric = history.len() >= 5 && {
        let last5 = &history[history.len() - 5..];
        last5.iter().eq(last5.iter().rev())
    };

    let tag = if tail_streak_len >= 5 {
        PatternTag::LongDragon
    } else if tail_streak_len >= 3 {
        PatternTag::DragonCandidate
    } else if is_alternating {
        PatternTag::SingleJump
    } else if is_symmetric {
        PatternTag::SymmetricWrap
    } else {
        PatternTag::ChaosSwitch
    };

    PatternFeatures {
        tag,
        tail_streak_len,
        tail_streak_bit: Some(tail),
        is_alternating,
        is_symmetric,
    }
}

// ---------------------------------------------------------------------------
// Window helpers
// ---------------------------------------------------------------------------

/// Format the most recent `window` outcomes as a compact 0/1 string,
/// oldest first.
pub fn window_string(history: &[u8], window: usize) -> String {
    let window = window.min(history.len());
    history[history.len() - window..]
        .iter()
        .map(|&b| if b == 1 { '1' } else { '0' })
        .collect()
}

/// Length and direction of the current tail streak. Empty history reports
/// a zero-length big streak.
pub fn current_streak(history: &[u8]) -> (usize, Direction) {
    match history.last() {
        None => (0, Direction::Big),
        Some(&tail) => {
            let mut streak = 1;
            for &bit in history[..history.len() - 1].iter().rev() {
                if bit == tail {
                    streak += 1;
                } else {
                    break;
                }
            }
            (streak, Direction::from_bit(tail))
        }
    }
}

// ---------------------------------------------------------------------------
// Streak statistics (periodic digests)
// ---------------------------------------------------------------------------

/// Histograms of consecutive-run lengths, per direction.
pub fn consecutive_runs(history: &[u8]) -> (BTreeMap<usize, u32>, BTreeMap<usize, u32>) {
    let mut big: BTreeMap<usize, u32> = BTreeMap::new();
    let mut small: BTreeMap<usize, u32> = BTreeMap::new();
    if history.is_empty() {
        return (big, small);
    }

    let mut streak = 1usize;
    for i in 1..history.len() {
        if history[i] == history[i - 1] {
            streak += 1;
        } else {
            let map = if history[i - 1] == 1 { &mut big } else { &mut small };
            *map.entry(streak).or_insert(0) += 1;
            streak = 1;
        }
    }
    let map = if history[history.len() - 1] == 1 {
        &mut big
    } else {
        &mut small
    };
    *map.entry(streak).or_insert(0) += 1;

    (big, small)
}

/// Histogram of loss-streak lengths across the wager ledger.
pub fn loss_streak_histogram(ledger: &[WagerLogEntry]) -> BTreeMap<usize, u32> {
    let mut histogram: BTreeMap<usize, u32> = BTreeMap::new();
    let mut streak = 0usize;

    for entry in ledger {
        if entry.profit < 0 {
            streak += 1;
        } else {
            if streak > 0 {
                *histogram.entry(streak).or_insert(0) += 1;
            }
            streak = 0;
        }
    }
    if streak > 0 {
        *histogram.entry(streak).or_insert(0) += 1;
    }

    histogram
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
