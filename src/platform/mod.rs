//! Stake placement collaborator.
//!
//! The game exposes one control per stake denomination on each round
//! prompt; placing a wager means activating the controls whose amounts
//! sum to the stake. The transport behind the controls is external — the
//! engine only depends on the `StakePlacer` contract and on the recovery
//! rule for stale prompts: relocate the most recent still-active prompt
//! for the account and retry once against it.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::feed::PromptRef;

/// Control denominations available on a round prompt, largest first.
pub const DEFAULT_CONTROL_DENOMINATIONS: [i64; 6] = [100_000, 50_000, 10_000, 5_000, 1_000, 500];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    /// The target prompt is no longer valid (round closed, message gone).
    #[error("stale stake control: {0}")]
    StaleTarget(String),

    #[error("stake placement failed: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over the stake controls of the game transport.
#[async_trait]
pub trait StakePlacer: Send + Sync {
    /// Activate the control for one denomination on a prompt.
    async fn activate(&self, prompt: &PromptRef, denomination: i64) -> Result<(), PlaceError>;

    /// The most recent still-active round prompt on a channel, if any.
    async fn latest_prompt(&self, channel: &str) -> Option<PromptRef>;
}

// ---------------------------------------------------------------------------
// Stake decomposition
// ---------------------------------------------------------------------------

/// Decompose a stake into control activations, largest denomination
/// first. Returns `None` when the denominations cannot represent the
/// amount exactly.
pub fn decompose_stake(amount: i64, denominations: &[i64]) -> Option<Vec<i64>> {
    if amount <= 0 {
        return None;
    }
    let mut sorted: Vec<i64> = denominations.iter().copied().filter(|&d| d > 0).collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut remaining = amount;
    let mut combination = Vec::new();
    for denom in sorted {
        while remaining >= denom {
            combination.push(denom);
            remaining -= denom;
        }
    }
    if remaining == 0 {
        Some(combination)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Placement with stale-target recovery
// ---------------------------------------------------------------------------

/// Activate every control of a combination, relocating the latest active
/// prompt and retrying once if the original target has gone stale.
pub async fn place_stake(
    placer: &dyn StakePlacer,
    prompt: &PromptRef,
    combination: &[i64],
) -> Result<(), PlaceError> {
    let mut target = prompt.clone();
    let mut relocated = false;

    for &denomination in combination {
        match placer.activate(&target, denomination).await {
            Ok(()) => {}
            Err(PlaceError::StaleTarget(detail)) if !relocated => {
                let latest = placer.latest_prompt(&prompt.channel).await.ok_or_else(|| {
                    PlaceError::StaleTarget(format!(
                        "{detail}; no active prompt found to retry against"
                    ))
                })?;
                warn!(
                    channel = %prompt.channel,
                    stale = prompt.message_id,
                    retry = latest.message_id,
                    "Stake control stale, retrying against latest prompt"
                );
                relocated = true;
                target = latest;
                placer.activate(&target, denomination).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Paper placer
// ---------------------------------------------------------------------------

/// Dry-run placer: logs activations and always succeeds. Used until a
/// real transport adapter is wired in, and by the simulation tests.
pub struct PaperPlacer;

#[async_trait]
impl StakePlacer for PaperPlacer {
    async fn activate(&self, prompt: &PromptRef, denomination: i64) -> Result<(), PlaceError> {
        info!(
            channel = %prompt.channel,
            message_id = prompt.message_id,
            denomination,
            "[PAPER] Would activate stake control"
        );
        Ok(())
    }

    async fn latest_prompt(&self, _channel: &str) -> Option<PromptRef> {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
