//! Two-tier transcript state and the promotion rule.
//!
//! The transcript splits into an append-only confirmed prefix and a
//! replaceable provisional tail. A provisional token is promoted only when
//! it (a) reproduced identically at the same position across at least two
//! decode passes and (b) has persisted for a minimum wall-clock delay.

use std::time::{Duration, Instant};

/// Mutable ledger state owned by the session.
#[derive(Debug, Clone)]
pub struct LedgerState {
    /// Text of windows whose transcript has been frozen; never re-decoded
    pub completed_text: String,
    /// Tokens stabilized within the current pending window
    pub confirmed: Vec<u32>,
    /// Most recent decode's tail beyond the confirmed tokens
    pub provisional: Vec<u32>,
    /// First wall-clock time each provisional position appeared with its
    /// current identity and prefix; always aligned with `provisional`
    pub first_seen: Vec<Instant>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self {
            completed_text: String::new(),
            confirmed: Vec::new(),
            provisional: Vec::new(),
            first_seen: Vec::new(),
        }
    }

    /// All tokens of the current window: `confirmed ++ provisional`.
    pub fn all_tokens(&self) -> Vec<u32> {
        let mut tokens = self.confirmed.clone();
        tokens.extend_from_slice(&self.provisional);
        tokens
    }

    /// True when the current window holds no tokens at all.
    pub fn is_token_empty(&self) -> bool {
        self.confirmed.is_empty() && self.provisional.is_empty()
    }

    /// Drop all window tokens, keeping `completed_text`.
    pub fn clear_tokens(&mut self) {
        self.confirmed.clear();
        self.provisional.clear();
        self.first_seen.clear();
    }

    /// Install the result of a merge.
    pub fn apply(&mut self, outcome: MergeOutcome) {
        self.confirmed = outcome.confirmed;
        self.provisional = outcome.provisional;
        self.first_seen = outcome.first_seen;
    }
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of merging a fresh decode into the ledger.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub confirmed: Vec<u32>,
    pub provisional: Vec<u32>,
    pub first_seen: Vec<Instant>,
    /// Number of positions promoted from provisional to confirmed
    pub promoted: usize,
}

/// The promotion state machine. Pure: all inputs and the clock are explicit.
pub struct PromotionLedger;

impl PromotionLedger {
    /// Merge a fresh decode's full token list into the previous ledger state.
    ///
    /// `new_all_tokens` is the decode's complete output for the window,
    /// including the replayed confirmed prefix at its head.
    pub fn merge(
        prev_confirmed: &[u32],
        prev_provisional: &[u32],
        prev_first_seen: &[Instant],
        new_all_tokens: &[u32],
        now: Instant,
        delay: Duration,
    ) -> MergeOutcome {
        let new_provisional_raw: &[u32] = if new_all_tokens.len() > prev_confirmed.len() {
            &new_all_tokens[prev_confirmed.len()..]
        } else {
            &[]
        };

        let match_len = prev_provisional
            .iter()
            .zip(new_provisional_raw.iter())
            .take_while(|(a, b)| a == b)
            .count();

        // A position is promoted only if every earlier position was.
        let mut promote_count = 0;
        for i in 0..match_len {
            if i < prev_first_seen.len()
                && now.saturating_duration_since(prev_first_seen[i]) >= delay
            {
                promote_count += 1;
            } else {
                break;
            }
        }

        let mut confirmed = prev_confirmed.to_vec();
        confirmed.extend_from_slice(&prev_provisional[..promote_count]);

        let provisional = new_provisional_raw[promote_count..].to_vec();

        let first_seen = (0..provisional.len())
            .map(|i| {
                let old_pos = promote_count + i;
                if old_pos < match_len && old_pos < prev_first_seen.len() {
                    prev_first_seen[old_pos]
                } else {
                    now
                }
            })
            .collect();

        MergeOutcome {
            confirmed,
            provisional,
            first_seen,
            promoted: promote_count,
        }
    }
}
