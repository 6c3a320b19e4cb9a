//! Retry/backoff policy for transaction status polling.
//!
//! All functions are pure: they depend only on the transaction's best-known
//! timestamp, the chain, and the evaluation time passed in by the caller.
//! A missing timestamp is treated as "just created".

use std::time::Duration;

use crate::types::{ChainId, Timestamp};

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;

/// Polling parameters for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProfile {
    /// Pending-phase delay while the transaction is new.
    pub new_pending_interval_ms: i64,
    /// Pending-phase delay ceiling for old transactions.
    pub old_pending_interval_ms: i64,
    /// Delay while accepted but unconfirmed.
    pub registered_interval_ms: i64,
    /// Delay while accepted with expedited settlement reported.
    pub fast_registered_interval_ms: i64,
    /// Pending-phase attempts for a new transaction.
    pub new_pending_attempts: u32,
    /// Pending-phase attempts for an old transaction.
    pub old_pending_attempts: u32,
    /// Age under which a transaction counts as new.
    pub new_tx_window_ms: i64,
    /// Age after which no pending-phase attempts remain.
    pub max_pending_age_ms: i64,
    /// Largest accepted gap between a transfer intent and its transaction.
    pub consistency_window_ms: i64,
}

/// Get the retry profile for a chain.
pub fn retry_profile(chain: ChainId) -> RetryProfile {
    match chain {
        ChainId::Adm => RetryProfile {
            new_pending_interval_ms: 4 * SECOND,
            old_pending_interval_ms: 16 * SECOND,
            registered_interval_ms: 4 * SECOND,
            fast_registered_interval_ms: 4 * SECOND,
            new_pending_attempts: 15,
            old_pending_attempts: 4,
            new_tx_window_ms: MINUTE,
            max_pending_age_ms: 30 * MINUTE,
            consistency_window_ms: 5 * MINUTE,
        },
        ChainId::Btc | ChainId::Doge => RetryProfile {
            new_pending_interval_ms: 10 * SECOND,
            old_pending_interval_ms: 60 * SECOND,
            registered_interval_ms: 60 * SECOND,
            fast_registered_interval_ms: 60 * SECOND,
            new_pending_attempts: 20,
            old_pending_attempts: 3,
            new_tx_window_ms: 30 * MINUTE,
            max_pending_age_ms: 24 * HOUR,
            consistency_window_ms: 24 * HOUR,
        },
        ChainId::Dash => RetryProfile {
            new_pending_interval_ms: 5 * SECOND,
            old_pending_interval_ms: 30 * SECOND,
            registered_interval_ms: 30 * SECOND,
            fast_registered_interval_ms: 5 * SECOND,
            new_pending_attempts: 20,
            old_pending_attempts: 3,
            new_tx_window_ms: 30 * MINUTE,
            max_pending_age_ms: 24 * HOUR,
            consistency_window_ms: 24 * HOUR,
        },
        ChainId::Eth | ChainId::Usdt | ChainId::Usdc | ChainId::Dai => RetryProfile {
            new_pending_interval_ms: 4 * SECOND,
            old_pending_interval_ms: 30 * SECOND,
            registered_interval_ms: 20 * SECOND,
            fast_registered_interval_ms: 20 * SECOND,
            new_pending_attempts: 20,
            old_pending_attempts: 3,
            new_tx_window_ms: 10 * MINUTE,
            max_pending_age_ms: 2 * HOUR,
            consistency_window_ms: 30 * MINUTE,
        },
        ChainId::Lsk => RetryProfile {
            new_pending_interval_ms: 4 * SECOND,
            old_pending_interval_ms: 20 * SECOND,
            registered_interval_ms: 10 * SECOND,
            fast_registered_interval_ms: 10 * SECOND,
            new_pending_attempts: 20,
            old_pending_attempts: 3,
            new_tx_window_ms: 5 * MINUTE,
            max_pending_age_ms: HOUR,
            consistency_window_ms: 20 * MINUTE,
        },
    }
}

fn age(timestamp: Option<Timestamp>, now: Timestamp) -> i64 {
    timestamp.map(|ts| (now - ts).max(0)).unwrap_or(0)
}

/// Delay before the next poll while the transaction is not yet in the pending pool.
///
/// Constant while the transaction is new, then grows linearly with age until it
/// reaches the chain's ceiling.
pub fn pending_retry_timeout(timestamp: Option<Timestamp>, chain: ChainId, now: Timestamp) -> Duration {
    let p = retry_profile(chain);
    let age = age(timestamp, now);

    let ms = if age < p.new_tx_window_ms {
        p.new_pending_interval_ms
    } else {
        let span = (p.old_pending_interval_ms - p.new_pending_interval_ms).max(0);
        let over = age - p.new_tx_window_ms;
        let grown = if p.new_tx_window_ms > 0 {
            p.new_pending_interval_ms
                .saturating_add(((span as i128 * over as i128) / p.new_tx_window_ms as i128) as i64)
        } else {
            p.old_pending_interval_ms
        };
        grown.min(p.old_pending_interval_ms)
    };

    Duration::from_millis(ms as u64)
}

/// Maximum number of pending-phase attempts for a transaction of this age.
///
/// Non-increasing with age, so resuming after a restart never resets the budget.
pub fn pending_retry_count(timestamp: Option<Timestamp>, chain: ChainId, now: Timestamp) -> u32 {
    let p = retry_profile(chain);
    let age = age(timestamp, now);

    if age < p.new_tx_window_ms {
        p.new_pending_attempts
    } else if age < p.max_pending_age_ms {
        p.old_pending_attempts
    } else {
        0
    }
}

/// Delay while the transaction is accepted but unconfirmed.
///
/// Independent of age. Registered-phase retries are not capped.
pub fn registered_retry_timeout(
    _timestamp: Option<Timestamp>,
    chain: ChainId,
    fast: bool,
    _now: Timestamp,
) -> Duration {
    let p = retry_profile(chain);
    let ms = if fast {
        p.fast_registered_interval_ms
    } else {
        p.registered_interval_ms
    };
    Duration::from_millis(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: Timestamp = 1_700_000_000_000;

    #[test]
    fn test_new_transaction_uses_short_interval() {
        let t = pending_retry_timeout(Some(NOW - 1_000), ChainId::Eth, NOW);
        assert_eq!(t, Duration::from_secs(4));
    }

    #[test]
    fn test_old_transaction_clamped_to_ceiling() {
        let t = pending_retry_timeout(Some(NOW - 10 * HOUR), ChainId::Eth, NOW);
        assert_eq!(t, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_timestamp_is_new() {
        assert_eq!(
            pending_retry_count(None, ChainId::Btc, NOW),
            retry_profile(ChainId::Btc).new_pending_attempts
        );
    }

    #[test]
    fn test_future_timestamp_is_new() {
        assert_eq!(
            pending_retry_timeout(Some(NOW + HOUR), ChainId::Lsk, NOW),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_ancient_transaction_has_no_attempts() {
        assert_eq!(pending_retry_count(Some(NOW - 48 * HOUR), ChainId::Btc, NOW), 0);
    }

    #[test]
    fn test_fast_settlement_shortens_registered_delay() {
        let slow = registered_retry_timeout(Some(NOW), ChainId::Dash, false, NOW);
        let fast = registered_retry_timeout(Some(NOW), ChainId::Dash, true, NOW);
        assert!(fast < slow);
    }

    #[test]
    fn test_profiles_are_consistent() {
        for chain in ChainId::all() {
            let p = retry_profile(*chain);
            assert!(p.new_pending_interval_ms <= p.old_pending_interval_ms, "{}", chain);
            assert!(p.new_pending_attempts >= p.old_pending_attempts, "{}", chain);
            assert!(p.new_tx_window_ms <= p.max_pending_age_ms, "{}", chain);
            assert!(p.fast_registered_interval_ms <= p.registered_interval_ms, "{}", chain);
        }
    }

    proptest! {
        #[test]
        fn prop_retry_count_non_increasing_with_age(a in 0i64..(72 * HOUR), b in 0i64..(72 * HOUR), idx in 0usize..9) {
            let chain = ChainId::all()[idx];
            let (younger, older) = if a <= b { (a, b) } else { (b, a) };
            let young = pending_retry_count(Some(NOW - younger), chain, NOW);
            let old = pending_retry_count(Some(NOW - older), chain, NOW);
            prop_assert!(old <= young);
        }

        #[test]
        fn prop_pending_timeout_bounded_and_monotonic(a in 0i64..(72 * HOUR), b in 0i64..(72 * HOUR), idx in 0usize..9) {
            let chain = ChainId::all()[idx];
            let p = retry_profile(chain);
            let (younger, older) = if a <= b { (a, b) } else { (b, a) };
            let t_young = pending_retry_timeout(Some(NOW - younger), chain, NOW);
            let t_old = pending_retry_timeout(Some(NOW - older), chain, NOW);
            prop_assert!(t_young <= t_old);
            prop_assert!(t_old <= Duration::from_millis(p.old_pending_interval_ms as u64));
            prop_assert!(t_young >= Duration::from_millis(p.new_pending_interval_ms as u64));
        }
    }
}
