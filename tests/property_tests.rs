//! Property-based tests for rmlink
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

// ============================================================================
// Range Collection Properties
// ============================================================================

mod range_properties {
    use super::*;
    use rmlink_core::{SequenceRange, SequenceRangeCollection};
    use std::collections::BTreeSet;

    #[derive(Debug, Clone)]
    enum Merge {
        Single(u64),
        Range(u64, u64),
    }

    fn merge_strategy() -> impl Strategy<Value = Merge> {
        prop_oneof![
            (1u64..200).prop_map(Merge::Single),
            (1u64..200, 0u64..12).prop_map(|(lower, len)| Merge::Range(lower, lower + len)),
        ]
    }

    proptest! {
        /// Merges keep the collection sorted, disjoint and non-adjacent, and
        /// membership matches the merged values exactly
        #[test]
        fn merge_matches_model(merges in prop::collection::vec(merge_strategy(), 0..60)) {
            let mut ranges = SequenceRangeCollection::empty();
            let mut model = BTreeSet::new();

            for merge in &merges {
                match *merge {
                    Merge::Single(number) => {
                        ranges = ranges.merge_with(number);
                        model.insert(number);
                    }
                    Merge::Range(lower, upper) => {
                        ranges = ranges.merge_with_range(SequenceRange::new(lower, upper));
                        model.extend(lower..=upper);
                    }
                }
            }

            let list: Vec<SequenceRange> = ranges.iter().copied().collect();
            for pair in list.windows(2) {
                prop_assert!(pair[0].upper() + 1 < pair[1].lower(), "{} and {} touch", pair[0], pair[1]);
            }
            for range in &list {
                prop_assert!(range.lower() <= range.upper());
            }

            for number in 1..=215u64 {
                prop_assert_eq!(ranges.contains(number), model.contains(&number), "number {}", number);
            }
            prop_assert_eq!(ranges.upper(), model.last().copied());
        }

        /// Merge order does not change the result
        #[test]
        fn merge_order_independent(mut numbers in prop::collection::vec(1u64..100, 1..40)) {
            let forward = numbers
                .iter()
                .fold(SequenceRangeCollection::empty(), |acc, &n| acc.merge_with(n));
            numbers.reverse();
            let backward = numbers
                .iter()
                .fold(SequenceRangeCollection::empty(), |acc, &n| acc.merge_with(n));
            prop_assert_eq!(forward, backward);
        }
    }
}

// ============================================================================
// Transmission Strategy Properties
// ============================================================================

mod strategy_properties {
    use super::*;
    use async_trait::async_trait;
    use rmlink_core::{
        Message, MessageAttempt, ReliableSessionSettings, RetryHandler, SequenceId,
        SequenceRange, SequenceRangeCollection, TransmissionStrategy,
    };
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    const WINDOW: usize = 32;

    struct IgnoreRetries;

    #[async_trait]
    impl RetryHandler<()> for IgnoreRetries {
        async fn on_retry(&self, _attempt: MessageAttempt<()>) {}
    }

    async fn strategy_with(sent: u64) -> (Arc<TransmissionStrategy<()>>, Arc<dyn RetryHandler<()>>) {
        let settings = ReliableSessionSettings {
            max_transfer_window_size: WINDOW,
            initial_window_size: WINDOW,
            flow_control_enabled: false,
            ..Default::default()
        };
        let handler: Arc<dyn RetryHandler<()>> = Arc::new(IgnoreRetries);
        let weak: Weak<dyn RetryHandler<()>> = Arc::downgrade(&handler);
        let strategy = TransmissionStrategy::new(SequenceId::generate(), &settings, weak);
        for _ in 0..sent {
            strategy
                .add(Message::application(vec![0u8; 8]), Duration::from_secs(1), ())
                .await
                .into_result()
                .unwrap();
        }
        (strategy, handler)
    }

    proptest! {
        /// The window start never moves back, and transmission is done exactly
        /// when every message up to the last one is acknowledged
        #[test]
        fn window_start_monotonic(
            sent in 1u64..(WINDOW as u64 - 1),
            acks in prop::collection::vec((1u64..WINDOW as u64, 0u64..6), 0..30),
        ) {
            paused_runtime().block_on(async {
                let (strategy, _handler) = strategy_with(sent).await;
                strategy
                    .add_last(Message::last_message(), Duration::from_secs(1), ())
                    .await
                    .into_result()
                    .unwrap();
                let last = strategy.last().await;
                prop_assert_eq!(last, sent + 1);

                let mut previous = strategy.window_start().await;
                let mut was_done = false;
                for (lower, len) in acks {
                    let lower = lower.min(last);
                    let upper = (lower + len).min(last);
                    strategy
                        .process_transferred(SequenceRange::new(lower, upper), None)
                        .await;

                    let start = strategy.window_start().await;
                    let done = strategy.done_transmitting().await;
                    prop_assert!(start >= previous);
                    prop_assert_eq!(done, start == last + 1);
                    prop_assert!(!was_done || done);
                    previous = start;
                    was_done = done;
                }

                strategy
                    .process_transferred(SequenceRange::new(1, last), None)
                    .await;
                prop_assert!(strategy.done_transmitting().await);
                Ok(())
            })?;
        }

        /// Acknowledging a number never handed out is invalid and leaves the
        /// window in place
        #[test]
        fn ack_beyond_sent_is_invalid(
            sent in 1u64..20,
            acked_before in 0u64..20,
            lower_offset in 0u64..20,
            excess in 1u64..50,
        ) {
            paused_runtime().block_on(async {
                let (strategy, _handler) = strategy_with(sent).await;
                let acked = acked_before.min(sent);
                if acked > 0 {
                    strategy
                        .process_transferred(SequenceRange::new(1, acked), None)
                        .await;
                }
                let start = strategy.window_start().await;

                let lower = 1 + lower_offset.min(sent - 1);
                let ranges = SequenceRangeCollection::from(SequenceRange::new(lower, sent + excess));
                let class = strategy.process_acknowledgement(&ranges).await;

                prop_assert!(class.invalid);
                prop_assert_eq!(strategy.window_start().await, start);
                Ok(())
            })?;
        }
    }
}
