//! Property tests for the single-slot mailbox: against arbitrary
//! interleavings of publish/consume operations, the observable behavior
//! must match a one-cell model (latest write wins, reads drain).

use proptest::prelude::*;

use dem::Mailbox;

#[derive(Clone, Copy, Debug)]
enum Op {
    Publish(u32),
    Consume,
    Peek,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u32>().prop_map(Op::Publish),
        Just(Op::Consume),
        Just(Op::Peek),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// At-most-one-pending-item: the mailbox always behaves like a single
    /// cell with a freshness bit, never like a queue.
    #[test]
    fn mailbox_matches_single_cell_model(ops in proptest::collection::vec(op_strategy(), 1..64)) {
        let mailbox = Mailbox::new(0u32);
        let mut model: Option<u32> = None;

        for op in ops {
            match op {
                Op::Publish(v) => {
                    mailbox.publish_with(|slot| *slot = v);
                    model = Some(v); // overwrite, no backlog
                }
                Op::Consume => {
                    let got = mailbox.consume_with(|slot| *slot);
                    prop_assert_eq!(got, model.take());
                }
                Op::Peek => {
                    prop_assert_eq!(mailbox.is_fresh(), model.is_some());
                }
            }
        }
    }

    /// Two publishes with no consume in between: the consumer must see
    /// only the second payload.
    #[test]
    fn double_publish_keeps_latest(a in any::<u32>(), b in any::<u32>()) {
        let mailbox = Mailbox::new(0u32);
        mailbox.publish_with(|slot| *slot = a);
        mailbox.publish_with(|slot| *slot = b);
        prop_assert_eq!(mailbox.consume_with(|slot| *slot), Some(b));
        prop_assert_eq!(mailbox.consume_with(|slot| *slot), None);
    }
}
