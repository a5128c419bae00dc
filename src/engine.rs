//! Concurrent fan-out evaluation.
//!
//! [`evaluate_many`] evaluates a batch of nodes in parallel, one OS thread
//! per unique node. Real threads rather than a bounded pool: factories are
//! allowed to block on siblings (through dependency access or their own
//! nested fan-out), which would starve a fixed-size pool.
//!
//! Error policy: every branch runs to completion before the first error is
//! surfaced. A failed sibling never leaves another branch evaluating past
//! the call's return.

use std::collections::HashSet;
use std::thread;

use crate::error::EvalError;
use crate::node::NodeHandle;

/// Evaluates every node in the batch, in parallel, and returns once all of
/// them reached `Evaluated` or `Failed`.
///
/// A node appearing twice in the batch, or reachable as a shared dependency
/// of two entries, is still evaluated exactly once; that is enforced by the
/// per-node state machine, the dedup here just avoids spawning idle threads.
pub fn evaluate_many<'a>(
    nodes: impl IntoIterator<Item = &'a NodeHandle>,
) -> Result<(), EvalError> {
    let mut seen = HashSet::new();
    let unique: Vec<&NodeHandle> = nodes
        .into_iter()
        .filter(|node| seen.insert(node.id()))
        .collect();

    match unique.len() {
        0 => Ok(()),
        1 => unique[0].evaluate(),
        _ => {
            let results: Vec<Result<(), EvalError>> = thread::scope(|s| {
                let workers: Vec<_> = unique
                    .iter()
                    .map(|node| {
                        let node = *node;
                        s.spawn(move || node.evaluate())
                    })
                    .collect();

                // Join everything before surfacing any error.
                workers
                    .into_iter()
                    .map(|worker| worker.join().expect("evaluation thread panicked"))
                    .collect()
            });

            results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
        }
    }
}
