//! Property tests for repetition trip counting.

use proptest::prelude::*;

use opmatching::concrete::{kind_is, OpDag, OpId};
use opmatching::{NestedMatcher, Pattern};

/// A chain a -> add_0 -> ... -> add_{k-1}.
fn add_chain(k: usize) -> (OpDag, Vec<OpId>) {
    let mut dag = OpDag::new();
    let a = dag.add_source();
    let mut ops: Vec<OpId> = Vec::new();
    for _ in 0..k {
        let add = dag.add_op("add", 1, 1);
        match ops.last() {
            Some(&prev) => dag.wire((prev, 0), (add, 0)),
            None => dag.connect(a, add, 0),
        }
        ops.push(add);
    }
    (dag, ops)
}

/// rep(add, min..=max) with no surrounding nodes.
fn repetition_only_pattern(min_rep: usize, max_rep: usize) -> Pattern<OpDag> {
    let mut builder = Pattern::<OpDag>::builder();
    let root = builder.root();
    let body = builder.add_graph();
    let b_add = builder.append_op(body, vec![kind_is("add")]).unwrap();
    builder.create_input_port(body, 0, b_add, 0).unwrap();
    builder.create_output_port(body, 0, b_add, 0).unwrap();
    builder
        .append_repetition(root, body, vec![(0, 0)], min_rep, max_rep, vec![])
        .unwrap();
    builder.finish().unwrap()
}

proptest! {
    /// The greedy matcher claims `min(k, max)` chain links and succeeds
    /// exactly when the chain is long enough to reach `min`.
    #[test]
    fn repetition_trip_count_soundness(
        k in 1usize..=8,
        min_rep in 1usize..=3,
        extra in 0usize..=3,
    ) {
        let max_rep = min_rep + extra;
        let (dag, ops) = add_chain(k);
        let pattern = repetition_only_pattern(min_rep, max_rep);
        let matcher = NestedMatcher::new(&pattern);

        let result = matcher.find_rooted_match(&dag, ops[0]);
        if k >= min_rep {
            let m = result.expect("chain long enough to reach min_rep");
            prop_assert_eq!(m.matched_ops.len(), k.min(max_rep));
            // The claimed prefix of the chain, in order.
            let claimed: Vec<_> = m.matched_ops.iter().map(|&(op, _)| op).collect();
            prop_assert_eq!(&claimed[..], &ops[..k.min(max_rep)]);
        } else {
            prop_assert!(result.is_none());
        }
    }

    /// Matching never claims an operator twice, whatever the chain shape.
    #[test]
    fn unique_claim(k in 1usize..=8) {
        let (dag, ops) = add_chain(k);
        let pattern = repetition_only_pattern(1, 4);
        let matcher = NestedMatcher::new(&pattern);
        for &seed in &ops {
            if let Some(m) = matcher.find_rooted_match(&dag, seed) {
                let mut seen = std::collections::HashSet::new();
                for (op, _) in &m.matched_ops {
                    prop_assert!(seen.insert(*op));
                }
            }
        }
    }
}
