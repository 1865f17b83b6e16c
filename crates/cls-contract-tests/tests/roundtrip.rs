//! §8 "parse(format(s)) == s for every NodeSet s, and symmetrically for
//! RangeSet and RangeSetND (round-trip)".

mod support;

use cls_core::{FoldOptions, NodeSet, RangeSet};
use proptest::prelude::*;
use support::{arb_nodeset_text, arb_rangeset};

proptest! {
    #[test]
    fn rangeset_format_parse_roundtrip(set in arb_rangeset()) {
        let text = set.format(FoldOptions::none());
        let parsed = RangeSet::parse(&text).unwrap();
        prop_assert_eq!(parsed, set);
    }

    #[test]
    fn rangeset_autostep_format_parse_roundtrip(set in arb_rangeset(), threshold in 2u32..8) {
        let text = set.format(FoldOptions::threshold(threshold));
        let parsed = RangeSet::parse(&text).unwrap();
        prop_assert_eq!(parsed, set);
    }

    #[test]
    fn nodeset_format_parse_roundtrip(text in arb_nodeset_text()) {
        let set = NodeSet::parse(&text, None).unwrap();
        let formatted = set.format(Default::default());
        let reparsed = NodeSet::parse(&formatted, None).unwrap();
        prop_assert_eq!(reparsed, set);
    }
}

#[test]
fn fold_expand_roundtrip_scenario() {
    // spec scenario 1: node1 node2 node3 node5 expands/folds to node[1-3,5].
    let set = NodeSet::parse("node1,node2,node3,node5", None).unwrap();
    let names: Vec<String> = set.iter().collect();
    assert_eq!(names, vec!["node1", "node2", "node3", "node5"]);
    assert_eq!(set.format(Default::default()), "node[1-3,5]");
}

#[test]
fn multidimensional_fold_scenario() {
    // spec scenario 2.
    let a = NodeSet::parse("c-[1-10]-[1-44]", None).unwrap();
    let b = NodeSet::parse("c-[5-10]-[1-34]", None).unwrap();
    let diff = a.difference(&b);
    assert_eq!(diff.format(Default::default()), "c-[1-4]-[1-44],c-[5-10]-[35-44]");
}

#[test]
fn mixed_padding_scenario() {
    // spec scenario 3: tokens 2, 01, 001 fold to "[2,01,001]" with that
    // exact iteration order.
    let set = NodeSet::parse("n2,n01,n001", None).unwrap();
    assert_eq!(set.format(Default::default()), "n[2,01,001]");
    let names: Vec<String> = set.iter().collect();
    assert_eq!(names, vec!["n2", "n01", "n001"]);
}
