//! Shared proptest generators for the round-trip and set-algebra suites.
//! Not a test file itself — pulled in with `mod support;`.

use cls_core::{FoldOptions, NodeSet, RangeSet, RangeToken};
use proptest::prelude::*;

pub fn digit_count(value: u64) -> u8 {
    value.to_string().len() as u8
}

/// A token whose `pad` is either `0` or strictly wider than `value`'s own
/// digit count, so `format` always actually writes the leading zeros
/// `parse` needs to reconstruct the same pad width.
pub fn arb_token() -> impl Strategy<Value = RangeToken> {
    (0u64..1_000, 0u8..4).prop_map(|(value, extra_pad)| {
        let pad = if extra_pad == 0 { 0 } else { digit_count(value) + extra_pad };
        RangeToken::new(value, pad)
    })
}

pub fn arb_rangeset() -> impl Strategy<Value = RangeSet> {
    proptest::collection::vec(arb_token(), 0..20).prop_map(RangeSet::from_tokens)
}

/// A single-axis NodeSet pattern, e.g. `"node[1-5,09]"`, built from an
/// arbitrary `RangeSet` so it stays within the grammar `NodeSet::parse`
/// accepts.
pub fn arb_nodeset_text() -> impl Strategy<Value = String> {
    ("[a-z]{1,6}", arb_rangeset()).prop_map(|(prefix, set)| {
        let range_text = set.format(FoldOptions::none());
        if range_text.is_empty() {
            format!("{prefix}1")
        } else {
            format!("{prefix}[{range_text}]")
        }
    })
}

pub fn arb_nodeset() -> impl Strategy<Value = NodeSet> {
    arb_nodeset_text().prop_map(|text| NodeSet::parse(&text, None).unwrap())
}
