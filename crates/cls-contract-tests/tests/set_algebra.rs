//! §8: cardinality and disjointness identities for NodeSet algebra, plus
//! the group-algebra concrete scenario.

mod support;

use cls_core::{NodeSet, StaticGroupResolver};
use proptest::prelude::*;
use support::arb_nodeset;

proptest! {
    #[test]
    fn union_intersection_cardinality_identity(a in arb_nodeset(), b in arb_nodeset()) {
        let union_len = a.union(&b).length();
        let inter_len = a.intersection(&b).length();
        prop_assert_eq!(union_len + inter_len, a.length() + b.length());
    }

    #[test]
    fn differences_are_disjoint(a in arb_nodeset(), b in arb_nodeset()) {
        let a_minus_b = a.difference(&b);
        let b_minus_a = b.difference(&a);
        prop_assert!(a_minus_b.intersection(&b_minus_a).is_empty());
    }

    #[test]
    fn symmetric_difference_matches_union_minus_intersection(a in arb_nodeset(), b in arb_nodeset()) {
        let sym = a.symmetric_difference(&b);
        let via_union_minus_inter = a.union(&b).difference(&a.intersection(&b));
        prop_assert_eq!(sym, via_union_minus_inter);
    }
}

#[test]
fn group_algebra_scenario() {
    // spec scenario 4: @a -> n[1-9], @b -> n[6-11], @a^@b == n[1-5,10-11].
    let mut resolver = StaticGroupResolver::new();
    resolver.insert_group(None::<String>, "a", NodeSet::parse("n[1-9]", None).unwrap());
    resolver.insert_group(None::<String>, "b", NodeSet::parse("n[6-11]", None).unwrap());
    let set = NodeSet::parse("@a^@b", Some(&resolver)).unwrap();
    assert_eq!(set.format(Default::default()), "n[1-5,10-11]");
}
