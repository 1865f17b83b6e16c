//! `RangeSetND`: an ordered sequence of independent range-like axes,
//! folded into axis-aligned boxes (spec §3 "RangeSetND", §4.1).
//!
//! Internally a `RangeSetND` is a disjoint union of boxes (one `RangeSet`
//! per axis per box). Disjointness is maintained as an invariant by every
//! mutating operation, which lets `length()` be a simple sum of per-box
//! products instead of requiring point-by-point deduplication.

use crate::rangeset::{FoldOptions, RangeSet, RangeToken};

/// One axis-aligned box: one `RangeSet` per axis.
#[derive(Clone, Debug, PartialEq, Eq)]
struct NdBox {
    axes: Vec<RangeSet>,
}

impl NdBox {
    fn is_empty(&self) -> bool {
        self.axes.iter().any(|a| a.is_empty())
    }

    fn len(&self) -> u128 {
        self.axes.iter().map(|a| a.len() as u128).product()
    }

    fn contains(&self, point: &[RangeToken]) -> bool {
        self.axes
            .iter()
            .zip(point)
            .all(|(axis, tok)| axis.contains_token(*tok))
    }

    /// Subtract `other` from `self`, returning zero or more disjoint boxes
    /// whose union is `self \ other`. Peels axes in `order`: for each
    /// axis, split off the "outside other" slab as its own box, then
    /// recurse into the "inside other on this axis" remainder for the
    /// following axes. The portion inside `other` on every axis is fully
    /// subtracted and produces no box.
    fn minus(&self, other: &NdBox, order: &[usize]) -> Vec<NdBox> {
        let mut result = Vec::new();
        let mut remainder = self.clone();
        for &axis in order {
            let outside = remainder.axes[axis].difference(&other.axes[axis]);
            if !outside.is_empty() {
                let mut slab = remainder.clone();
                slab.axes[axis] = outside;
                result.push(slab);
            }
            let inside = remainder.axes[axis].intersection(&other.axes[axis]);
            if inside.is_empty() {
                return result;
            }
            remainder.axes[axis] = inside;
        }
        // `remainder` is now fully contained in `other` on every peeled
        // axis; it contributes nothing to the difference.
        result
    }

    fn intersect(&self, other: &NdBox) -> Option<NdBox> {
        let axes: Vec<RangeSet> = self
            .axes
            .iter()
            .zip(&other.axes)
            .map(|(a, b)| a.intersection(b))
            .collect();
        if axes.iter().any(|a| a.is_empty()) {
            None
        } else {
            Some(NdBox { axes })
        }
    }
}

/// A fold-axis policy: axis indices (negative index from the right) in
/// priority order for axis peeling during difference/fold.
#[derive(Clone, Debug)]
pub struct FoldAxis(pub Vec<isize>);

impl FoldAxis {
    pub fn declared_order(dims: usize) -> Self {
        Self((0..dims as isize).collect())
    }

    fn resolve(&self, dims: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .0
            .iter()
            .map(|&i| if i < 0 { (dims as isize + i) as usize } else { i as usize })
            .filter(|&i| i < dims)
            .collect();
        for i in 0..dims {
            if !out.contains(&i) {
                out.push(i);
            }
        }
        out
    }
}

/// The multidimensional range-set (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSetND {
    dims: usize,
    boxes: Vec<NdBox>,
}

impl RangeSetND {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            boxes: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Build a single-box set directly from one `RangeSet` per axis.
    pub fn from_axes(axes: Vec<RangeSet>) -> Self {
        let dims = axes.len();
        let b = NdBox { axes };
        if b.is_empty() {
            Self::new(dims)
        } else {
            Self {
                dims,
                boxes: vec![b],
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.iter().all(|b| b.is_empty())
    }

    pub fn length(&self) -> u128 {
        self.boxes.iter().map(|b| b.len()).sum()
    }

    pub fn contains(&self, point: &[RangeToken]) -> bool {
        self.boxes.iter().any(|b| b.contains(point))
    }

    pub fn contiguous(&self) -> bool {
        self.boxes.len() == 1 && self.boxes[0].axes.iter().all(|a| a.contiguous())
    }

    /// Every point, axis-0-major, each axis ascending within.
    pub fn iter(&self) -> impl Iterator<Item = Vec<RangeToken>> + '_ {
        self.boxes.iter().flat_map(|b| cartesian(&b.axes))
    }

    pub fn union(&self, other: &Self, fold_axis: &FoldAxis) -> Self {
        let order = fold_axis.resolve(self.dims);
        let mut boxes = self.boxes.clone();
        for ob in &other.boxes {
            let mut pieces = vec![ob.clone()];
            for sb in &self.boxes {
                pieces = pieces.into_iter().flat_map(|p| p.minus(sb, &order)).collect();
            }
            boxes.extend(pieces);
        }
        let mut result = Self {
            dims: self.dims,
            boxes,
        };
        result.compact(&order);
        result
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let order = FoldAxis::declared_order(self.dims).resolve(self.dims);
        let mut boxes = Vec::new();
        for a in &self.boxes {
            for b in &other.boxes {
                if let Some(i) = a.intersect(b) {
                    boxes.push(i);
                }
            }
        }
        let mut result = Self {
            dims: self.dims,
            boxes,
        };
        result.compact(&order);
        result
    }

    pub fn difference(&self, other: &Self, fold_axis: &FoldAxis) -> Self {
        let order = fold_axis.resolve(self.dims);
        let mut boxes = self.boxes.clone();
        for ob in &other.boxes {
            boxes = boxes.into_iter().flat_map(|b| b.minus(ob, &order)).collect();
        }
        let mut result = Self {
            dims: self.dims,
            boxes,
        };
        result.compact(&order);
        result
    }

    pub fn symmetric_difference(&self, other: &Self, fold_axis: &FoldAxis) -> Self {
        let a_minus_b = self.difference(other, fold_axis);
        let b_minus_a = other.difference(self, fold_axis);
        a_minus_b.union(&b_minus_a, fold_axis)
    }

    /// Drop empty boxes, then merge veins that agree on every axis but
    /// one into a single box along that axis, iterating to a fixed point
    /// (spec §4.1: "folding ... iterates until a fixed point").
    fn compact(&mut self, order: &[usize]) {
        self.boxes.retain(|b| !b.is_empty());
        if self.dims == 0 {
            // A zero-dim set only ever has the unit box; nothing to merge,
            // but duplicate unit boxes collapse to one.
            self.boxes.truncate(if self.boxes.is_empty() { 0 } else { 1 });
            return;
        }
        loop {
            let mut merged_once = false;
            'axis: for &axis in order {
                let mut groups: std::collections::HashMap<Vec<RangeSet>, Vec<usize>> =
                    std::collections::HashMap::new();
                for (idx, b) in self.boxes.iter().enumerate() {
                    let key: Vec<RangeSet> = b
                        .axes
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != axis)
                        .map(|(_, r)| r.clone())
                        .collect();
                    groups.entry(key).or_default().push(idx);
                }
                for idxs in groups.into_values() {
                    if idxs.len() > 1 {
                        let mut merged_axis = self.boxes[idxs[0]].axes[axis].clone();
                        for &i in &idxs[1..] {
                            merged_axis.union_with(&self.boxes[i].axes[axis]);
                        }
                        let mut new_box = self.boxes[idxs[0]].clone();
                        new_box.axes[axis] = merged_axis;
                        let mut sorted = idxs;
                        sorted.sort_unstable_by(|a, b| b.cmp(a));
                        for i in sorted {
                            self.boxes.remove(i);
                        }
                        self.boxes.push(new_box);
                        merged_once = true;
                        break 'axis;
                    }
                }
            }
            if !merged_once {
                break;
            }
        }
    }

    /// Fold into the declared-order-of-axes compact textual form, e.g.
    /// `c-[1-4]-[1-44],c-[5-10]-[35-44]` when each axis is wrapped by the
    /// caller (typically `NodeSet`) into its own bracket group.
    pub fn format_axes(&self, opts: FoldOptions) -> Vec<Vec<String>> {
        self.boxes
            .iter()
            .map(|b| b.axes.iter().map(|a| a.format(opts)).collect())
            .collect()
    }
}

fn cartesian(axes: &[RangeSet]) -> Box<dyn Iterator<Item = Vec<RangeToken>> + '_> {
    if axes.is_empty() {
        return Box::new(std::iter::once(Vec::new()));
    }
    let (first, rest) = axes.split_first().unwrap();
    let rest_iter: Vec<Vec<RangeToken>> = cartesian(rest).collect();
    Box::new(first.iter().flat_map(move |tok| {
        rest_iter.clone().into_iter().map(move |mut tail| {
            tail.insert(0, tok);
            tail
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(s: &str) -> RangeSet {
        RangeSet::parse(s).unwrap()
    }

    #[test]
    fn multidim_fold_matches_spec_scenario() {
        let a = RangeSetND::from_axes(vec![axis("1-10"), axis("1-44")]);
        let b = RangeSetND::from_axes(vec![axis("5-10"), axis("1-34")]);
        let fa = FoldAxis::declared_order(2);
        let diff = a.difference(&b, &fa);
        let mut formatted: Vec<String> = diff
            .format_axes(FoldOptions::none())
            .into_iter()
            .map(|axes| axes.join("-"))
            .collect();
        formatted.sort();
        let mut expected = vec!["1-4-1-44".to_string(), "5-10-35-44".to_string()];
        expected.sort();
        assert_eq!(formatted, expected);
    }

    #[test]
    fn length_additive_for_disjoint_union() {
        let a = RangeSetND::from_axes(vec![axis("1-3"), axis("1-3")]);
        let b = RangeSetND::from_axes(vec![axis("10-12"), axis("10-12")]);
        let fa = FoldAxis::declared_order(2);
        let u = a.union(&b, &fa);
        assert_eq!(u.length(), a.length() + b.length());
    }

    #[test]
    fn intersection_and_difference_partition_union() {
        let a = RangeSetND::from_axes(vec![axis("1-10"), axis("1-10")]);
        let b = RangeSetND::from_axes(vec![axis("5-15"), axis("5-15")]);
        let fa = FoldAxis::declared_order(2);
        let i = a.intersection(&b);
        let d_ab = a.difference(&b, &fa);
        let d_ba = b.difference(&a, &fa);
        assert_eq!(
            i.length() + d_ab.length() + d_ba.length(),
            a.union(&b, &fa).length()
        );
    }
}
