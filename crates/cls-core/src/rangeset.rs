//! `RangeSet`: a compact, sorted, pad-aware set of integer index tokens
//! (spec §3 "RangeSet", §4.1).

use std::collections::BTreeSet;
use std::fmt;

use crate::error::RangeSetParseError;

/// One stored element: a value together with the zero-padding width used
/// when it was written (`0` means unpadded).
///
/// `Ord` is value-major, pad-width-minor, matching the §3 invariant that
/// `iter()` is "strictly increasing by value then by pad-width ascending".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RangeToken {
    pub value: u64,
    pub pad: u8,
}

impl RangeToken {
    pub fn new(value: u64, pad: u8) -> Self {
        Self { value, pad }
    }

    /// Render this token using its own pad width.
    pub fn format(&self) -> String {
        if self.pad == 0 {
            self.value.to_string()
        } else {
            format!("{:0width$}", self.value, width = self.pad as usize)
        }
    }
}

impl PartialOrd for RangeToken {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RangeToken {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value).then(self.pad.cmp(&other.pad))
    }
}

/// Options governing `RangeSet::format`.
///
/// `autostep` is the minimum run length (or, via `autostep_percent`, a
/// percentage of the set's size rounded with `ceil`) before a
/// constant-stride run is folded as `a-b/step` instead of spelled out
/// comma-separated or absorbed into a contiguous run.
#[derive(Clone, Copy, Debug, Default)]
pub struct FoldOptions {
    pub autostep: Option<u32>,
}

impl FoldOptions {
    pub fn none() -> Self {
        Self { autostep: None }
    }

    pub fn threshold(n: u32) -> Self {
        Self { autostep: Some(n) }
    }

    /// `ceil(count * p)`, the open question pinned in `DESIGN.md`.
    pub fn percent(count: usize, p: f64) -> Self {
        Self {
            autostep: Some((count as f64 * p).ceil() as u32),
        }
    }
}

/// A sorted set of `(value, pad-width)` tokens (spec §3).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RangeSet {
    tokens: BTreeSet<RangeToken>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self {
            tokens: BTreeSet::new(),
        }
    }

    pub fn from_tokens(tokens: impl IntoIterator<Item = RangeToken>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Parse `"a"`, `"a-b"`, `"a-b/step"` clauses joined by `,`.
    pub fn parse(text: &str) -> Result<Self, RangeSetParseError> {
        let mut set = Self::new();
        for clause in text.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            set.tokens.extend(parse_clause(clause)?);
        }
        Ok(set)
    }

    pub fn contains(&self, value: u64) -> bool {
        self.tokens.iter().any(|t| t.value == value)
    }

    pub fn contains_token(&self, token: RangeToken) -> bool {
        self.tokens.contains(&token)
    }

    pub fn iter(&self) -> impl Iterator<Item = RangeToken> + '_ {
        self.tokens.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            tokens: self.tokens.union(&other.tokens).copied().collect(),
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            tokens: self.tokens.intersection(&other.tokens).copied().collect(),
        }
    }

    pub fn difference(&self, other: &Self) -> Self {
        Self {
            tokens: self.tokens.difference(&other.tokens).copied().collect(),
        }
    }

    pub fn symmetric_difference(&self, other: &Self) -> Self {
        Self {
            tokens: self
                .tokens
                .symmetric_difference(&other.tokens)
                .copied()
                .collect(),
        }
    }

    pub fn union_with(&mut self, other: &Self) {
        self.tokens.extend(other.tokens.iter().copied());
    }

    pub fn intersect_with(&mut self, other: &Self) {
        self.tokens.retain(|t| other.tokens.contains(t));
    }

    pub fn difference_with(&mut self, other: &Self) {
        for t in &other.tokens {
            self.tokens.remove(t);
        }
    }

    pub fn symmetric_difference_with(&mut self, other: &Self) {
        let result = self.symmetric_difference(other);
        self.tokens = result.tokens;
    }

    /// `true` iff folding this set yields a single `a-b` (or single value)
    /// run with no pad-width split and no comma.
    pub fn contiguous(&self) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        let first_pad = self.tokens.iter().next().unwrap().pad;
        if self.tokens.iter().any(|t| t.pad != first_pad) {
            return false;
        }
        let mut expected = None;
        for t in &self.tokens {
            if let Some(e) = expected {
                if t.value != e {
                    return false;
                }
            }
            expected = Some(t.value + 1);
        }
        true
    }

    /// First `n` elements in iteration order (a deterministic prefix
    /// sample, spec §4.1 `pick`, elaborated in `SPEC_FULL.md` §C.1).
    pub fn pick(&self, n: usize) -> Self {
        Self {
            tokens: self.tokens.iter().take(n).copied().collect(),
        }
    }

    /// The sub-set of tokens whose iteration-order index falls in `range`
    /// (spec §4.1 `slice`). Out-of-bounds endpoints are clamped rather
    /// than panicking, matching `pick`'s tolerance of `n > len()`.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        let len = self.tokens.len();
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        Self {
            tokens: self.tokens.iter().skip(start).take(end - start).copied().collect(),
        }
    }

    /// Split into `n` near-equal-size `RangeSet`s preserving order.
    pub fn split(&self, n: usize) -> Vec<Self> {
        if n == 0 {
            return vec![];
        }
        let all: Vec<RangeToken> = self.tokens.iter().copied().collect();
        let mut parts = Vec::with_capacity(n);
        let base = all.len() / n;
        let rem = all.len() % n;
        let mut idx = 0;
        for i in 0..n {
            let take = base + if i < rem { 1 } else { 0 };
            parts.push(Self::from_tokens(all[idx..idx + take].iter().copied()));
            idx += take;
        }
        parts
    }

    /// Fold into the compact textual form (spec §4.1 algorithm).
    pub fn format(&self, opts: FoldOptions) -> String {
        if self.tokens.is_empty() {
            return String::new();
        }
        // Step 1: group by pad-width, ascending, unpadded (0) first.
        let mut by_pad: std::collections::BTreeMap<u8, Vec<u64>> = std::collections::BTreeMap::new();
        for t in &self.tokens {
            by_pad.entry(t.pad).or_default().push(t.value);
        }

        let mut groups = Vec::new();
        for (pad, mut values) in by_pad {
            values.sort_unstable();
            values.dedup();
            groups.push(fold_group(&values, pad, opts));
        }
        groups.join(",")
    }
}

/// Fold one pad-width group's sorted, deduplicated values into comma
/// clauses, honoring autostep (spec §4.1 steps 2-3).
fn fold_group(values: &[u64], pad: u8, opts: FoldOptions) -> String {
    let mut out = Vec::new();
    let mut i = 0;
    while i < values.len() {
        // Try to extend a maximal contiguous run first.
        let mut j = i;
        while j + 1 < values.len() && values[j + 1] == values[j] + 1 {
            j += 1;
        }
        let contiguous_len = j - i + 1;

        // Try autostep: the longest equally-spaced run starting at i with
        // a constant, non-unit stride, at least as long as the threshold.
        // "always prefer the leftmost maximal step-run" and it must never
        // overlap a previously emitted range, so we only consider a
        // step-run when it is not already fully covered by the
        // contiguous run above (step == 1 degenerates to contiguous).
        let mut best_step = None;
        if let Some(threshold) = opts.autostep {
            if threshold >= 1 {
                for step in 2..=max_sane_step(values, i) {
                    let run_end = longest_stepped_run(values, i, step);
                    let run_len = run_end - i + 1;
                    if run_len as u32 >= threshold && run_len > contiguous_len {
                        best_step = Some((step, run_end));
                        break;
                    }
                }
            }
        }

        if let Some((step, run_end)) = best_step {
            out.push(format_run(values[i], values[run_end], pad, Some(step)));
            i = run_end + 1;
        } else if contiguous_len >= 2 {
            out.push(format_run(values[i], values[j], pad, None));
            i = j + 1;
        } else {
            out.push(RangeToken::new(values[i], pad).format());
            i += 1;
        }
    }
    out.join(",")
}

fn max_sane_step(values: &[u64], start: usize) -> u64 {
    // No point testing a stride larger than the remaining span.
    let remaining = values.len() - start;
    remaining as u64
}

fn longest_stepped_run(values: &[u64], start: usize, step: u64) -> usize {
    let mut end = start;
    while end + 1 < values.len() && values[end + 1] == values[end] + step {
        end += 1;
    }
    end
}

fn format_run(a: u64, b: u64, pad: u8, step: Option<u64>) -> String {
    let fa = RangeToken::new(a, pad).format();
    if a == b {
        return fa;
    }
    let fb = RangeToken::new(b, pad).format();
    match step {
        Some(s) if s > 1 => format!("{fa}-{fb}/{s}"),
        _ => format!("{fa}-{fb}"),
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(FoldOptions::none()))
    }
}

fn parse_pad(text: &str) -> Result<(u64, u8), RangeSetParseError> {
    if text.is_empty() {
        return Err(RangeSetParseError::InvalidSyntax(text.to_string()));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeSetParseError::InvalidSyntax(text.to_string()));
    }
    let value: u64 = text
        .parse()
        .map_err(|_| RangeSetParseError::Overflow(text.to_string()))?;
    let pad = if text.len() > 1 && text.starts_with('0') {
        text.len() as u8
    } else {
        0
    };
    Ok((value, pad))
}

fn parse_clause(clause: &str) -> Result<Vec<RangeToken>, RangeSetParseError> {
    let (range_part, step) = match clause.split_once('/') {
        Some((r, s)) => {
            let step: u64 = s
                .parse()
                .map_err(|_| RangeSetParseError::InvalidSyntax(clause.to_string()))?;
            if step == 0 {
                return Err(RangeSetParseError::ZeroStep(clause.to_string()));
            }
            (r, Some(step))
        }
        None => (clause, None),
    };

    match range_part.split_once('-') {
        None => {
            if step.is_some() {
                return Err(RangeSetParseError::TrailingDigitsWithStep(clause.to_string()));
            }
            let (value, pad) = parse_pad(range_part)?;
            Ok(vec![RangeToken::new(value, pad)])
        }
        Some((a, b)) => {
            let (va, pa) = parse_pad(a)?;
            let (vb, pb) = parse_pad(b)?;
            if va > vb {
                return Err(RangeSetParseError::EmptyRange(va, vb));
            }
            match step {
                Some(s) => {
                    if pa != 0 && pb != 0 && pa != pb {
                        return Err(RangeSetParseError::MixedPadWidth(
                            a.to_string(),
                            pa,
                            b.to_string(),
                            pb,
                        ));
                    }
                    let pad = pa.max(pb);
                    let mut v = va;
                    let mut out = Vec::new();
                    while v <= vb {
                        out.push(RangeToken::new(v, pad));
                        v += s;
                    }
                    Ok(out)
                }
                None => {
                    let pad = pa.max(pb);
                    Ok((va..=vb).map(|v| RangeToken::new(v, pad)).collect())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_expand_roundtrip() {
        let s = RangeSet::parse("1,2,3,5").unwrap();
        assert_eq!(s.format(FoldOptions::none()), "1-3,5");
        let values: Vec<u64> = s.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![1, 2, 3, 5]);
    }

    #[test]
    fn mixed_padding_groups_by_width_unpadded_first() {
        let s = RangeSet::from_tokens([
            RangeToken::new(2, 0),
            RangeToken::new(1, 2),
            RangeToken::new(1, 3),
        ]);
        assert_eq!(s.format(FoldOptions::none()), "2,01,001");
    }

    #[test]
    fn autostep_does_not_overlap_contiguous_prefix() {
        let s = RangeSet::parse("1,2,3,5,7,9").unwrap();
        assert_eq!(s.format(FoldOptions::threshold(3)), "1-3,5-9/2");
    }

    #[test]
    fn stepped_range_allows_equal_nonzero_pad_widths() {
        let s = RangeSet::parse("005-010/2").unwrap();
        let values: Vec<u64> = s.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![5, 7, 9]);
        assert_eq!(s.format(FoldOptions::threshold(3)), "005-009/2");
    }

    #[test]
    fn stepped_range_rejects_mixed_pad_widths() {
        let err = RangeSet::parse("5-010/2").unwrap_err();
        assert!(matches!(err, RangeSetParseError::MixedPadWidth(..)));
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(matches!(
            RangeSet::parse("5-3"),
            Err(RangeSetParseError::EmptyRange(5, 3))
        ));
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(matches!(
            RangeSet::parse("1-5/0"),
            Err(RangeSetParseError::ZeroStep(_))
        ));
    }

    #[test]
    fn set_algebra_disjointness() {
        let a = RangeSet::parse("1-5").unwrap();
        let b = RangeSet::parse("3-8").unwrap();
        let diff_ab = a.difference(&b);
        let diff_ba = b.difference(&a);
        assert!(diff_ab.intersection(&diff_ba).is_empty());
        let sym = a.symmetric_difference(&b);
        let via_union_minus_inter = a.union(&b).difference(&a.intersection(&b));
        assert_eq!(sym, via_union_minus_inter);
    }

    #[test]
    fn contiguous_predicate() {
        assert!(RangeSet::parse("1-5").unwrap().contiguous());
        assert!(!RangeSet::parse("1-5,7").unwrap().contiguous());
    }

    #[test]
    fn split_preserves_total_and_balances() {
        let s = RangeSet::parse("1-10").unwrap();
        let parts = s.split(3);
        let total: usize = parts.iter().map(|p| p.len()).sum();
        assert_eq!(total, 10);
        let lens: Vec<usize> = parts.iter().map(|p| p.len()).collect();
        assert!(lens.iter().max().unwrap() - lens.iter().min().unwrap() <= 1);
    }

    #[test]
    fn slice_selects_by_iteration_order_index() {
        let s = RangeSet::parse("1-10").unwrap();
        let middle = s.slice(2..5);
        let values: Vec<u64> = middle.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![3, 4, 5]);
    }

    #[test]
    fn slice_clamps_out_of_bounds_endpoints() {
        let s = RangeSet::parse("1-3").unwrap();
        assert_eq!(s.slice(1..100).len(), 2);
        assert_eq!(s.slice(100..200).len(), 0);
        assert_eq!(s.slice(5..1).len(), 0);
    }
}
