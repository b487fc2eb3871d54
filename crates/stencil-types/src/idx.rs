// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Index Tuples
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Ordered dimension-name sequences and per-dimension integer tuples.
//!
//! Every tuple carries its dimension sequence; two tuples used in one
//! operation must agree on it. A mismatch is a programming error and
//! panics rather than returning a recoverable error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// An ordered, immutable sequence of dimension names, shared between all
/// tuples over the same dims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "Vec<String>", from = "Vec<String>")]
pub struct DimSet {
    names: Arc<[String]>,
}

impl DimSet {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        DimSet {
            names: names.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, i: usize) -> &str {
        &self.names[i]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Position of `name`, if present.
    pub fn posn(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.posn(name).is_some()
    }

    /// True when both sets hold the same names in the same order.
    /// Cheap pointer comparison first; most tuples share one `Arc`.
    pub fn same(&self, other: &DimSet) -> bool {
        Arc::ptr_eq(&self.names, &other.names) || self.names == other.names
    }
}

impl PartialEq for DimSet {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}
impl Eq for DimSet {}

impl From<DimSet> for Vec<String> {
    fn from(d: DimSet) -> Self {
        d.names.to_vec()
    }
}

impl From<Vec<String>> for DimSet {
    fn from(names: Vec<String>) -> Self {
        DimSet {
            names: names.into(),
        }
    }
}

/// An association of each dimension in a [`DimSet`] with a signed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<(String, i64)>", from = "Vec<(String, i64)>")]
pub struct IdxTuple {
    dims: DimSet,
    vals: Vec<i64>,
}

impl IdxTuple {
    /// All dims set to `val`.
    pub fn filled(dims: &DimSet, val: i64) -> Self {
        IdxTuple {
            dims: dims.clone(),
            vals: vec![val; dims.len()],
        }
    }

    pub fn new(dims: &DimSet, vals: Vec<i64>) -> Self {
        assert_eq!(
            dims.len(),
            vals.len(),
            "tuple value count {} does not match dim count {}",
            vals.len(),
            dims.len()
        );
        IdxTuple {
            dims: dims.clone(),
            vals,
        }
    }

    pub fn dims(&self) -> &DimSet {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    pub fn at(&self, i: usize) -> i64 {
        self.vals[i]
    }

    pub fn set_at(&mut self, i: usize, val: i64) {
        self.vals[i] = val;
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.dims.posn(name).map(|i| self.vals[i])
    }

    pub fn set(&mut self, name: &str, val: i64) -> bool {
        match self.dims.posn(name) {
            Some(i) => {
                self.vals[i] = val;
                true
            }
            None => false,
        }
    }

    pub fn vals(&self) -> &[i64] {
        &self.vals
    }

    /// Product of all elements.
    pub fn product(&self) -> i64 {
        self.vals.iter().product()
    }

    fn check_dims(&self, other: &IdxTuple, op: &str) {
        assert!(
            self.dims.same(&other.dims),
            "IdxTuple::{op}: dimension sequences differ ({self} vs {other})"
        );
    }

    fn zip_map(&self, other: &IdxTuple, op: &str, f: impl Fn(i64, i64) -> i64) -> IdxTuple {
        self.check_dims(other, op);
        let vals = self
            .vals
            .iter()
            .zip(other.vals.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        IdxTuple {
            dims: self.dims.clone(),
            vals,
        }
    }

    pub fn add(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    pub fn mul(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "mul", |a, b| a * b)
    }

    pub fn div(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "div", |a, b| {
            assert!(b != 0, "IdxTuple::div: divisor is zero");
            a / b
        })
    }

    pub fn rem(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "rem", |a, b| {
            assert!(b != 0, "IdxTuple::rem: divisor is zero");
            a % b
        })
    }

    pub fn min(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "min", i64::min)
    }

    pub fn max(&self, other: &IdxTuple) -> IdxTuple {
        self.zip_map(other, "max", i64::max)
    }

    pub fn scale(&self, k: i64) -> IdxTuple {
        IdxTuple {
            dims: self.dims.clone(),
            vals: self.vals.iter().map(|&v| v * k).collect(),
        }
    }

    /// Round each element up to the next multiple of the matching
    /// element in `mults` (which must all be positive).
    pub fn round_up_to(&self, mults: &IdxTuple) -> IdxTuple {
        self.zip_map(mults, "round_up_to", |v, m| round_up(v, m))
    }

    /// True when every element of `self` is `>=` the matching element.
    pub fn all_ge(&self, other: &IdxTuple) -> bool {
        self.check_dims(other, "all_ge");
        self.vals
            .iter()
            .zip(other.vals.iter())
            .all(|(&a, &b)| a >= b)
    }
}

impl From<IdxTuple> for Vec<(String, i64)> {
    fn from(t: IdxTuple) -> Self {
        t.dims
            .names()
            .map(String::from)
            .zip(t.vals.iter().copied())
            .collect()
    }
}

impl From<Vec<(String, i64)>> for IdxTuple {
    fn from(pairs: Vec<(String, i64)>) -> Self {
        let (names, vals): (Vec<String>, Vec<i64>) = pairs.into_iter().unzip();
        IdxTuple {
            dims: DimSet::new(names),
            vals,
        }
    }
}

impl fmt::Display for IdxTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, val)) in self.dims.names().zip(self.vals.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={val}")?;
        }
        Ok(())
    }
}

/// Round `val` up to the next multiple of `mult` (toward `+inf`).
pub fn round_up(val: i64, mult: i64) -> i64 {
    assert!(mult > 0, "round_up: multiple must be positive, got {mult}");
    let rem = val.rem_euclid(mult);
    if rem == 0 {
        val
    } else {
        val + (mult - rem)
    }
}

/// Ceiling division for positive divisors.
pub fn ceil_div(val: i64, div: i64) -> i64 {
    assert!(div > 0, "ceil_div: divisor must be positive, got {div}");
    round_up(val, div) / div
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz() -> DimSet {
        DimSet::new(["x", "y", "z"])
    }

    #[test]
    fn test_elementwise_ops() {
        let d = xyz();
        let a = IdxTuple::new(&d, vec![4, 6, 8]);
        let b = IdxTuple::new(&d, vec![1, 2, 3]);
        assert_eq!(a.add(&b).vals(), &[5, 8, 11]);
        assert_eq!(a.sub(&b).vals(), &[3, 4, 5]);
        assert_eq!(a.mul(&b).vals(), &[4, 12, 24]);
        assert_eq!(a.div(&b).vals(), &[4, 3, 2]);
        assert_eq!(a.rem(&b).vals(), &[0, 0, 2]);
        assert_eq!(a.min(&b).vals(), &[1, 2, 3]);
        assert_eq!(a.max(&b).vals(), &[4, 6, 8]);
        assert_eq!(a.product(), 192);
    }

    #[test]
    fn test_get_set_by_name() {
        let mut t = IdxTuple::filled(&xyz(), 0);
        assert!(t.set("y", 7));
        assert!(!t.set("w", 1));
        assert_eq!(t.get("y"), Some(7));
        assert_eq!(t.get("w"), None);
    }

    #[test]
    #[should_panic(expected = "dimension sequences differ")]
    fn test_dim_mismatch_panics() {
        let a = IdxTuple::filled(&xyz(), 1);
        let b = IdxTuple::filled(&DimSet::new(["x", "y"]), 1);
        let _ = a.add(&b);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(-3, 8), 0);
        assert_eq!(round_up(-9, 8), -8);
        let d = xyz();
        let t = IdxTuple::new(&d, vec![5, 16, 17]);
        let m = IdxTuple::new(&d, vec![8, 8, 8]);
        assert_eq!(t.round_up_to(&m).vals(), &[8, 16, 24]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let t = IdxTuple::new(&xyz(), vec![10, 20, 30]);
        let json = serde_json::to_string(&t).expect("serialize");
        let t2: IdxTuple = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(t, t2);
    }
}
