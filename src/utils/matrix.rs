//! Dense boolean matrices for reachability queries.
//!
//! Rows are [`FixedBitSet`]s so that closing a relation under transitivity
//! is a sequence of word-wide unions.

use fixedbitset::FixedBitSet;
use std::fmt;

/// A square boolean matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMatrix {
    rows: Vec<FixedBitSet>,
}

impl BitMatrix {
    /// Create an `n x n` matrix with every entry cleared.
    pub fn new(n: usize) -> Self {
        Self { rows: vec![FixedBitSet::with_capacity(n); n] }
    }

    /// Create the identity relation.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::new(n);
        for i in 0..n {
            m.set(i, i);
        }
        m
    }

    /// Side length of the matrix.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Set entry `(row, col)`. Out-of-range coordinates are ignored.
    pub fn set(&mut self, row: usize, col: usize) {
        if let Some(r) = self.rows.get_mut(row) {
            if col < r.len() {
                r.insert(col);
            }
        }
    }

    /// Read entry `(row, col)`; out of range reads as `false`.
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.rows.get(row).map_or(false, |r| r.contains(col))
    }

    pub fn row(&self, row: usize) -> Option<&FixedBitSet> {
        self.rows.get(row)
    }

    /// Number of set entries.
    pub fn count_ones(&self) -> usize {
        self.rows.iter().map(|r| r.count_ones(..)).sum()
    }

    /// Close the relation under transitivity (Warshall).
    ///
    /// After the call, `get(i, j)` holds iff there is a non-empty path
    /// from `i` to `j` in the original relation.
    pub fn transitive_closure(&mut self) {
        for k in 0..self.rows.len() {
            let through = self.rows[k].clone();
            for i in 0..self.rows.len() {
                if self.rows[i].contains(k) {
                    self.rows[i].union_with(&through);
                }
            }
        }
    }

    /// Check if any entry on the diagonal is set.
    pub fn has_reflexive_entry(&self) -> bool {
        (0..self.rows.len()).any(|i| self.get(i, i))
    }
}

impl fmt::Display for BitMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            for j in 0..row.len() {
                write!(f, "{}", if row.contains(j) { '1' } else { '.' })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut m = BitMatrix::new(3);
        m.set(0, 2);
        assert!(m.get(0, 2));
        assert!(!m.get(2, 0));
        assert!(!m.get(7, 7));
        assert_eq!(m.count_ones(), 1);
    }

    #[test]
    fn test_transitive_closure_chain() {
        let mut m = BitMatrix::new(4);
        m.set(0, 1);
        m.set(1, 2);
        m.set(2, 3);
        m.transitive_closure();
        assert!(m.get(0, 3));
        assert!(m.get(1, 3));
        assert!(!m.get(3, 0));
        assert!(!m.has_reflexive_entry());
    }

    #[test]
    fn test_closure_exposes_cycle() {
        let mut m = BitMatrix::new(2);
        m.set(0, 1);
        m.set(1, 0);
        m.transitive_closure();
        assert!(m.has_reflexive_entry());
    }

    #[test]
    fn test_display() {
        let m = BitMatrix::identity(2);
        assert_eq!(m.to_string(), "1.\n.1\n");
    }
}
