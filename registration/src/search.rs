//! Generic best-first branch-and-bound over a cell tessellation.
//!
//! The engine maximizes an objective it never sees directly: it only asks a
//! lower-bound and an upper-bound evaluator per cell. Cells are explored in
//! decreasing upper-bound order from a priority queue; a cell whose upper
//! bound cannot beat the best achieved lower bound is pruned. The search
//! terminates with a certificate when the frontier's best upper bound is
//! within `epsilon` of the best lower bound, or reports budget exhaustion
//! with the gap it reached.

use std::collections::BinaryHeap;

use log::{debug, trace};
use rayon::prelude::*;

use crate::bounds::{CellBound, CellLowerBound};
use crate::tessellation::{RotationCell, TranslationCell};
use crate::{Error, Result};

/// A searchable region of the domain.
pub trait SearchCell: Clone {
    /// Splits the cell into children that together cover it.
    fn subdivide(&self) -> Vec<Self>;
}

impl SearchCell for RotationCell {
    fn subdivide(&self) -> Vec<Self> {
        RotationCell::subdivide(self)
    }
}

impl SearchCell for TranslationCell {
    fn subdivide(&self) -> Vec<Self> {
        TranslationCell::subdivide(self)
    }
}

/// How a search run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// The gap between best lower bound and frontier upper bound closed to
    /// within the requested epsilon; the result is globally optimal up to
    /// that gap.
    Certified,
    /// The iteration budget ran out first; the result is the best found so
    /// far with the residual gap attached.
    BudgetExhausted,
}

impl SearchStatus {
    pub fn is_certified(&self) -> bool {
        matches!(self, SearchStatus::Certified)
    }
}

/// Result of one branch-and-bound run.
#[derive(Debug, Clone)]
pub struct SearchOutcome<C, T> {
    /// The cell whose achieved lower bound is the best found.
    pub cell: C,
    /// The concrete transform inside that cell which achieved `value`; this
    /// is the returned answer. It may be a cell vertex rather than the
    /// center, e.g. when the optimum sits on a tessellation boundary.
    pub transform: T,
    /// Best achieved objective value, `objective(transform)` exactly.
    pub value: f64,
    /// Best upper bound remaining on the frontier at termination.
    pub upper: f64,
    /// `upper - value`, clamped at zero.
    pub gap: f64,
    pub iterations: usize,
    pub status: SearchStatus,
}

struct Node<C> {
    cell: C,
    upper: f64,
    id: u64,
}

impl<C> PartialEq for Node<C> {
    fn eq(&self, other: &Self) -> bool {
        self.upper == other.upper && self.id == other.id
    }
}

impl<C> Eq for Node<C> {}

impl<C> PartialOrd for Node<C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Node<C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap by upper bound; ties break to the earlier insertion so
        // runs are fully deterministic.
        self.upper
            .total_cmp(&other.upper)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// The branch-and-bound engine, parameterized by the two bound evaluators.
pub struct BranchAndBound<'a, L, U> {
    lower: &'a L,
    upper: &'a U,
}

impl<'a, L, U> BranchAndBound<'a, L, U> {
    pub fn new(lower: &'a L, upper: &'a U) -> Self {
        Self { lower, upper }
    }

    /// Runs the search from an initial cell covering.
    ///
    /// `epsilon` is the absolute gap at which the result is certified;
    /// `max_iterations` bounds the number of cell subdivisions.
    pub fn run<C>(
        &self,
        cells: Vec<C>,
        epsilon: f64,
        max_iterations: usize,
    ) -> Result<SearchOutcome<C, L::Transform>>
    where
        C: SearchCell + Send + Sync,
        L: CellLowerBound<C> + Sync,
        L::Transform: Send,
        U: CellBound<C> + Sync,
    {
        if cells.is_empty() {
            return Err(Error::EmptyTessellation);
        }
        if !(epsilon > 0.0) || !epsilon.is_finite() {
            return Err(Error::InvalidInput(format!(
                "convergence epsilon {epsilon} must be positive and finite"
            )));
        }

        // Initial bound evaluation is the one embarrassingly parallel step;
        // order is preserved so node ids stay deterministic.
        let seeded: Vec<(C, f64, L::Transform, f64)> = cells
            .into_par_iter()
            .map(|cell| {
                let (lower, transform, upper) = self.bracket(&cell)?;
                Ok((cell, lower, transform, upper))
            })
            .collect::<Result<_>>()?;

        let mut heap = BinaryHeap::new();
        let mut next_id = 0u64;
        let mut best_value = f64::NEG_INFINITY;
        let mut best = None;
        for (cell, lower, transform, upper) in seeded {
            if lower > best_value {
                best_value = lower;
                best = Some((cell.clone(), transform));
            }
            heap.push(Node {
                cell,
                upper,
                id: next_id,
            });
            next_id += 1;
        }
        let (mut best_cell, mut best_transform) = match best {
            Some(found) => found,
            None => return Err(Error::EmptyTessellation),
        };

        let mut iterations = 0usize;
        let (status, frontier_upper) = loop {
            let Some(node) = heap.pop() else {
                // Every remaining cell was pruned; the best value is exact
                // up to the bound tolerance.
                break (SearchStatus::Certified, best_value);
            };
            if node.upper - best_value <= epsilon {
                break (SearchStatus::Certified, node.upper);
            }
            if iterations >= max_iterations {
                break (SearchStatus::BudgetExhausted, node.upper);
            }
            iterations += 1;
            trace!(
                "iteration {iterations}: frontier upper {:.6e}, best {:.6e}",
                node.upper,
                best_value
            );

            for child in node.cell.subdivide() {
                let (lower, transform, upper) = self.bracket(&child)?;
                // A child can never beat its parent's bound; clamping also
                // keeps the frontier monotone under loose child bounds.
                let upper = upper.min(node.upper);
                if lower > best_value {
                    best_value = lower;
                    best_cell = child.clone();
                    best_transform = transform;
                }
                if upper <= best_value {
                    continue;
                }
                heap.push(Node {
                    cell: child,
                    upper,
                    id: next_id,
                });
                next_id += 1;
            }
        };

        let gap = (frontier_upper - best_value).max(0.0);
        debug!(
            "search finished after {iterations} iterations: value {:.6e}, gap {:.3e}, {:?}",
            best_value, gap, status
        );
        Ok(SearchOutcome {
            cell: best_cell,
            transform: best_transform,
            value: best_value,
            upper: frontier_upper,
            gap,
            iterations,
            status,
        })
    }

    fn bracket<C>(&self, cell: &C) -> Result<(f64, L::Transform, f64)>
    where
        L: CellLowerBound<C>,
        U: CellBound<C>,
    {
        let (lower, transform) = self.lower.evaluate(cell);
        let upper = self.upper.evaluate(cell);
        if lower.is_nan() || upper.is_nan() {
            return Err(Error::NumericalDegeneracy(
                "bound evaluation produced NaN".into(),
            ));
        }
        // An overflowed (infinite) upper bound is admissible and resolves
        // once the cell is subdivided, but bounds below every value are not.
        if !lower.is_finite() || upper == f64::NEG_INFINITY {
            return Err(Error::NumericalDegeneracy(format!(
                "bound evaluation produced unusable bracket [{lower}, {upper}]"
            )));
        }
        if upper < lower - 1e-9 * (1.0 + lower.abs()) {
            return Err(Error::NumericalDegeneracy(format!(
                "bound inversion: lower {lower} exceeds upper {upper}"
            )));
        }
        Ok((lower, transform, upper))
    }
}
