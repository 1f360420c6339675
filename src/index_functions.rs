use itertools::Itertools;
use numpy::PyArray1;
use pyo3::prelude::*;

use crate::error::ProfileError;

/// Smallest table the growth routine will build; three entries cover the
/// special-cased radial indices 0, 1 and 2.
const MIN_TABLE_LEN: usize = 3;

/// Radial index of a single squared radius (Mirage convention): 0, 1, 2 for
/// the three innermost annuli, then `floor(sqrt(rad_sq) + 1.5)`. Coarser near
/// the center so that the low-count inner bins stay statistically meaningful.
/// For exact radii this means `radial_index(rad * rad) == rad + 1` when
/// `rad > 1`.
#[inline]
fn radial_index(rad_sq: usize) -> i64 {
    if rad_sq < MIN_TABLE_LEN {
        rad_sq as i64
    } else {
        ((rad_sq as f64).sqrt() + 1.5).floor() as i64
    }
}

/// Growable cache mapping squared radius to radial index.
///
/// The mapping is radius-independent, so growth only ever appends: existing
/// entries stay valid for the life of the table and a table that is already
/// large enough is reused as-is.
#[derive(Debug, Default)]
pub struct RadialIndexTable {
    table: Vec<i64>,
}

impl RadialIndexTable {
    pub fn new() -> Self {
        Self { table: Vec::new() }
    }

    /// Number of valid entries (the capacity high-water mark).
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Guarantees at least `max(max_rad_sq + 1, 3)` valid entries.
    ///
    /// A no-op when the table is already large enough. Growth rebuilds the
    /// table from scratch up to the new size; on allocation failure the table
    /// is left empty, so callers must re-establish capacity before reuse.
    pub fn ensure_capacity(&mut self, max_rad_sq: usize) -> Result<(), ProfileError> {
        let n_elt = (max_rad_sq + 1).max(MIN_TABLE_LEN);
        if self.table.len() >= n_elt {
            return Ok(());
        }

        self.table = Vec::new();
        let mut fresh = Vec::new();
        if fresh.try_reserve_exact(n_elt).is_err() {
            return Err(ProfileError::OutOfMemory { elements: n_elt });
        }
        fresh.extend((0..n_elt).map(radial_index));
        self.table = fresh;
        Ok(())
    }

    /// Radial index for `rad_sq`. Defined only for entries within the current
    /// capacity; call [`ensure_capacity`](Self::ensure_capacity) first.
    #[inline]
    pub fn lookup(&self, rad_sq: usize) -> i64 {
        self.table[rad_sq]
    }

    /// First `n_elt` entries, growing the table if needed.
    pub fn prefix(&mut self, n_elt: usize) -> Result<&[i64], ProfileError> {
        if n_elt > 0 {
            self.ensure_capacity(n_elt - 1)?;
        }
        Ok(&self.table[..n_elt])
    }
}

/// Squared radius at each radial index: the inverse of the index table on
/// exact radii (`0, 1, 2, (ind - 1)^2` for `ind > 2`).
pub fn squared_radius_table_internal(n_elt: usize) -> Vec<i64> {
    (0..n_elt)
        .map(|rad_ind| {
            if rad_ind < MIN_TABLE_LEN {
                rad_ind as i64
            } else {
                ((rad_ind - 1) * (rad_ind - 1)) as i64
            }
        })
        .collect_vec()
}

/// Return radial index, indexed by radius squared.
///
/// # Arguments
/// * `n_elt` - Desired number of elements in the returned array.
///
/// # Returns
/// A NumPy array of `n_elt` radial indices, served from the process-wide
/// index cache (which grows as a side effect if it was smaller).
#[pyfunction]
pub fn radial_index_table(py: Python<'_>, n_elt: i64) -> PyResult<Bound<'_, PyArray1<i64>>> {
    if n_elt < 0 {
        return Err(
            ProfileError::InvalidArgument(format!("n_elt={n_elt} must be non-negative")).into(),
        );
    }
    let mut profiler = crate::shared_profiler();
    let prefix = profiler.index_table_mut().prefix(n_elt as usize)?;
    Ok(PyArray1::from_slice(py, prefix))
}

/// Return radius squared, indexed by radial index.
///
/// # Arguments
/// * `n_elt` - Desired number of elements in the returned array.
///
/// # Returns
/// A NumPy array of `n_elt` squared radii.
#[pyfunction]
pub fn squared_radius_table(py: Python<'_>, n_elt: i64) -> PyResult<Bound<'_, PyArray1<i64>>> {
    if n_elt < 0 {
        return Err(
            ProfileError::InvalidArgument(format!("n_elt={n_elt} must be non-negative")).into(),
        );
    }
    Ok(PyArray1::from_vec(
        py,
        squared_radius_table_internal(n_elt as usize),
    ))
}
