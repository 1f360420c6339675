use ndarray::ArrayView2;
use numpy::PyReadonlyArray2;
use pyo3::prelude::*;

use crate::error::ProfileError;
use crate::index_functions::RadialIndexTable;
use crate::profile_functions::{check_radius, radial_profile_internal, ProfileTotals};

/// CCD photon-noise model for the weighted asymmetry score.
#[derive(Debug, Clone, Copy)]
pub struct CcdNoiseModel {
    /// Read noise in electrons.
    pub read_noise: f64,
    /// Inverse gain in electrons per ADU.
    pub ccd_gain: f64,
    /// Bias in ADU.
    pub bias: f64,
}

/// Radial asymmetry of one scan window, together with the same totals the
/// underlying profile reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsymmetryResult {
    pub asymm: f64,
    pub counts: f64,
    pub points: i64,
}

impl AsymmetryResult {
    fn empty() -> Self {
        Self {
            asymm: 0.0,
            counts: 0.0,
            points: 0,
        }
    }
}

/// Reusable mean/variance/count working arrays for the asymmetry scorers.
///
/// Centroiding walks re-evaluate the asymmetry many times at the same radius,
/// so the buffers grow to the largest radius seen and are then reused in
/// place; they never shrink.
#[derive(Debug, Default)]
struct ScratchBuffers {
    mean: Vec<f64>,
    var: Vec<f64>,
    n_pts: Vec<i32>,
}

impl ScratchBuffers {
    /// Guarantees all three buffers hold at least `n_elt` elements. On any
    /// allocation failure every buffer is released and capacity drops to 0.
    fn ensure_capacity(&mut self, n_elt: usize) -> Result<(), ProfileError> {
        if self.mean.len() >= n_elt {
            return Ok(());
        }

        self.release();
        let mut mean = Vec::new();
        let mut var = Vec::new();
        let mut n_pts = Vec::new();
        if mean.try_reserve_exact(n_elt).is_err()
            || var.try_reserve_exact(n_elt).is_err()
            || n_pts.try_reserve_exact(n_elt).is_err()
        {
            return Err(ProfileError::OutOfMemory { elements: n_elt });
        }
        mean.resize(n_elt, 0.0);
        var.resize(n_elt, 0.0);
        n_pts.resize(n_elt, 0);

        self.mean = mean;
        self.var = var;
        self.n_pts = n_pts;
        Ok(())
    }

    fn release(&mut self) {
        self.mean = Vec::new();
        self.var = Vec::new();
        self.n_pts = Vec::new();
    }

    fn len(&self) -> usize {
        self.mean.len()
    }

    fn split_mut(&mut self, n_elt: usize) -> (&mut [f64], &mut [f64], &mut [i32]) {
        (
            &mut self.mean[..n_elt],
            &mut self.var[..n_elt],
            &mut self.n_pts[..n_elt],
        )
    }
}

/// Owns the caches the profiling operations reuse across calls: the radial
/// index table and the scorers' scratch buffers.
///
/// The core keeps no global state; every operation goes through a profiler
/// value, so tests isolate state with a fresh one and the bindings serialize
/// access to a single shared instance behind a mutex.
#[derive(Debug, Default)]
pub struct RadialProfiler {
    table: RadialIndexTable,
    scratch: ScratchBuffers,
}

impl RadialProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_table_mut(&mut self) -> &mut RadialIndexTable {
        &mut self.table
    }

    /// Current scratch capacity high-water mark, in elements per buffer.
    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    /// Current index-table capacity high-water mark.
    pub fn index_table_len(&self) -> usize {
        self.table.len()
    }

    /// Radial asymmetry: the sum over all bins of `variance * count`.
    ///
    /// A window with no accumulated points yields all-zero results without
    /// attempting normalization.
    pub fn asymmetry(
        &mut self,
        data: ArrayView2<'_, f32>,
        mask: Option<ArrayView2<'_, bool>>,
        ctr: (i64, i64),
        rad: i64,
    ) -> Result<AsymmetryResult, ProfileError> {
        let (totals, _, var, n_pts) = self.profile_into_scratch(data, mask, ctr, rad)?;
        if totals.points == 0 {
            return Ok(AsymmetryResult::empty());
        }

        let asymm = var
            .iter()
            .zip(n_pts.iter())
            .map(|(&var, &n)| var * f64::from(n))
            .sum();
        Ok(AsymmetryResult {
            asymm,
            counts: totals.counts,
            points: totals.points,
        })
    }

    /// Radial asymmetry weighted by the expected per-bin measurement noise:
    ///
    /// ```text
    /// pix_noise_sq(bin) = (read_noise / ccd_gain)^2 + (mean(bin) - bias) / ccd_gain
    /// weight(bin)       = sqrt(2 * (n(bin) - 1)) * pix_noise_sq(bin) / n(bin)
    /// asymm             = sum over bins with n > 1 of var(bin) / weight(bin)
    /// ```
    ///
    /// Bins with fewer than two points contribute nothing to the sum, though
    /// their pixels still count toward the returned totals. A `bias` above
    /// the dimmest populated bin's mean is clamped down to that mean, so a
    /// miscalibrated bias cannot drive the noise estimate negative; an
    /// abnormally low bias is passed through untouched.
    pub fn weighted_asymmetry(
        &mut self,
        data: ArrayView2<'_, f32>,
        mask: Option<ArrayView2<'_, bool>>,
        ctr: (i64, i64),
        rad: i64,
        noise: &CcdNoiseModel,
    ) -> Result<AsymmetryResult, ProfileError> {
        if !(noise.ccd_gain > 0.0) {
            return Err(ProfileError::InvalidArgument(format!(
                "ccd_gain={} must be positive",
                noise.ccd_gain
            )));
        }

        let (totals, mean, var, n_pts) = self.profile_into_scratch(data, mask, ctr, rad)?;
        if totals.points == 0 {
            return Ok(AsymmetryResult::empty());
        }

        let min_mean = mean
            .iter()
            .zip(n_pts.iter())
            .filter(|&(_, &n)| n > 0)
            .map(|(&mean, _)| mean)
            .fold(f64::INFINITY, f64::min);
        let bias = noise.bias.min(min_mean);

        let read_noise_sq_adu = (noise.read_noise / noise.ccd_gain).powi(2);
        let mut asymm = 0.0;
        for ((&mean, &var), &n) in mean.iter().zip(var.iter()).zip(n_pts.iter()) {
            if n > 1 {
                let pix_noise_sq = read_noise_sq_adu + (mean - bias) / noise.ccd_gain;
                let weight = (2.0 * f64::from(n - 1)).sqrt() * pix_noise_sq / f64::from(n);
                asymm += var / weight;
            }
        }

        Ok(AsymmetryResult {
            asymm,
            counts: totals.counts,
            points: totals.points,
        })
    }

    /// Runs the indexed binner into the scratch buffers sized to `rad + 2`.
    fn profile_into_scratch(
        &mut self,
        data: ArrayView2<'_, f32>,
        mask: Option<ArrayView2<'_, bool>>,
        ctr: (i64, i64),
        rad: i64,
    ) -> Result<(ProfileTotals, &[f64], &[f64], &[i32]), ProfileError> {
        let rad = check_radius(rad)?;
        let n_elt = (rad + 2) as usize;
        self.scratch.ensure_capacity(n_elt)?;

        let Self { table, scratch } = self;
        let (mean, var, n_pts) = scratch.split_mut(n_elt);
        let totals = radial_profile_internal(data, mask, ctr, rad, table, mean, var, n_pts)?;
        Ok((totals, &*mean, &*var, &*n_pts))
    }
}

/// Compute a measure of radial asymmetry: the sum over radial index of
/// `var * n_pts`.
///
/// # Arguments
/// * `data` - 2-d image array `[row, col]`.
/// * `mask` - Optional mask of the same shape; `True` marks pixels to ignore.
/// * `ctr` - `(row, col)` center of the scan; it need not be on the array.
/// * `rad` - Radius of the scan.
///
/// # Returns
/// An `(asymm, tot_counts, tot_pts)` tuple.
#[pyfunction]
pub fn radial_asymmetry(
    data: PyReadonlyArray2<'_, f32>,
    mask: Option<PyReadonlyArray2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
) -> PyResult<(f64, f64, i64)> {
    let data = data.as_array();
    let mask = mask.as_ref().map(|mask| mask.as_array());

    let mut profiler = crate::shared_profiler();
    let result = profiler.asymmetry(data, mask, ctr, rad)?;
    Ok((result.asymm, result.counts, result.points))
}

/// Compute a measure of radial asymmetry weighted by expected pixel noise.
///
/// # Arguments
/// * `data` - 2-d image array `[row, col]`.
/// * `mask` - Optional mask of the same shape; `True` marks pixels to ignore.
/// * `ctr` - `(row, col)` center of the scan; it need not be on the array.
/// * `rad` - Radius of the scan.
/// * `bias` - CCD bias in ADU.
/// * `read_noise` - CCD read noise in electrons.
/// * `ccd_gain` - CCD inverse gain in electrons per ADU.
///
/// # Returns
/// An `(asymm, tot_counts, tot_pts)` tuple.
#[pyfunction]
pub fn radial_asymmetry_weighted(
    data: PyReadonlyArray2<'_, f32>,
    mask: Option<PyReadonlyArray2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
    bias: f64,
    read_noise: f64,
    ccd_gain: f64,
) -> PyResult<(f64, f64, i64)> {
    let data = data.as_array();
    let mask = mask.as_ref().map(|mask| mask.as_array());
    let noise = CcdNoiseModel {
        read_noise,
        ccd_gain,
        bias,
    };

    let mut profiler = crate::shared_profiler();
    let result = profiler.weighted_asymmetry(data, mask, ctr, rad, &noise)?;
    Ok((result.asymm, result.counts, result.points))
}
