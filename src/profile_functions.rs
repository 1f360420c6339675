//! Radial profile extraction: per-annulus mean, variance and point count
//! around an integer center, either binned by radial index (a compressed
//! approximation of radius) or directly by squared radius.
//!
//! The scan window is the axis-aligned square of half-width `rad` around the
//! center, clipped to the array bounds, so the center may lie off the array
//! and only in-bounds pixels are counted.

use ndarray::ArrayView2;
use numpy::{PyReadonlyArray2, PyReadwriteArray1};
use pyo3::{exceptions::PyValueError, prelude::*};

use crate::error::ProfileError;
use crate::index_functions::RadialIndexTable;

/// Totals accumulated over one scan window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileTotals {
    /// Sum of all accumulated sample values, kept in floating point to avoid
    /// overflow on large frames.
    pub counts: f64,
    /// Number of accumulated points.
    pub points: i64,
}

pub(crate) fn check_radius(rad: i64) -> Result<i64, ProfileError> {
    if rad < 0 {
        return Err(ProfileError::InvalidArgument(format!(
            "rad={rad} must be non-negative"
        )));
    }
    Ok(rad)
}

/// Rejects output buffers that disagree in length or are shorter than the
/// profile requires, before anything is written to them.
fn check_output_len(
    required_len: usize,
    mean: &[f64],
    var: &[f64],
    n_pts: &[i32],
) -> Result<(), ProfileError> {
    let out_len = mean.len();
    if var.len() != out_len || n_pts.len() != out_len {
        return Err(ProfileError::InvalidArgument(format!(
            "output arrays disagree in length: mean={}, var={}, n_pts={}",
            mean.len(),
            var.len(),
            n_pts.len()
        )));
    }
    if out_len < required_len {
        return Err(ProfileError::BufferTooSmall {
            required: required_len,
            actual: out_len,
        });
    }
    Ok(())
}

/// Shared scan skeleton for both profile variants.
///
/// Zeroes the output buffers over their full length, accumulates running sum,
/// sum-of-squares and count per bin for every unmasked in-bounds pixel within
/// `rad` of the center, then normalizes the first `required_len` bins to mean
/// and population variance. Bins that received no points keep mean 0 and
/// variance 0. `bin_of` resolves a squared radius to a bin id and may fail.
fn scan_window<F>(
    data: ArrayView2<'_, f32>,
    mask: Option<ArrayView2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
    required_len: usize,
    mean: &mut [f64],
    var: &mut [f64],
    n_pts: &mut [i32],
    mut bin_of: F,
) -> Result<ProfileTotals, ProfileError>
where
    F: FnMut(usize) -> Result<usize, ProfileError>,
{
    if let Some(mask) = &mask {
        if mask.dim() != data.dim() {
            return Err(ProfileError::InvalidArgument(format!(
                "mask shape {:?} does not match data shape {:?}",
                mask.dim(),
                data.dim()
            )));
        }
    }

    mean.fill(0.0);
    var.fill(0.0);
    n_pts.fill(0);

    let (n_rows, n_cols) = data.dim();
    let (row_ctr, col_ctr) = ctr;
    let max_rad_sq = rad * rad;

    let row_min = (row_ctr - rad).max(0);
    let row_max = (row_ctr + rad).min(n_rows as i64 - 1);
    let col_min = (col_ctr - rad).max(0);
    let col_max = (col_ctr + rad).min(n_cols as i64 - 1);

    let mut totals = ProfileTotals {
        counts: 0.0,
        points: 0,
    };

    for row in row_min..=row_max {
        for col in col_min..=col_max {
            let at = [row as usize, col as usize];
            if mask.is_some_and(|mask| mask[at]) {
                continue;
            }
            let d_row = row - row_ctr;
            let d_col = col - col_ctr;
            let rad_sq = d_row * d_row + d_col * d_col;
            if rad_sq > max_rad_sq {
                continue;
            }
            let bin = bin_of(rad_sq as usize)?;

            let value = f64::from(data[at]);
            mean[bin] += value;
            var[bin] += value * value;
            n_pts[bin] += 1;
            totals.counts += value;
            totals.points += 1;
        }
    }

    // turn the raw sums into mean and population variance
    for bin in 0..required_len {
        let n = n_pts[bin];
        if n != 0 {
            mean[bin] /= f64::from(n);
            var[bin] = var[bin] / f64::from(n) - mean[bin] * mean[bin];
        }
    }

    Ok(totals)
}

/// Radial profile as a function of radial index.
///
/// Output buffers must hold at least `rad + 2` elements; since the radial
/// index of an exact radius `r > 1` is `r + 1`, that is the largest bin the
/// scan can touch. Grows `table` as a side effect when it is too small for
/// `rad * rad`.
pub fn radial_profile_internal(
    data: ArrayView2<'_, f32>,
    mask: Option<ArrayView2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
    table: &mut RadialIndexTable,
    mean: &mut [f64],
    var: &mut [f64],
    n_pts: &mut [i32],
) -> Result<ProfileTotals, ProfileError> {
    let rad = check_radius(rad)?;
    let required_len = (rad + 2) as usize;
    check_output_len(required_len, mean, var, n_pts)?;

    table.ensure_capacity((rad * rad) as usize)?;
    let table = &*table;

    scan_window(
        data,
        mask,
        ctr,
        rad,
        required_len,
        mean,
        var,
        n_pts,
        |rad_sq| {
            let bin = table.lookup(rad_sq) as usize;
            if bin >= required_len {
                return Err(ProfileError::InternalInconsistency {
                    index: bin,
                    limit: required_len,
                    radius: rad,
                });
            }
            Ok(bin)
        },
    )
}

/// Radial profile as a function of exact squared radius.
///
/// Output buffers must hold at least `rad * rad + 1` elements; the bin id is
/// the squared distance itself.
pub fn radial_profile_sq_internal(
    data: ArrayView2<'_, f32>,
    mask: Option<ArrayView2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
    mean: &mut [f64],
    var: &mut [f64],
    n_pts: &mut [i32],
) -> Result<ProfileTotals, ProfileError> {
    let rad = check_radius(rad)?;
    let required_len = (rad * rad + 1) as usize;
    check_output_len(required_len, mean, var, n_pts)?;

    scan_window(data, mask, ctr, rad, required_len, mean, var, n_pts, Ok)
}

fn writable<'a, T: numpy::Element>(
    arr: &'a mut PyReadwriteArray1<'_, T>,
    name: &str,
) -> PyResult<&'a mut [T]> {
    arr.as_slice_mut()
        .map_err(|_| PyValueError::new_err(format!("{name} must be contiguous")))
}

/// Generate a radial profile as a function of radial index.
///
/// # Arguments
/// * `data` - 2-d image array `[row, col]`.
/// * `mask` - Optional mask of the same shape; `True` marks pixels to ignore.
/// * `ctr` - `(row, col)` center of the profile; it need not be on the array.
/// * `rad` - Radius of the profile.
/// * `mean`, `var`, `n_pts` - Output arrays of equal length, at least
///   `rad + 2` elements; filled with per-bin mean, variance and point count.
///
/// # Returns
/// A `(tot_counts, tot_pts)` tuple: the summed value and number of all
/// accumulated pixels.
#[pyfunction]
pub fn radial_profile(
    data: PyReadonlyArray2<'_, f32>,
    mask: Option<PyReadonlyArray2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
    mut mean: PyReadwriteArray1<'_, f64>,
    mut var: PyReadwriteArray1<'_, f64>,
    mut n_pts: PyReadwriteArray1<'_, i32>,
) -> PyResult<(f64, i64)> {
    let data = data.as_array();
    let mask = mask.as_ref().map(|mask| mask.as_array());
    let mean = writable(&mut mean, "mean")?;
    let var = writable(&mut var, "var")?;
    let n_pts = writable(&mut n_pts, "n_pts")?;

    let mut profiler = crate::shared_profiler();
    let totals = radial_profile_internal(
        data,
        mask,
        ctr,
        rad,
        profiler.index_table_mut(),
        mean,
        var,
        n_pts,
    )?;
    Ok((totals.counts, totals.points))
}

/// Generate a radial profile as a function of radius squared.
///
/// Same contract as [`radial_profile`], except the output arrays index by
/// exact squared radius and must hold at least `rad * rad + 1` elements.
#[pyfunction]
pub fn radial_profile_sq(
    data: PyReadonlyArray2<'_, f32>,
    mask: Option<PyReadonlyArray2<'_, bool>>,
    ctr: (i64, i64),
    rad: i64,
    mut mean: PyReadwriteArray1<'_, f64>,
    mut var: PyReadwriteArray1<'_, f64>,
    mut n_pts: PyReadwriteArray1<'_, i32>,
) -> PyResult<(f64, i64)> {
    let data = data.as_array();
    let mask = mask.as_ref().map(|mask| mask.as_array());
    let mean = writable(&mut mean, "mean")?;
    let var = writable(&mut var, "var")?;
    let n_pts = writable(&mut n_pts, "n_pts")?;

    let totals = radial_profile_sq_internal(data, mask, ctr, rad, mean, var, n_pts)?;
    Ok((totals.counts, totals.points))
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::Array2;

    use super::*;
    use crate::fake_functions::fake_star_internal;

    struct Profile {
        mean: Vec<f64>,
        var: Vec<f64>,
        n_pts: Vec<i32>,
    }

    impl Profile {
        fn sized(n: usize) -> Self {
            Self {
                mean: vec![0.0; n],
                var: vec![0.0; n],
                n_pts: vec![0; n],
            }
        }
    }

    fn profile(
        data: &Array2<f32>,
        mask: Option<&Array2<bool>>,
        ctr: (i64, i64),
        rad: i64,
    ) -> (Profile, ProfileTotals) {
        let mut out = Profile::sized((rad + 2) as usize);
        let mut table = RadialIndexTable::new();
        let totals = radial_profile_internal(
            data.view(),
            mask.map(|mask| mask.view()),
            ctr,
            rad,
            &mut table,
            &mut out.mean,
            &mut out.var,
            &mut out.n_pts,
        )
        .unwrap();
        (out, totals)
    }

    fn profile_sq(
        data: &Array2<f32>,
        mask: Option<&Array2<bool>>,
        ctr: (i64, i64),
        rad: i64,
    ) -> (Profile, ProfileTotals) {
        let mut out = Profile::sized((rad * rad + 1) as usize);
        let totals = radial_profile_sq_internal(
            data.view(),
            mask.map(|mask| mask.view()),
            ctr,
            rad,
            &mut out.mean,
            &mut out.var,
            &mut out.n_pts,
        )
        .unwrap();
        (out, totals)
    }

    #[test]
    fn constant_image_profile() {
        // 13 pixels of a 5x5 frame lie within radius 2 of its center
        let data = Array2::from_elem((5, 5), 10.0f32);
        let (out, totals) = profile(&data, None, (2, 2), 2);

        assert_eq!(totals.points, 13);
        assert_abs_diff_eq!(totals.counts, 130.0);
        assert_eq!(out.n_pts, vec![1, 4, 4, 4]);
        for (&mean, &n) in out.mean.iter().zip(&out.n_pts) {
            if n > 0 {
                assert_abs_diff_eq!(mean, 10.0);
            }
        }
        for &var in &out.var {
            assert_abs_diff_eq!(var, 0.0);
        }
    }

    #[test]
    fn variants_agree_on_totals() {
        // same pixel set, different partition
        let data = fake_star_internal((16, 16), (7.0, 8.0), 2.5, 900.0).unwrap();
        let (_, totals) = profile(&data, None, (7, 8), 5);
        let (_, totals_sq) = profile_sq(&data, None, (7, 8), 5);

        assert_eq!(totals.points, totals_sq.points);
        assert_abs_diff_eq!(totals.counts, totals_sq.counts);
    }

    #[test]
    fn variance_of_known_annulus() {
        let mut data = Array2::zeros((3, 3));
        data[[0, 1]] = 1.0;
        data[[1, 0]] = 2.0;
        data[[1, 2]] = 3.0;
        data[[2, 1]] = 4.0;
        let (out, totals) = profile(&data, None, (1, 1), 1);

        assert_eq!(totals.points, 5);
        assert_eq!(out.n_pts[1], 4);
        assert_relative_eq!(out.mean[1], 2.5);
        // population variance of {1, 2, 3, 4}
        assert_relative_eq!(out.var[1], 1.25);
    }

    #[test]
    fn fully_masked_window_counts_nothing() {
        let data = Array2::from_elem((5, 5), 10.0f32);
        let mask = Array2::from_elem((5, 5), true);
        let (out, totals) = profile(&data, Some(&mask), (2, 2), 2);

        assert_eq!(totals.points, 0);
        assert_abs_diff_eq!(totals.counts, 0.0);
        assert!(out.n_pts.iter().all(|&n| n == 0));
        assert!(out.mean.iter().all(|&m| m == 0.0));
        assert!(out.var.iter().all(|&v| v == 0.0));

        let (out_sq, totals_sq) = profile_sq(&data, Some(&mask), (2, 2), 2);
        assert_eq!(totals_sq.points, 0);
        assert!(out_sq.n_pts.iter().all(|&n| n == 0));
    }

    #[test]
    fn masked_pixels_are_skipped() {
        let data = Array2::from_elem((5, 5), 10.0f32);
        let mut mask = Array2::from_elem((5, 5), false);
        mask[[2, 2]] = true;
        let (out, totals) = profile(&data, Some(&mask), (2, 2), 2);

        assert_eq!(totals.points, 12);
        assert_eq!(out.n_pts[0], 0);
        assert_abs_diff_eq!(out.mean[0], 0.0);
    }

    #[test]
    fn center_off_the_array() {
        // only (0, 2) is both in bounds and within radius 1 of (-1, 2)
        let data = Array2::from_elem((5, 5), 3.0f32);
        let (out, totals) = profile(&data, None, (-1, 2), 1);

        assert_eq!(totals.points, 1);
        assert_abs_diff_eq!(totals.counts, 3.0);
        assert_eq!(out.n_pts, vec![0, 1, 0]);
    }

    #[test]
    fn empty_image_counts_nothing() {
        let data = Array2::<f32>::zeros((0, 0));
        let (_, totals) = profile(&data, None, (0, 0), 3);
        assert_eq!(totals.points, 0);
    }

    #[test]
    fn short_buffers_fail_before_any_write() {
        let data = Array2::from_elem((5, 5), 10.0f32);
        let mut mean = vec![7.0; 3];
        let mut var = vec![7.0; 3];
        let mut n_pts = vec![7; 3];
        let mut table = RadialIndexTable::new();

        let err = radial_profile_internal(
            data.view(),
            None,
            (2, 2),
            2,
            &mut table,
            &mut mean,
            &mut var,
            &mut n_pts,
        )
        .unwrap_err();

        assert_eq!(
            err,
            ProfileError::BufferTooSmall {
                required: 4,
                actual: 3
            }
        );
        // nothing was zeroed or accumulated, and the table was not grown
        assert_eq!(mean, vec![7.0; 3]);
        assert_eq!(var, vec![7.0; 3]);
        assert_eq!(n_pts, vec![7; 3]);
        assert!(table.is_empty());
    }

    #[test]
    fn unreachable_squared_radii_leave_empty_bins() {
        // no integer pixel offset has squared distance 3 from the center
        let data = Array2::from_elem((5, 5), 10.0f32);
        let (out, _) = profile_sq(&data, None, (2, 2), 2);

        assert_eq!(out.n_pts, vec![1, 4, 4, 0, 4]);
        assert_abs_diff_eq!(out.mean[3], 0.0);
        assert_abs_diff_eq!(out.var[3], 0.0);
    }

    #[test]
    fn radius_zero_counts_the_center_pixel() {
        let mut data = Array2::zeros((5, 5));
        data[[2, 2]] = 42.0;
        let (out, totals) = profile(&data, None, (2, 2), 0);

        assert_eq!(totals.points, 1);
        assert_abs_diff_eq!(totals.counts, 42.0);
        assert_abs_diff_eq!(out.mean[0], 42.0);
        assert_abs_diff_eq!(out.var[0], 0.0);
    }

    #[test]
    fn repeated_scans_are_bit_identical() {
        let data = fake_star_internal((11, 11), (5.0, 5.0), 1.8, 500.0).unwrap();
        let (first, totals_a) = profile(&data, None, (5, 5), 4);
        let (second, totals_b) = profile(&data, None, (5, 5), 4);

        assert_eq!(totals_a, totals_b);
        assert_eq!(first.mean, second.mean);
        assert_eq!(first.var, second.var);
        assert_eq!(first.n_pts, second.n_pts);
    }

    #[test]
    fn negative_radius_is_rejected() {
        let data = Array2::<f32>::zeros((5, 5));
        let mut out = Profile::sized(4);
        let err = radial_profile_sq_internal(
            data.view(),
            None,
            (2, 2),
            -1,
            &mut out.mean,
            &mut out.var,
            &mut out.n_pts,
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidArgument(_)));
    }

    #[test]
    fn mask_shape_mismatch_is_rejected() {
        let data = Array2::<f32>::zeros((5, 5));
        let mask = Array2::from_elem((4, 5), false);
        let mut out = Profile::sized(4);
        let mut table = RadialIndexTable::new();
        let err = radial_profile_internal(
            data.view(),
            Some(mask.view()),
            (2, 2),
            2,
            &mut table,
            &mut out.mean,
            &mut out.var,
            &mut out.n_pts,
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidArgument(_)));
    }
}
