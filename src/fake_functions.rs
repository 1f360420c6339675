//! Synthetic CCD frames for exercising the profiling and centroiding code:
//! a noise-free double-Gaussian star and a seeded photon/read-noise model.

use ndarray::{Array2, ArrayView2};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Poisson};

use crate::error::ProfileError;

/// Full well of a 16-bit detector, in ADU.
const MAX_VAL_U16: f64 = 65535.0;

/// Noise-free double-Gaussian star, truncated at the 16-bit full well.
///
/// The profile is `ampl * (exp(arg) + 0.1 * exp(0.25 * arg))` with
/// `arg = -rad_sq / (2 * sigma^2)`: a narrow core on a fainter, four-times
/// wider halo. The center uses the convention that pixel `(0, 0)` is centered
/// at coordinate `(0.0, 0.0)`.
pub fn fake_star_internal(
    shape: (usize, usize),
    ctr: (f64, f64),
    sigma: f64,
    ampl: f64,
) -> Result<Array2<f32>, ProfileError> {
    if shape.0 == 0 || shape.1 == 0 {
        return Err(ProfileError::InvalidArgument(format!(
            "shape={shape:?} must be non-empty"
        )));
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(ProfileError::InvalidArgument(format!(
            "sigma={sigma} must be positive and finite"
        )));
    }
    if !(ampl.is_finite() && ctr.0.is_finite() && ctr.1.is_finite()) {
        return Err(ProfileError::InvalidArgument(
            "ctr and ampl must be finite".to_string(),
        ));
    }

    Ok(Array2::from_shape_fn(shape, |(row, col)| {
        let d_row = row as f64 - ctr.0;
        let d_col = col as f64 - ctr.1;
        let exp_arg = -(d_row * d_row + d_col * d_col) / (2.0 * sigma * sigma);
        let value = ampl * (exp_arg.exp() + 0.1 * (0.25 * exp_arg).exp());
        value.clamp(0.0, MAX_VAL_U16) as f32
    }))
}

/// Adds sky level, Poisson photon noise and Gaussian read noise to a
/// noiseless frame, clamping the result to `[0, 65535]` ADU.
///
/// Each pixel's photon count is drawn at `(value + sky) * ccd_gain` electrons
/// and converted back to ADU, then read noise of `read_noise` electrons is
/// added around `bias` ADU. The generator is seeded, so a given seed always
/// produces the same frame.
pub fn add_noise_internal(
    data: ArrayView2<'_, f32>,
    sky: f64,
    read_noise: f64,
    ccd_gain: f64,
    bias: f64,
    seed: u64,
) -> Result<Array2<f32>, ProfileError> {
    if !(ccd_gain.is_finite() && ccd_gain > 0.0) {
        return Err(ProfileError::InvalidArgument(format!(
            "ccd_gain={ccd_gain} must be positive and finite"
        )));
    }
    if !(read_noise.is_finite() && read_noise >= 0.0) {
        return Err(ProfileError::InvalidArgument(format!(
            "read_noise={read_noise} must be non-negative and finite"
        )));
    }
    if !(sky.is_finite() && bias.is_finite()) {
        return Err(ProfileError::InvalidArgument(
            "sky and bias must be finite".to_string(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let read = Normal::new(bias, read_noise / ccd_gain).map_err(|_| {
        ProfileError::InvalidArgument(format!(
            "read_noise={read_noise} and ccd_gain={ccd_gain} do not form a valid read-noise model"
        ))
    })?;

    Ok(data.map(|&adu| {
        let electrons = (f64::from(adu) + sky) * ccd_gain;
        // a non-positive mean draws no photons
        let shot_adu = match Poisson::new(electrons) {
            Ok(photons) => photons.sample(&mut rng) / ccd_gain,
            Err(_) => 0.0,
        };
        let value = shot_adu + read.sample(&mut rng);
        value.clamp(0.0, MAX_VAL_U16) as f32
    }))
}

/// Return a noise-free double-Gaussian star frame.
///
/// # Arguments
/// * `shape` - `(rows, cols)` of the frame.
/// * `ctr` - `(row, col)` center of the star; fractional positions allowed.
/// * `sigma` - Gaussian sigma of the core, in pixels.
/// * `ampl` - Peak amplitude in ADU, truncated at 65535.
///
/// # Returns
/// A NumPy array of shape `shape`.
#[pyfunction]
pub fn fake_star(
    py: Python<'_>,
    shape: (usize, usize),
    ctr: (f64, f64),
    sigma: f64,
    ampl: f64,
) -> PyResult<Bound<'_, PyArray2<f32>>> {
    Ok(fake_star_internal(shape, ctr, sigma, ampl)?.into_pyarray(py))
}

/// Add Poisson photon noise and Gaussian read noise to a frame.
///
/// # Arguments
/// * `data` - Noiseless frame in ADU.
/// * `sky` - Sky level in ADU.
/// * `read_noise` - CCD read noise in electrons.
/// * `ccd_gain` - CCD inverse gain in electrons per ADU.
/// * `bias` - Frame bias in ADU.
/// * `seed` - Generator seed; equal seeds produce equal frames.
///
/// # Returns
/// A NumPy array of the same shape as `data`.
#[pyfunction]
pub fn add_noise<'py>(
    py: Python<'py>,
    data: PyReadonlyArray2<'py, f32>,
    sky: f64,
    read_noise: f64,
    ccd_gain: f64,
    bias: f64,
    seed: u64,
) -> PyResult<Bound<'py, PyArray2<f32>>> {
    Ok(add_noise_internal(data.as_array(), sky, read_noise, ccd_gain, bias, seed)?.into_pyarray(py))
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::*;

    #[test]
    fn star_peaks_at_its_center_and_is_symmetric() {
        let star = fake_star_internal((17, 17), (8.0, 8.0), 2.0, 1000.0).unwrap();

        let peak = star[[8, 8]];
        assert!(star.iter().all(|&value| value <= peak));
        assert_relative_eq!(f64::from(peak), 1100.0, max_relative = 1.0e-6);

        for offset in 1..=8usize {
            assert_abs_diff_eq!(star[[8 - offset, 8]], star[[8 + offset, 8]]);
            assert_abs_diff_eq!(star[[8, 8 - offset]], star[[8, 8 + offset]]);
        }
    }

    #[test]
    fn star_clamps_at_the_full_well() {
        let star = fake_star_internal((9, 9), (4.0, 4.0), 3.0, 1.0e9).unwrap();
        assert!(star.iter().all(|&value| value <= 65535.0));
        assert_abs_diff_eq!(star[[4, 4]], 65535.0);
    }

    #[test]
    fn degenerate_star_parameters_are_rejected() {
        assert!(fake_star_internal((0, 5), (0.0, 0.0), 1.0, 1.0).is_err());
        assert!(fake_star_internal((5, 5), (2.0, 2.0), 0.0, 1.0).is_err());
        assert!(fake_star_internal((5, 5), (2.0, 2.0), -1.0, 1.0).is_err());
        assert!(fake_star_internal((5, 5), (f64::NAN, 2.0), 1.0, 1.0).is_err());
    }

    #[test]
    fn noise_is_reproducible_per_seed() {
        let frame = fake_star_internal((12, 12), (6.0, 6.0), 1.5, 400.0).unwrap();

        let a = add_noise_internal(frame.view(), 100.0, 13.0, 5.0, 1000.0, 7).unwrap();
        let b = add_noise_internal(frame.view(), 100.0, 13.0, 5.0, 1000.0, 7).unwrap();
        let c = add_noise_internal(frame.view(), 100.0, 13.0, 5.0, 1000.0, 8).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn noise_centers_on_sky_plus_bias() {
        let flat = Array2::<f32>::zeros((32, 32));
        let noisy = add_noise_internal(flat.view(), 100.0, 13.0, 5.0, 1000.0, 42).unwrap();

        let mean = noisy.iter().map(|&value| f64::from(value)).sum::<f64>() / noisy.len() as f64;
        assert!(
            (mean - 1100.0).abs() < 10.0,
            "mean {mean} should sit near sky + bias = 1100"
        );
        assert!(noisy.iter().all(|&value| (0.0..=65535.0).contains(&f64::from(value))));
    }

    #[test]
    fn degenerate_noise_parameters_are_rejected() {
        let flat = Array2::<f32>::zeros((4, 4));
        assert!(add_noise_internal(flat.view(), 0.0, 13.0, 0.0, 0.0, 0).is_err());
        assert!(add_noise_internal(flat.view(), 0.0, -1.0, 5.0, 0.0, 0).is_err());
        assert!(add_noise_internal(flat.view(), f64::INFINITY, 13.0, 5.0, 0.0, 0).is_err());
    }
}
