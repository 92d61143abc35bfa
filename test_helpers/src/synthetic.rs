//! Seeded synthetic images for unit and integration tests.

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Image of Gaussian noise with the given mean and standard deviation.
///
/// The same seed always yields the same image. A non-positive sigma gives a
/// flat image at `mean`.
pub fn normal_noise(shape: (usize, usize), mean: f64, sigma: f64, seed: u64) -> Array2<f64> {
    if sigma <= 0.0 {
        return Array2::from_elem(shape, mean);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Normal::new(mean, sigma).expect("finite positive sigma");
    Array2::from_shape_fn(shape, |_| dist.sample(&mut rng))
}

/// Band cube of independent noise planes, one derived seed per band.
pub fn noise_cube(
    bands: usize,
    shape: (usize, usize),
    mean: f64,
    sigma: f64,
    seed: u64,
) -> Array3<f64> {
    let mut cube = Array3::<f64>::zeros((bands, shape.0, shape.1));
    for (band, mut plane) in cube.axis_iter_mut(Axis(0)).enumerate() {
        plane.assign(&normal_noise(shape, mean, sigma, seed.wrapping_add(band as u64 * 7919)));
    }
    cube
}

/// Add a circular Gaussian of peak `amplitude` centered at (`row`, `col`).
pub fn add_gaussian(image: &mut Array2<f64>, row: f64, col: f64, amplitude: f64, sigma: f64) {
    let two_sigma_sq = 2.0 * sigma * sigma;
    for ((y, x), pixel) in image.indexed_iter_mut() {
        let dy = y as f64 - row;
        let dx = x as f64 - col;
        *pixel += amplitude * (-(dx * dx + dy * dy) / two_sigma_sq).exp();
    }
}

/// Add a Gaussian source to every band, scaled by the per-band `sed`.
pub fn add_gaussian_source(cube: &mut Array3<f64>, row: f64, col: f64, sed: &[f64], sigma: f64) {
    assert_eq!(sed.len(), cube.len_of(Axis(0)), "one SED entry per band");
    for (mut plane, &amplitude) in cube.axis_iter_mut(Axis(0)).zip(sed) {
        let mut band = plane.to_owned();
        add_gaussian(&mut band, row, col, amplitude, sigma);
        plane.assign(&band);
    }
}

/// Unit-sum Gaussian PSF on an odd `size` × `size` grid.
pub fn gaussian_psf(size: usize, sigma: f64) -> Array2<f64> {
    let center = (size / 2) as f64;
    let mut psf = Array2::<f64>::zeros((size, size));
    add_gaussian(&mut psf, center, center, 1.0, sigma);
    let total = psf.sum();
    psf / total
}

/// Stack of identical PSFs, one per band.
pub fn gaussian_psf_cube(bands: usize, size: usize, sigma: f64) -> Array3<f64> {
    let psf = gaussian_psf(size, sigma);
    let mut cube = Array3::<f64>::zeros((bands, size, size));
    for mut plane in cube.axis_iter_mut(Axis(0)) {
        plane.assign(&psf);
    }
    cube
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_seeded() {
        let a = normal_noise((8, 8), 0.0, 1.0, 3);
        let b = normal_noise((8, 8), 0.0, 1.0, 3);
        let c = normal_noise((8, 8), 0.0, 1.0, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_gaussian_peak_and_psf_norm() {
        let mut image = Array2::<f64>::zeros((11, 11));
        add_gaussian(&mut image, 5.0, 5.0, 10.0, 1.5);
        assert_eq!(image[[5, 5]], 10.0);

        let psf = gaussian_psf(11, 1.5);
        assert!((psf.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_noise_cube_bands_differ() {
        let cube = noise_cube(2, (6, 6), 0.0, 1.0, 1);
        assert_ne!(cube.index_axis(Axis(0), 0), cube.index_axis(Axis(0), 1));
    }
}
