//! Resampling of a low-resolution stack onto a high-resolution pixel grid.
//!
//! Every target pixel is mapped target pixel → sky → source pixel through the
//! two stacks' WCSs, and the source band is evaluated there with a windowed
//! sinc (Lanczos) kernel. Samples outside the source image contribute zero.

use std::f64::consts::PI;

use ndarray::{Array2, Array3, ArrayView2, Axis};

use super::stack::ImageStack;
use super::wcs::Wcs;

/// Lanczos window half-width used for resampling
pub const LANCZOS_RADIUS: usize = 3;

/// Windowed sinc: sinc(x) · sinc(x / a) for |x| < a, 0 otherwise.
pub fn lanczos_kernel(x: f64, a: f64) -> f64 {
    if x.abs() < 1e-12 {
        return 1.0;
    }
    if x.abs() >= a {
        return 0.0;
    }

    let pi_x = PI * x;
    let pi_x_a = pi_x / a;
    (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
}

/// Evaluate `image` at fractional position (`x` column, `y` row).
///
/// Kernel weights are normalized so that a constant image is reproduced
/// exactly away from the border.
pub fn sample_lanczos(image: &ArrayView2<f64>, x: f64, y: f64, a: usize) -> f64 {
    let (height, width) = image.dim();
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let a_i = a as isize;
    let a_f = a as f64;

    let wx: Vec<f64> = (0..2 * a_i)
        .map(|i| lanczos_kernel(fx - (i - a_i + 1) as f64, a_f))
        .collect();
    let wy: Vec<f64> = (0..2 * a_i)
        .map(|j| lanczos_kernel(fy - (j - a_i + 1) as f64, a_f))
        .collect();
    let norm = wx.iter().sum::<f64>() * wy.iter().sum::<f64>();
    if norm.abs() < 1e-12 {
        return 0.0;
    }

    let mut sum = 0.0;
    for (j, wyj) in wy.iter().enumerate() {
        let py = y0 - a_i + 1 + j as isize;
        if py < 0 || py >= height as isize {
            continue;
        }
        for (i, wxi) in wx.iter().enumerate() {
            let px = x0 - a_i + 1 + i as isize;
            if px < 0 || px >= width as isize {
                continue;
            }
            sum += image[[py as usize, px as usize]] * wxi * wyj;
        }
    }
    sum / norm
}

/// Resample one band from the `from` grid onto a `shape` grid described by `to`.
pub fn resample_band(
    band: &ArrayView2<f64>,
    from: &Wcs,
    to: &Wcs,
    shape: (usize, usize),
) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(row, col)| {
        let (x, y) = to.convert_to(from, col as f64, row as f64);
        sample_lanczos(band, x, y, LANCZOS_RADIUS)
    })
}

/// Resample every band of `low` onto the pixel grid of `high`.
///
/// Returns `None` when either stack lacks a WCS.
pub fn resample_to_grid(low: &ImageStack, high: &ImageStack) -> Option<Array3<f64>> {
    let from = low.wcs()?;
    let to = high.wcs()?;
    let (height, width) = high.shape();

    let mut out = Array3::<f64>::zeros((low.num_bands(), height, width));
    for (band, mut target) in low.images().axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        target.assign(&resample_band(&band, from, to, (height, width)));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_values() {
        assert_eq!(lanczos_kernel(0.0, 3.0), 1.0);
        assert_relative_eq!(lanczos_kernel(1.0, 3.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(lanczos_kernel(2.0, 3.0), 0.0, epsilon = 1e-12);
        assert_eq!(lanczos_kernel(3.5, 3.0), 0.0);
        assert!(lanczos_kernel(0.5, 3.0) > 0.5);
    }

    #[test]
    fn test_integer_positions_are_exact() {
        let image = Array2::from_shape_fn((12, 12), |(y, x)| (y * 12 + x) as f64);
        assert_relative_eq!(
            sample_lanczos(&image.view(), 5.0, 7.0, 3),
            image[[7, 5]],
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_constant_preserved_inside() {
        let image = Array2::from_elem((16, 16), 4.0);
        assert_relative_eq!(sample_lanczos(&image.view(), 7.3, 8.6, 3), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_resample_identity_wcs() {
        let wcs = Wcs::from_scale((8.0, 8.0), (10.0, 0.0), 1e-4);
        let image = Array2::from_shape_fn((16, 16), |(y, x)| (y as f64 - x as f64).abs());
        let out = resample_band(&image.view(), &wcs, &wcs, (16, 16));
        for (a, b) in out.iter().zip(image.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_resample_requires_wcs() {
        let low = ImageStack::from_cube("low", Array3::zeros((1, 4, 4))).unwrap();
        let high = ImageStack::from_cube("high", Array3::zeros((1, 8, 8))).unwrap();
        assert!(resample_to_grid(&low, &high).is_none());
    }
}
