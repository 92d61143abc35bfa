//! Source extraction from a background-subtracted detection image.
//!
//! Pixels above `threshold × err` are segmented into 8-connected regions;
//! regions smaller than the minimum area are dropped and every surviving
//! region becomes one [`CatalogEntry`] with its flux-weighted centroid,
//! peak pixel and second moments.

use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use super::background::{Background, DEFAULT_CLIP_ITERATIONS, DEFAULT_CLIP_SIGMA};
use super::thresholding::{component_extents, connected_components, threshold_mask, Connectivity};
use super::DetectionError;
use crate::image_proc::bbox::BBox;

/// One detected source.
///
/// Positions are zero-based pixel coordinates, `row` along the image's
/// first axis and `col` along the second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Index in the catalog (raster order of the region's first pixel)
    pub id: usize,
    /// Flux-weighted centroid row
    pub row: f64,
    /// Flux-weighted centroid column
    pub col: f64,
    /// Row of the brightest pixel
    pub peak_row: usize,
    /// Column of the brightest pixel
    pub peak_col: usize,
    /// Value of the brightest pixel
    pub peak: f64,
    /// Sum of the region's pixels
    pub flux: f64,
    /// Number of pixels in the region
    pub npix: usize,
    /// Second central moment along columns
    pub m_xx: f64,
    /// Second central moment along rows
    pub m_yy: f64,
    /// Mixed second central moment
    pub m_xy: f64,
    /// Semi-major axis RMS (pixels)
    pub a: f64,
    /// Semi-minor axis RMS (pixels)
    pub b: f64,
    /// Position angle of the major axis, radians counter-clockwise from the column axis
    pub theta: f64,
    /// Extent of the region
    pub bbox: BBox,
}

/// Ordered list of detections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCatalog {
    pub entries: Vec<CatalogEntry>,
}

impl SourceCatalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Centroids as (row, col) pairs, in catalog order.
    pub fn pixel_coords(&self) -> Vec<(f64, f64)> {
        self.entries.iter().map(|e| (e.row, e.col)).collect()
    }
}

/// Peak-detection backend.
pub trait PeakDetector {
    /// Background level and RMS of `image`.
    fn estimate_background(&self, image: &ArrayView2<f64>) -> Background;

    /// Extract sources above `threshold × err` from a background-subtracted image.
    fn extract_peaks(
        &self,
        image: &ArrayView2<f64>,
        threshold: f64,
        err: f64,
    ) -> Result<SourceCatalog, DetectionError>;
}

/// Threshold-and-label detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdDetector {
    /// Minimum number of pixels for a region to count as a source
    pub min_area: usize,
    /// Sigma-clipping threshold for the background estimate
    pub clip_sigma: f64,
    /// Maximum clipping passes for the background estimate
    pub clip_iterations: usize,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self {
            min_area: 5,
            clip_sigma: DEFAULT_CLIP_SIGMA,
            clip_iterations: DEFAULT_CLIP_ITERATIONS,
        }
    }
}

impl PeakDetector for ThresholdDetector {
    fn estimate_background(&self, image: &ArrayView2<f64>) -> Background {
        Background::estimate_with(image, self.clip_sigma, self.clip_iterations)
    }

    fn extract_peaks(
        &self,
        image: &ArrayView2<f64>,
        threshold: f64,
        err: f64,
    ) -> Result<SourceCatalog, DetectionError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(DetectionError::InvalidThreshold(threshold));
        }
        if !err.is_finite() || err < 0.0 {
            return Err(DetectionError::InvalidThreshold(err));
        }

        let cut = threshold * err;
        let mask = threshold_mask(image, cut);
        let labeled = connected_components(&mask.view(), Connectivity::Eight);

        let mut entries = Vec::new();
        for (index, (bbox, npix)) in component_extents(&labeled.view()).into_iter().enumerate() {
            if npix < self.min_area {
                continue;
            }
            let entry = measure_region(image, &labeled.view(), index + 1, bbox, entries.len());
            entries.push(entry);
        }

        log::debug!(
            "extracted {} sources above {:.4e} ({} x {:.4e})",
            entries.len(),
            cut,
            threshold,
            err
        );
        Ok(SourceCatalog { entries })
    }
}

/// Moments of one labeled region, in absolute image coordinates.
fn measure_region(
    image: &ArrayView2<f64>,
    labeled: &ArrayView2<usize>,
    label: usize,
    bbox: BBox,
    id: usize,
) -> CatalogEntry {
    let (y0, x0) = (bbox.y0 as usize, bbox.x0 as usize);
    let sub_image = image.slice(s![y0..y0 + bbox.height, x0..x0 + bbox.width]);
    let sub_labels = labeled.slice(s![y0..y0 + bbox.height, x0..x0 + bbox.width]);

    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    let mut m20 = 0.0;
    let mut m02 = 0.0;
    let mut m11 = 0.0;
    let mut npix = 0;
    let mut peak = f64::NEG_INFINITY;
    let mut peak_pos = (0, 0);

    for ((row, col), &value) in sub_image.indexed_iter() {
        if sub_labels[[row, col]] != label {
            continue;
        }
        npix += 1;
        if value > peak {
            peak = value;
            peak_pos = (row, col);
        }
        let (r, c) = (row as f64, col as f64);
        m00 += value;
        m10 += c * value;
        m01 += r * value;
        m20 += c * c * value;
        m02 += r * r * value;
        m11 += r * c * value;
    }

    // Region pixels are all above a non-negative cut, so m00 > 0 unless the cut is 0
    // and the region is made of vanishing values.
    let (xc, yc, mu20, mu02, mu11) = if m00 > f64::EPSILON {
        let xc = m10 / m00;
        let yc = m01 / m00;
        (
            xc,
            yc,
            (m20 / m00 - xc * xc).max(0.0),
            (m02 / m00 - yc * yc).max(0.0),
            m11 / m00 - xc * yc,
        )
    } else {
        (peak_pos.1 as f64, peak_pos.0 as f64, 0.0, 0.0, 0.0)
    };

    let half_sum = (mu20 + mu02) / 2.0;
    let half_diff = (mu20 - mu02) / 2.0;
    let root = (half_diff * half_diff + mu11 * mu11).sqrt();
    let a = (half_sum + root).max(0.0).sqrt();
    let b = (half_sum - root).max(0.0).sqrt();
    let theta = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);

    CatalogEntry {
        id,
        row: yc + y0 as f64,
        col: xc + x0 as f64,
        peak_row: peak_pos.0 + y0,
        peak_col: peak_pos.1 + x0,
        peak,
        flux: m00,
        npix,
        m_xx: mu20,
        m_yy: mu02,
        m_xy: mu11,
        a,
        b,
        theta,
        bbox,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use test_helpers::synthetic::add_gaussian;

    #[test]
    fn test_single_gaussian_centroid() {
        let mut image = Array2::<f64>::zeros((40, 40));
        add_gaussian(&mut image, 17.3, 22.6, 100.0, 2.0);

        let catalog = ThresholdDetector::default()
            .extract_peaks(&image.view(), 5.0, 1.0)
            .unwrap();

        assert_eq!(catalog.len(), 1);
        let entry = &catalog.entries[0];
        assert_relative_eq!(entry.row, 17.3, epsilon = 0.05);
        assert_relative_eq!(entry.col, 22.6, epsilon = 0.05);
        assert_eq!((entry.peak_row, entry.peak_col), (17, 23));
        assert_relative_eq!(entry.a, entry.b, max_relative = 0.1);
    }

    #[test]
    fn test_small_regions_rejected() {
        let mut image = Array2::<f64>::zeros((20, 20));
        image[[5, 5]] = 50.0;
        image[[5, 6]] = 50.0;
        add_gaussian(&mut image, 14.0, 14.0, 80.0, 1.5);

        let catalog = ThresholdDetector::default()
            .extract_peaks(&image.view(), 3.0, 1.0)
            .unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries[0].id, 0);
        assert_relative_eq!(catalog.entries[0].row, 14.0, epsilon = 0.05);
    }

    #[test]
    fn test_elongated_source_orientation() {
        let mut image = Array2::<f64>::zeros((9, 15));
        for col in 2..13 {
            image[[4, col]] = 10.0;
        }
        let catalog = ThresholdDetector::default()
            .extract_peaks(&image.view(), 1.0, 1.0)
            .unwrap();

        let entry = &catalog.entries[0];
        assert!(entry.a > 3.0);
        assert_relative_eq!(entry.b, 0.0, epsilon = 1e-9);
        assert_relative_eq!(entry.theta, 0.0, epsilon = 1e-9);
        assert_eq!(entry.npix, 11);
    }

    #[test]
    fn test_sources_ordered_by_first_pixel() {
        let mut image = Array2::<f64>::zeros((30, 30));
        add_gaussian(&mut image, 22.0, 5.0, 50.0, 1.5);
        add_gaussian(&mut image, 6.0, 24.0, 50.0, 1.5);

        let catalog = ThresholdDetector::default()
            .extract_peaks(&image.view(), 2.0, 1.0)
            .unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.entries[0].row < catalog.entries[1].row);
        assert_eq!(
            catalog.pixel_coords().len(),
            2,
            "one coordinate pair per entry"
        );
    }

    #[test]
    fn test_invalid_threshold() {
        let image = Array2::<f64>::zeros((4, 4));
        let detector = ThresholdDetector::default();
        assert!(detector.extract_peaks(&image.view(), f64::NAN, 1.0).is_err());
        assert!(detector.extract_peaks(&image.view(), 3.0, -1.0).is_err());
    }

    #[test]
    fn test_region_mask_matches_npix() {
        let mut image = Array2::<f64>::zeros((12, 12));
        add_gaussian(&mut image, 6.0, 6.0, 20.0, 1.0);
        let mask = threshold_mask(&image.view(), 1.0);
        let labels = connected_components(&mask.view(), Connectivity::Eight);
        let catalog = ThresholdDetector::default()
            .extract_peaks(&image.view(), 1.0, 1.0)
            .unwrap();
        let count = labels.iter().filter(|&&l| l == 1).count();
        assert_eq!(catalog.entries[0].npix, count);
    }
}
