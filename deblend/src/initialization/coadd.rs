//! Built-in model construction from an inverse-variance weighted coadd.
//!
//! All bands of the observation are combined into one detection coadd. The
//! footprint of a source is the 8-connected region around its center that
//! lies above `thresh × coadd_rms`; its morphology is the coadd above that
//! cutoff, optionally made symmetric and monotonic, normalized to a peak of
//! one. SEDs are least-squares amplitudes of each band against the
//! morphology. Multi-component models split the morphology into radial
//! annuli around the center.

use ndarray::{s, Array1, Array2, ArrayView2, Axis, Zip};

use super::builder::{BuildError, ExtendedParams, SourceBuilder};
use super::frame::{Frame, Observation};
use super::model::Component;
use crate::algo::stats::median;
use crate::image_proc::bbox::BBox;
use crate::image_proc::detection::thresholding::{
    connected_components, threshold_mask, Connectivity,
};

/// Weighted mean of all bands and its typical noise.
#[derive(Debug, Clone)]
pub struct Coadd {
    pub image: Array2<f64>,
    /// Median per-pixel noise of `image`
    pub rms: f64,
}

impl Coadd {
    /// Inverse-variance weighted mean over bands.
    pub fn from_observation(observation: &Observation) -> Result<Self, BuildError> {
        let images = observation.images();
        let weights = observation.weights();
        let shape = observation.shape();

        let mut numerator = Array2::<f64>::zeros(shape);
        let mut denominator = Array2::<f64>::zeros(shape);
        for (image, weight) in images.axis_iter(Axis(0)).zip(weights.axis_iter(Axis(0))) {
            Zip::from(&mut numerator)
                .and(&mut denominator)
                .and(&image)
                .and(&weight)
                .for_each(|n, d, &i, &w| {
                    *n += i * w;
                    *d += w;
                });
        }

        let noise: Vec<f64> = denominator
            .iter()
            .filter(|&&d| d > 0.0)
            .map(|&d| d.sqrt().recip())
            .collect();
        let rms = median(&noise).map_err(|_| BuildError::NoWeights)?;

        let image = Zip::from(&numerator)
            .and(&denominator)
            .map_collect(|&n, &d| if d > 0.0 { n / d } else { 0.0 });
        Ok(Self { image, rms })
    }
}

/// [`SourceBuilder`] working directly on the observation's pixels.
///
/// The observation must share the frame's pixel grid.
#[derive(Debug, Clone)]
pub struct CoaddBuilder {
    /// Smallest footprint (pixels) that can be modeled as an extended source
    pub min_footprint: usize,
}

impl Default for CoaddBuilder {
    fn default() -> Self {
        Self { min_footprint: 2 }
    }
}

impl CoaddBuilder {
    /// Normalized morphology of the footprint around `pixel`, with its box.
    fn morphology(
        &self,
        coadd: &Coadd,
        pixel: (usize, usize),
        params: &ExtendedParams,
    ) -> Result<(Array2<f64>, BBox), BuildError> {
        let cutoff = params.thresh * coadd.rms;
        let value = coadd.image[pixel];
        if value.is_nan() || value <= cutoff {
            return Err(BuildError::BelowThreshold { value, cutoff });
        }

        let mask = threshold_mask(&coadd.image.view(), cutoff);
        let labels = connected_components(&mask.view(), Connectivity::Eight);
        let label = labels[pixel];

        let mut bbox = BBox::default();
        let mut pixels = 0;
        for ((row, col), &l) in labels.indexed_iter() {
            if l == label {
                bbox.expand_to_include(row, col);
                pixels += 1;
            }
        }
        if pixels < self.min_footprint {
            return Err(BuildError::Unresolved { pixels });
        }

        let (y0, x0) = (bbox.y0 as usize, bbox.x0 as usize);
        let window = s![y0..y0 + bbox.height, x0..x0 + bbox.width];
        let mut morph = Zip::from(coadd.image.slice(window))
            .and(labels.slice(window))
            .map_collect(|&v, &l| if l == label { v - cutoff } else { 0.0 });

        let local = (pixel.0 - y0, pixel.1 - x0);
        if params.symmetric {
            make_symmetric(&mut morph, local);
        }
        if params.monotonic {
            make_monotonic(&mut morph, local, params.min_gradient);
        }

        let peak = morph.iter().copied().fold(0.0, f64::max);
        if peak <= 0.0 {
            return Err(BuildError::BelowThreshold { value, cutoff });
        }
        morph /= peak;
        Ok((morph, bbox))
    }
}

impl SourceBuilder for CoaddBuilder {
    fn point_source(
        &self,
        frame: &Frame,
        center: (f64, f64),
        observation: &Observation,
    ) -> Result<Component, BuildError> {
        let pixel = center_pixel(frame, center, observation)?;

        let morph = match frame.psf() {
            Some(psf) => {
                let peak = psf.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if peak > 0.0 {
                    psf / peak
                } else {
                    Array2::ones((1, 1))
                }
            }
            None => Array2::ones((1, 1)),
        };
        let (height, width) = morph.dim();
        let bbox = BBox::new(
            pixel.0 as isize - (height / 2) as isize,
            pixel.1 as isize - (width / 2) as isize,
            height,
            width,
        );

        let amplitudes: Vec<f64> = observation
            .images()
            .axis_iter(Axis(0))
            .map(|band| band[pixel].max(0.0))
            .collect();
        let sed = frame_sed(frame, observation, &amplitudes);
        Ok(Component::new(sed, morph, bbox))
    }

    fn extended_source(
        &self,
        frame: &Frame,
        center: (f64, f64),
        observation: &Observation,
        params: &ExtendedParams,
    ) -> Result<Component, BuildError> {
        let pixel = center_pixel(frame, center, observation)?;
        let coadd = Coadd::from_observation(observation)?;
        let (morph, bbox) = self.morphology(&coadd, pixel, params)?;
        let sed = fit_sed(frame, observation, &morph.view(), bbox);
        Ok(Component::new(sed, morph, bbox))
    }

    fn multi_component_source(
        &self,
        frame: &Frame,
        center: (f64, f64),
        observation: &Observation,
        params: &ExtendedParams,
        components: usize,
    ) -> Result<Vec<Component>, BuildError> {
        if components < 2 {
            return Err(BuildError::Degenerate {
                components,
                reason: "need at least two components",
            });
        }
        let pixel = center_pixel(frame, center, observation)?;
        let coadd = Coadd::from_observation(observation)?;
        let (morph, bbox) = self.morphology(&coadd, pixel, params)?;

        let local = (
            (pixel.0 as isize - bbox.y0) as f64,
            (pixel.1 as isize - bbox.x0) as f64,
        );
        let radius = |(row, col): (usize, usize)| {
            ((row as f64 - local.0).powi(2) + (col as f64 - local.1).powi(2)).sqrt()
        };
        let max_radius = morph
            .indexed_iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(p, _)| radius(p))
            .fold(0.0, f64::max);
        if max_radius == 0.0 {
            return Err(BuildError::Degenerate {
                components,
                reason: "footprint has no radial extent",
            });
        }

        let footprint = morph.iter().filter(|v| **v > 0.0).count();
        if components > footprint {
            return Err(BuildError::Degenerate {
                components,
                reason: "more components than footprint pixels",
            });
        }

        let step = max_radius / components as f64;
        let mut result = Vec::with_capacity(components);
        for ring in 0..components {
            let inner = ring as f64 * step;
            let outer = (ring + 1) as f64 * step;
            let last = ring + 1 == components;

            let mut ring_box = BBox::default();
            let mut ring_morph = Array2::<f64>::zeros(morph.dim());
            for (p, &v) in morph.indexed_iter() {
                let r = radius(p);
                if v > 0.0 && r >= inner && (r < outer || last) {
                    ring_morph[p] = v;
                    ring_box.expand_to_include(p.0, p.1);
                }
            }
            if ring_box.is_empty() {
                return Err(BuildError::Degenerate {
                    components,
                    reason: "empty annulus",
                });
            }

            let (ry, rx) = (ring_box.y0 as usize, ring_box.x0 as usize);
            let cropped = ring_morph
                .slice(s![ry..ry + ring_box.height, rx..rx + ring_box.width])
                .to_owned();
            let frame_box = BBox::new(
                bbox.y0 + ring_box.y0,
                bbox.x0 + ring_box.x0,
                ring_box.height,
                ring_box.width,
            );
            let sed = fit_sed(frame, observation, &cropped.view(), frame_box);
            result.push(Component::new(sed, cropped, frame_box));
        }
        Ok(result)
    }
}

/// Nearest pixel to `center`, checked against both grids.
fn center_pixel(
    frame: &Frame,
    center: (f64, f64),
    observation: &Observation,
) -> Result<(usize, usize), BuildError> {
    let shape = frame.shape();
    if observation.shape() != shape {
        return Err(BuildError::GridMismatch {
            frame: shape,
            observation: observation.shape(),
        });
    }
    let (row, col) = (center.0.round(), center.1.round());
    let inside = row.is_finite()
        && col.is_finite()
        && row >= 0.0
        && col >= 0.0
        && row < shape.0 as f64
        && col < shape.1 as f64;
    if !inside {
        return Err(BuildError::OutOfBounds {
            row: center.0,
            col: center.1,
            shape,
        });
    }
    Ok((row as usize, col as usize))
}

/// Spread observation-band values over the frame's channels (0 where absent).
fn frame_sed(frame: &Frame, observation: &Observation, values: &[f64]) -> Array1<f64> {
    let mut sed = Array1::<f64>::zeros(frame.num_channels());
    for (index, &value) in frame
        .channel_indices(observation.channels())
        .iter()
        .zip(values)
    {
        if let Some(index) = index {
            sed[*index] = value;
        }
    }
    sed
}

/// Least-squares amplitude of each band against `morph` placed at `bbox`.
fn fit_sed(
    frame: &Frame,
    observation: &Observation,
    morph: &ArrayView2<f64>,
    bbox: BBox,
) -> Array1<f64> {
    let (y0, x0) = (bbox.y0 as usize, bbox.x0 as usize);
    let window = s![y0..y0 + bbox.height, x0..x0 + bbox.width];
    let norm: f64 = morph.iter().map(|m| m * m).sum();

    let amplitudes: Vec<f64> = observation
        .images()
        .axis_iter(Axis(0))
        .map(|band| {
            if norm <= 0.0 {
                return 0.0;
            }
            let dot: f64 = Zip::from(band.slice(window))
                .and(morph)
                .fold(0.0, |acc, &i, &m| acc + i * m);
            (dot / norm).max(0.0)
        })
        .collect();
    frame_sed(frame, observation, &amplitudes)
}

/// Replace every pixel by the minimum of itself and its mirror through `center`.
fn make_symmetric(morph: &mut Array2<f64>, center: (usize, usize)) {
    let (height, width) = morph.dim();
    let source = morph.clone();
    for ((row, col), value) in morph.indexed_iter_mut() {
        let mirror_row = 2 * center.0 as isize - row as isize;
        let mirror_col = 2 * center.1 as isize - col as isize;
        let mirrored = if mirror_row >= 0
            && mirror_col >= 0
            && (mirror_row as usize) < height
            && (mirror_col as usize) < width
        {
            source[[mirror_row as usize, mirror_col as usize]]
        } else {
            0.0
        };
        *value = value.min(mirrored);
    }
}

/// Clamp pixels so flux never rises moving away from `center`.
///
/// Each pixel is limited by its brightest 8-neighbour that is strictly
/// closer to the center, reduced by `min_gradient` (a fraction).
fn make_monotonic(morph: &mut Array2<f64>, center: (usize, usize), min_gradient: f64) {
    let (height, width) = morph.dim();
    let distance = |row: usize, col: usize| {
        let dy = row as f64 - center.0 as f64;
        let dx = col as f64 - center.1 as f64;
        dy * dy + dx * dx
    };

    let mut order: Vec<(usize, usize)> = (0..height)
        .flat_map(|row| (0..width).map(move |col| (row, col)))
        .collect();
    order.sort_by(|a, b| distance(a.0, a.1).total_cmp(&distance(b.0, b.1)));

    for &(row, col) in order.iter().skip(1) {
        let here = distance(row, col);
        let mut reference = 0.0_f64;
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                let (r, c) = (row as isize + dy, col as isize + dx);
                if (dy == 0 && dx == 0)
                    || r < 0
                    || c < 0
                    || r as usize >= height
                    || c as usize >= width
                {
                    continue;
                }
                let (r, c) = (r as usize, c as usize);
                if distance(r, c) < here {
                    reference = reference.max(morph[[r, c]]);
                }
            }
        }
        let limit = reference * (1.0 - min_gradient);
        if morph[[row, col]] > limit {
            morph[[row, col]] = limit;
        }
    }
}
