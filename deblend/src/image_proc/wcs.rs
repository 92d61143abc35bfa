//! World coordinate mapping for image stacks.
//!
//! Gnomonic (TAN) projection between pixel coordinates and sky coordinates
//! (RA, Dec in degrees). Pixel coordinates are zero-based with `x` along
//! columns and `y` along rows.

use serde::{Deserialize, Serialize};

/// Tangent-plane world coordinate system.
///
/// 1. Pixel to intermediate: `(xi, eta) = CD × (x - CRPIX1, y - CRPIX2)`
/// 2. Intermediate to sky: de-project from the tangent plane at CRVAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wcs {
    /// Reference pixel (x, y)
    pub crpix: (f64, f64),
    /// Reference sky position (RA, Dec) in degrees
    pub crval: (f64, f64),
    /// Pixel offset to intermediate coordinates (degrees per pixel)
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Self {
        Self { crpix, crval, cd }
    }

    /// Axis-aligned WCS with square pixels of `scale_deg` degrees.
    ///
    /// RA increases towards decreasing `x`, following the usual sky orientation.
    pub fn from_scale(crpix: (f64, f64), crval: (f64, f64), scale_deg: f64) -> Self {
        Self::new(crpix, crval, [[-scale_deg, 0.0], [0.0, scale_deg]])
    }

    /// Convert pixel coordinates to (RA, Dec) in degrees.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix.0;
        let dy = y - self.crpix.1;

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval.0.to_radians();
        let dec0 = self.crval.1.to_radians();

        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi.powi(2) + denom.powi(2)).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Convert (RA, Dec) in degrees to pixel coordinates.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let dec_rad = dec.to_radians();
        let dec0 = self.crval.1.to_radians();
        let delta_ra = ra.to_radians() - self.crval.0.to_radians();

        let (sin_dec, cos_dec) = dec_rad.sin_cos();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = delta_ra.sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;

        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        debug_assert!(det.abs() > 1e-15, "CD matrix is singular (det = {det})");

        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;

        (self.crpix.0 + dx, self.crpix.1 + dy)
    }

    /// Map a pixel position of this WCS onto the pixel grid of `other`.
    pub fn convert_to(&self, other: &Wcs, x: f64, y: f64) -> (f64, f64) {
        let (ra, dec) = self.pixel_to_sky(x, y);
        other.sky_to_pixel(ra, dec)
    }

    /// Mean pixel scale in arcseconds.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[0][0].powi(2) + self.cd[1][0].powi(2)).sqrt();
        let scale_y = (self.cd[0][1].powi(2) + self.cd[1][1].powi(2)).sqrt();
        ((scale_x + scale_y) / 2.0) * 3600.0
    }
}
