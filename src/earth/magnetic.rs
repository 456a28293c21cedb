/*
    Erebus, blazing fast INS/GPS sensor fusion
    Copyright (C) 2021-onwards Christopher Rabotin <christopher.rabotin@gmail.com>

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Degree-one geomagnetic field model (tilted dipole), sufficient for the
//! magnetic heading auxiliary which only consumes the horizontal field
//! direction.

use super::WGS84_A;
use nalgebra::Vector3;

/// IGRF-13 epoch 2020.0 degree-one coefficients, in nT.
pub const IGRF2020_G10: f64 = -29_404.8;
pub const IGRF2020_G11: f64 = -1_450.9;
pub const IGRF2020_H11: f64 = 4_652.5;

/// Dipole field coefficients.
#[derive(Debug, Clone, Copy)]
pub struct DipoleField {
    pub g10: f64,
    pub g11: f64,
    pub h11: f64,
}

impl Default for DipoleField {
    fn default() -> Self {
        Self {
            g10: IGRF2020_G10,
            g11: IGRF2020_G11,
            h11: IGRF2020_H11,
        }
    }
}

impl DipoleField {
    /// Field components in the local north-east-down frame, in nT, at the
    /// provided geodetic position. The latitude is used as a spherical
    /// colatitude proxy, which is plenty for a heading reference.
    pub fn field_components(&self, latitude: f64, longitude: f64, height: f64) -> Vector3<f64> {
        let theta = std::f64::consts::FRAC_PI_2 - latitude;
        let r = WGS84_A + height;
        let ar3 = (WGS84_A / r).powi(3);
        let g_lon = self.g11 * longitude.cos() + self.h11 * longitude.sin();

        let b_r = 2.0 * ar3 * (self.g10 * theta.cos() + g_lon * theta.sin());
        let b_theta = ar3 * (self.g10 * theta.sin() - g_lon * theta.cos());
        let b_lambda = -ar3 * (self.h11 * longitude.cos() - self.g11 * longitude.sin());

        // North = -B_θ (θ̂ points south), East = B_λ, Down = -B_r.
        Vector3::new(-b_theta, b_lambda, -b_r)
    }

    /// Magnetic declination (angle from true north to the horizontal field
    /// vector, positive east), in radians.
    pub fn declination(&self, latitude: f64, longitude: f64, height: f64) -> f64 {
        let field = self.field_components(latitude, longitude, height);
        field[1].atan2(field[0])
    }
}
