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

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// Returns the tilde matrix (cross-product skew matrix) from the provided Vector3.
pub fn tilde_matrix(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}

/// Returns the provided angle bounded between -π and +π radians.
pub fn between_pm_pi(angle: f64) -> f64 {
    let mut bounded = angle;
    while bounded > PI {
        bounded -= 2.0 * PI;
    }
    while bounded < -PI {
        bounded += 2.0 * PI;
    }
    bounded
}

pub fn deg2rad(deg: f64) -> f64 {
    deg * PI / 180.0
}

pub fn rad2deg(rad: f64) -> f64 {
    rad * 180.0 / PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_is_cross_product() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 4.0, -1.0);
        let diff = tilde_matrix(&a) * b - a.cross(&b);
        assert!(diff.norm() < 1e-15);
    }

    #[test]
    fn angle_bounding() {
        assert!((between_pm_pi(3.0 * PI) - PI).abs() < 1e-12);
        assert!((between_pm_pi(-3.0 * PI) + PI).abs() < 1e-12);
        assert!((between_pm_pi(0.5) - 0.5).abs() < 1e-15);
    }
}
