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

use nalgebra::Vector3;

/// First-order Gauss-Markov drift of the accelerometer and gyroscope
/// biases: `ḃ = -b/τ + w`, with the white driving noise `w` accounted for
/// in the filter process noise rather than here.
///
/// Propagation is first order in `ΔT/τ`, which assumes `ΔT ≪ τ`; at
/// inertial sample rates that holds by orders of magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorBias {
    /// Accelerometer bias estimate, in m/s².
    pub accel: Vector3<f64>,
    /// Gyroscope bias estimate, in rad/s.
    pub gyro: Vector3<f64>,
    /// Accelerometer bias time constant τ_a, in seconds.
    pub tau_accel: f64,
    /// Gyroscope bias time constant τ_g, in seconds.
    pub tau_gyro: f64,
}

impl SensorBias {
    pub fn new(tau_accel: f64, tau_gyro: f64) -> Self {
        Self {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
            tau_accel,
            tau_gyro,
        }
    }

    /// Inverse time constants (β_a, β_g).
    pub fn betas(&self) -> (f64, f64) {
        (1.0 / self.tau_accel, 1.0 / self.tau_gyro)
    }

    pub fn propagate(&mut self, dt: f64) {
        let (beta_a, beta_g) = self.betas();
        self.accel *= 1.0 - beta_a * dt;
        self.gyro *= 1.0 - beta_g * dt;
    }
}

impl Default for SensorBias {
    fn default() -> Self {
        Self::new(100.0, 100.0)
    }
}
