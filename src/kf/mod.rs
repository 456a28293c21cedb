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

/*! # Kalman filter cores

Covariance propagation and measurement updates over the error state, in two
interchangeable representations: the standard dense covariance with a
Joseph-form update, and the UD factorization with Thornton/Bierman updates
for poorly conditioned problems. The two representations are never live at
the same time; the engine picks one at construction.

The linearized error dynamics arrive as `A` (error-state dynamics) and `G`
(noise mapping) with a diagonal process noise `Q`; the propagation uses the
first-order transition `Φ = I + A·ΔT` and the process noise contribution
`G·Q·Gᵀ·ΔT`.
*/

use crate::errors::NavError;
use crate::linalg::Matrix;

mod standard;
mod ud;

pub use standard::StandardKalman;
pub use ud::UdKalman;

/// Common surface of the two covariance representations.
pub trait KalmanCore: Clone {
    /// Error-state dimension.
    fn dimension(&self) -> usize;

    /// Materialized covariance (composed from the factors in UD form).
    fn covariance(&self) -> Matrix;

    /// Replaces the covariance.
    fn set_covariance(&mut self, p: &Matrix) -> Result<(), NavError>;

    /// Time update: `P ← Φ P Φᵀ + G Q Gᵀ ΔT` with `Φ = I + A·ΔT`.
    fn predict(&mut self, a: &Matrix, g: &Matrix, q_diag: &[f64], dt: f64)
        -> Result<(), NavError>;

    /// Measurement update with row-diagonal measurement noise; returns the
    /// estimated error-state correction (n×1).
    fn correct(&mut self, h: &Matrix, y: &Matrix, r_diag: &[f64]) -> Result<Matrix, NavError>;

    /// Number of consecutive updates that needed a positive-semi-definite
    /// repair; resets to zero on a clean update.
    fn consecutive_repairs(&self) -> usize;
}

/// Enforces `P = (P + Pᵀ)/2`.
pub(crate) fn symmetrize(p: &mut Matrix) {
    for i in 0..p.rows() {
        for j in (i + 1)..p.columns() {
            let mean = (p.get(i, j) + p.get(j, i)) / 2.0;
            p.set(i, j, mean);
            p.set(j, i, mean);
        }
    }
}

/// Clamps negative diagonal entries to zero, returning whether any entry
/// needed the repair.
pub(crate) fn clamp_diagonal(p: &mut Matrix) -> bool {
    let mut repaired = false;
    for i in 0..p.rows() {
        if p.get(i, i) < 0.0 {
            p.set(i, i, 0.0);
            repaired = true;
        }
    }
    repaired
}
