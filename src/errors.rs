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

use crate::linalg::LinalgError;
use thiserror::Error;

/// Represents all possible errors that can occur in the Erebus engine.
#[derive(Error, Debug, PartialEq)]
pub enum NavError {
    /// Occurs when mutually exclusive options are requested, e.g. back-propagation together with realtime synchronization.
    #[error("Conflicting configuration: {0}")]
    ConfigConflict(String),

    /// Occurs when a matrix inversion or LU factorization hits a zero pivot that no exchange can fix.
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    /// Occurs when the eigenvalue or eigenvector iteration does not converge.
    #[error("Eigen decomposition did not converge")]
    EigenNotConverged,

    /// Occurs when the covariance matrix has a negative diagonal entry after an update.
    #[error("Covariance is not positive semi definite")]
    CovarianceNotPsd,

    /// Occurs when a packet arrives before the filter has been initialized.
    #[error("Filter state is not initialized")]
    StateNotInitialized,

    /// Occurs when an inertial packet is older than the filter clock outside of week rollover handling.
    #[error("Time update out of order: dT = {0} s")]
    TimeOutOfOrder(f64),

    /// Occurs when the innovation exceeds the rejection gate repeatedly, or when PSD repairs pile up.
    #[error("Filter diverged: {0}")]
    FilterDiverged(String),

    /// Occurs when a measurement or state vector does not have the expected dimension.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Occurs when the output stream cannot be written.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Converts a `LinalgError` into a `NavError`.
impl From<LinalgError> for NavError {
    fn from(e: LinalgError) -> Self {
        match e {
            LinalgError::Singular(op) => NavError::SingularMatrix(op),
            LinalgError::EigenNotConverged | LinalgError::NotFinite => NavError::EigenNotConverged,
            LinalgError::NotSymmetric | LinalgError::NotSquare => {
                NavError::DimensionMismatch("symmetric square matrix expected".to_string())
            }
            LinalgError::SizeMismatch(op) => NavError::DimensionMismatch(op),
        }
    }
}
