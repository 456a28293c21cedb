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

use super::{clamp_diagonal, symmetrize, KalmanCore};
use crate::errors::NavError;
use crate::linalg::Matrix;

/// Standard dense-covariance Kalman core with a Joseph-form measurement
/// update, which preserves symmetry and positive semi-definiteness to
/// first order.
#[derive(Debug, Clone)]
pub struct StandardKalman {
    p: Matrix,
    repairs: usize,
}

impl StandardKalman {
    pub fn new(dimension: usize) -> Self {
        Self {
            p: Matrix::zeros(dimension, dimension),
            repairs: 0,
        }
    }

    fn finish_update(&mut self) {
        symmetrize(&mut self.p);
        if clamp_diagonal(&mut self.p) {
            self.repairs += 1;
        } else {
            self.repairs = 0;
        }
    }
}

impl KalmanCore for StandardKalman {
    fn dimension(&self) -> usize {
        self.p.rows()
    }

    fn covariance(&self) -> Matrix {
        self.p.materialize()
    }

    fn set_covariance(&mut self, p: &Matrix) -> Result<(), NavError> {
        if p.rows() != self.p.rows() || !p.is_square() {
            return Err(NavError::DimensionMismatch("covariance shape".to_string()));
        }
        self.p = p.materialize();
        Ok(())
    }

    fn predict(
        &mut self,
        a: &Matrix,
        g: &Matrix,
        q_diag: &[f64],
        dt: f64,
    ) -> Result<(), NavError> {
        let n = self.dimension();
        if a.rows() != n || a.columns() != n || g.rows() != n || g.columns() != q_diag.len() {
            return Err(NavError::DimensionMismatch("predict inputs".to_string()));
        }

        let phi = &Matrix::identity(n) + &(a * dt);
        let q = Matrix::from_diagonal(q_diag);
        let process = &(&(g * &q) * &g.transpose()) * dt;
        self.p = &(&(&phi * &self.p) * &phi.transpose()) + &process;
        self.finish_update();
        Ok(())
    }

    fn correct(&mut self, h: &Matrix, y: &Matrix, r_diag: &[f64]) -> Result<Matrix, NavError> {
        let n = self.dimension();
        let m = h.rows();
        if h.columns() != n || y.rows() != m || y.columns() != 1 || r_diag.len() != m {
            return Err(NavError::DimensionMismatch("correct inputs".to_string()));
        }

        let r = Matrix::from_diagonal(r_diag);
        let ht = h.transpose();
        let s = &(&(h * &self.p) * &ht) + &r;
        let s_inv = s.inverse()?;
        let gain = &(&self.p * &ht) * &s_inv;
        let dx = &gain * y;

        // Joseph form.
        let ikh = &Matrix::identity(n) - &(&gain * h);
        self.p = &(&(&ikh * &self.p) * &ikh.transpose()) + &(&(&gain * &r) * &gain.transpose());
        self.finish_update();

        Ok(dx)
    }

    fn consecutive_repairs(&self) -> usize {
        self.repairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_update_matches_closed_form() {
        let mut kf = StandardKalman::new(1);
        kf.set_covariance(&Matrix::from_slice(1, 1, &[4.0])).unwrap();
        let h = Matrix::from_slice(1, 1, &[1.0]);
        let y = Matrix::from_slice(1, 1, &[2.0]);
        let dx = kf.correct(&h, &y, &[1.0]).unwrap();
        // K = 4/5, dx = 1.6, P' = (1-K)·4 = 0.8.
        assert!((dx.get(0, 0) - 1.6).abs() < 1e-12);
        assert!((kf.covariance().get(0, 0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn covariance_stays_symmetric_psd() {
        let mut kf = StandardKalman::new(3);
        kf.set_covariance(&Matrix::from_diagonal(&[1.0, 2.0, 3.0]))
            .unwrap();
        let a = Matrix::from_slice(3, 3, &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0, -0.2, 0.0, 0.0]);
        let g = Matrix::identity(3);
        for _ in 0..50 {
            kf.predict(&a, &g, &[0.1, 0.1, 0.1], 0.1).unwrap();
        }
        let h = Matrix::from_slice(1, 3, &[1.0, 0.0, 0.0]);
        let y = Matrix::from_slice(1, 1, &[0.5]);
        kf.correct(&h, &y, &[0.25]).unwrap();

        let p = kf.covariance();
        for i in 0..3 {
            assert!(p.get(i, i) >= 0.0);
            for j in 0..3 {
                assert!((p.get(i, j) - p.get(j, i)).abs() < 1e-12);
            }
        }
        assert_eq!(kf.consecutive_repairs(), 0);
    }
}
