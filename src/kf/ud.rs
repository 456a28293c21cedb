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

use super::KalmanCore;
use crate::errors::NavError;
use crate::linalg::Matrix;

/// UD-factorized Kalman core: the covariance is carried as `P = U D Uᵀ`
/// with `U` unit-upper-triangular and `D` diagonal non-negative. The time
/// update is Thornton's modified weighted Gram-Schmidt; the measurement
/// update is one Bierman rank-one pass per scalar component. Algebraically
/// identical to the standard core, numerically far better behaved when `P`
/// is stiff.
#[derive(Debug, Clone)]
pub struct UdKalman {
    u: Matrix,
    d: Vec<f64>,
    repairs: usize,
}

impl UdKalman {
    pub fn new(dimension: usize) -> Self {
        Self {
            u: Matrix::identity(dimension),
            d: vec![0.0; dimension],
            repairs: 0,
        }
    }

    /// Borrow of the current factors, for invariant checks.
    pub fn factors(&self) -> (&Matrix, &[f64]) {
        (&self.u, &self.d)
    }

    fn account_repair(&mut self, repaired: bool) {
        if repaired {
            self.repairs += 1;
        } else {
            self.repairs = 0;
        }
    }
}

impl KalmanCore for UdKalman {
    fn dimension(&self) -> usize {
        self.d.len()
    }

    fn covariance(&self) -> Matrix {
        let d = Matrix::from_diagonal(&self.d);
        &(&self.u * &d) * &self.u.transpose()
    }

    fn set_covariance(&mut self, p: &Matrix) -> Result<(), NavError> {
        if p.rows() != self.dimension() || !p.is_square() {
            return Err(NavError::DimensionMismatch("covariance shape".to_string()));
        }
        let ud = p.decompose_ud()?;
        let mut repaired = false;
        self.u = ud.u;
        for i in 0..self.dimension() {
            let di = ud.d.get(i, i);
            if di < 0.0 {
                repaired = true;
            }
            self.d[i] = di.max(0.0);
        }
        self.account_repair(repaired);
        Ok(())
    }

    /// Thornton time update: orthogonalize `[Φ·U | G]` against the weights
    /// `[D | Q·ΔT]`.
    fn predict(
        &mut self,
        a: &Matrix,
        g: &Matrix,
        q_diag: &[f64],
        dt: f64,
    ) -> Result<(), NavError> {
        let n = self.dimension();
        let nq = q_diag.len();
        if a.rows() != n || a.columns() != n || g.rows() != n || g.columns() != nq {
            return Err(NavError::DimensionMismatch("predict inputs".to_string()));
        }

        let phi = &Matrix::identity(n) + &(a * dt);
        let phi_u = &phi * &self.u;

        // Working rows of W = [Φ·U | G] and the weight vector.
        let width = n + nq;
        let mut w = vec![vec![0.0; width]; n];
        for (i, row) in w.iter_mut().enumerate() {
            for k in 0..n {
                row[k] = phi_u.get(i, k);
            }
            for k in 0..nq {
                row[n + k] = g.get(i, k);
            }
        }
        let mut dw = vec![0.0; width];
        dw[..n].copy_from_slice(&self.d);
        for k in 0..nq {
            dw[n + k] = q_diag[k] * dt;
        }

        let mut u_new = Matrix::identity(n);
        let mut d_new = vec![0.0; n];
        let mut repaired = false;

        for j in (0..n).rev() {
            let mut dj = 0.0;
            for k in 0..width {
                dj += w[j][k] * dw[k] * w[j][k];
            }
            if dj < 0.0 {
                dj = 0.0;
                repaired = true;
            }
            d_new[j] = dj;
            for i in 0..j {
                let uij = if dj > 0.0 {
                    let mut num = 0.0;
                    for k in 0..width {
                        num += w[i][k] * dw[k] * w[j][k];
                    }
                    num / dj
                } else {
                    0.0
                };
                u_new.set(i, j, uij);
                for k in 0..width {
                    w[i][k] -= uij * w[j][k];
                }
            }
        }

        self.u = u_new;
        self.d = d_new;
        self.account_repair(repaired);
        Ok(())
    }

    /// Sequential Bierman updates, one per measurement row; the running
    /// state correction adjusts each later innovation.
    fn correct(&mut self, h: &Matrix, y: &Matrix, r_diag: &[f64]) -> Result<Matrix, NavError> {
        let n = self.dimension();
        let m = h.rows();
        if h.columns() != n || y.rows() != m || y.columns() != 1 || r_diag.len() != m {
            return Err(NavError::DimensionMismatch("correct inputs".to_string()));
        }

        let mut dx = Matrix::zeros(n, 1);

        for row in 0..m {
            if r_diag[row] <= 0.0 {
                return Err(NavError::DimensionMismatch(
                    "measurement variance must be positive".to_string(),
                ));
            }

            // Innovation adjusted by the corrections already applied.
            let mut y_eff = y.get(row, 0);
            for k in 0..n {
                y_eff -= h.get(row, k) * dx.get(k, 0);
            }

            // f = Uᵀ hᵀ, v = D f.
            let mut f = vec![0.0; n];
            for j in 0..n {
                let mut acc = h.get(row, j);
                for i in 0..j {
                    acc += self.u.get(i, j) * h.get(row, i);
                }
                f[j] = acc;
            }
            let v: Vec<f64> = (0..n).map(|j| self.d[j] * f[j]).collect();

            // With r > 0 and D ≥ 0, alpha stays strictly positive.
            let mut alpha = r_diag[row];
            let mut gain = vec![0.0; n];
            for j in 0..n {
                let alpha_prev = alpha;
                alpha += f[j] * v[j];
                self.d[j] *= alpha_prev / alpha;
                let lambda = -f[j] / alpha_prev;
                for i in 0..j {
                    let temp = self.u.get(i, j);
                    self.u.set(i, j, temp + gain[i] * lambda);
                    gain[i] += v[j] * temp;
                }
                gain[j] += v[j];
            }

            for k in 0..n {
                dx.add_to(k, 0, gain[k] / alpha * y_eff);
            }
        }

        self.account_repair(false);
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
    fn factors_reconstruct_after_roundtrip() {
        let p = Matrix::from_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let mut kf = UdKalman::new(3);
        kf.set_covariance(&p).unwrap();
        assert!(kf.covariance().distance(&p) < 1e-12);
        let (u, d) = kf.factors();
        for i in 0..3 {
            assert_eq!(u.get(i, i), 1.0);
            assert!(d[i] >= 0.0);
            for j in 0..i {
                assert_eq!(u.get(i, j), 0.0);
            }
        }
    }

    #[test]
    fn scalar_update_matches_closed_form() {
        let mut kf = UdKalman::new(1);
        kf.set_covariance(&Matrix::from_slice(1, 1, &[4.0])).unwrap();
        let h = Matrix::from_slice(1, 1, &[1.0]);
        let y = Matrix::from_slice(1, 1, &[2.0]);
        let dx = kf.correct(&h, &y, &[1.0]).unwrap();
        assert!((dx.get(0, 0) - 1.6).abs() < 1e-12);
        assert!((kf.covariance().get(0, 0) - 0.8).abs() < 1e-12);
    }
}
