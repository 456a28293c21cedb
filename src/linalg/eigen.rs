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

use super::{LinalgError, MatElem, Matrix};
use nalgebra::Complex;

/// Default absolute convergence threshold of the QR iteration.
pub const EIGEN_THRESHOLD_ABS: f64 = 1e-10;
/// Default relative convergence threshold of the QR iteration.
pub const EIGEN_THRESHOLD_REL: f64 = 1e-7;

/// Eigenvalues and eigenvectors of a real square matrix. Eigenvalues may be
/// complex; `vectors` holds one unit-norm eigenvector per column, in the
/// same order as `values`.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub values: Vec<Complex<f64>>,
    pub vectors: Matrix<Complex<f64>>,
}

impl Matrix<f64> {
    /// Reduces this matrix to upper-Hessenberg form by Householder
    /// reflections. When `transform` is provided, the accumulated product
    /// of the reflectors is stored into it, so that
    /// `transform · H · transformᵀ = A`.
    pub fn hessenberg(&self, mut transform: Option<&mut Matrix<f64>>) -> Result<Self, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare);
        }
        let n = self.rows();
        let mut result = self.materialize();

        for j in 0..n.saturating_sub(2) {
            let mut t = 0.0;
            for i in (j + 1)..n {
                t += result.get(i, j).powi(2);
            }
            let mut s = t.sqrt();
            if result.get(j + 1, j) < 0.0 {
                s = -s;
            }

            let mut omega = Matrix::zeros(n - (j + 1), 1);
            for i in 0..omega.rows() {
                omega.set(i, 0, result.get(j + i + 1, j));
            }
            omega.add_to(0, 0, s);

            let mut p = Matrix::identity(n);
            let denom = t + result.get(j + 1, j) * s;
            if denom != 0.0 {
                let reflector = &(&omega * &omega.transpose()) / -denom;
                p.pivot_merge(j + 1, j + 1, &reflector);
            }

            result = &(&p * &result) * &p;
            if let Some(tr) = transform.as_deref_mut() {
                *tr = &*tr * &p;
            }
        }

        // Scrub round-off below the first subdiagonal.
        let sym = self.is_symmetric();
        for j in 0..n.saturating_sub(2) {
            for i in (j + 2)..n {
                result.set(i, j, 0.0);
                if sym {
                    result.set(j, i, 0.0);
                }
            }
        }

        Ok(result)
    }

    /// Eigenvalues of the 2×2 sub-block whose upper left corner is at
    /// `(row, column)`.
    pub fn eigen22(&self, row: usize, column: usize) -> (Complex<f64>, Complex<f64>) {
        let a = self.get(row, column);
        let b = self.get(row, column + 1);
        let c = self.get(row + 1, column);
        let d = self.get(row + 1, column + 1);
        let root2 = (a - d).powi(2) + b * c * 4.0;
        if root2 > 0.0 {
            let root = root2.sqrt();
            (
                Complex::new((a + d + root) / 2.0, 0.0),
                Complex::new((a + d - root) / 2.0, 0.0),
            )
        } else {
            let root = (-root2).sqrt();
            (
                Complex::new((a + d) / 2.0, root / 2.0),
                Complex::new((a + d) / 2.0, -root / 2.0),
            )
        }
    }

    /// Calculates eigenvalues by the double-shift QR method on the
    /// Hessenberg form, then eigenvectors by inverse iteration.
    ///
    /// Convergence of a trailing eigenvalue requires
    /// `|A(m-1,m-2)| < ε_abs + ε_rel · min(|A(m-1,m-1)|, |A(m-2,m-2)|)`.
    /// Fails after 100 inverse-iteration loops for any vector, or when a
    /// non-finite intermediate shows up.
    pub fn eigen(&self) -> Result<EigenDecomposition, LinalgError> {
        self.eigen_with_thresholds(EIGEN_THRESHOLD_ABS, EIGEN_THRESHOLD_REL)
    }

    pub fn eigen_with_thresholds(
        &self,
        threshold_abs: f64,
        threshold_rel: f64,
    ) -> Result<EigenDecomposition, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare);
        }
        let n = self.rows();
        if n == 0 {
            return Err(LinalgError::NotSquare);
        }

        let mut transform = Matrix::identity(n);
        let a_hess = self.hessenberg(Some(&mut transform))?;
        let mut a = a_hess.materialize();

        let mut lambda = vec![Complex::new(0.0, 0.0); n];
        let mut m = n;
        let mut first = true;
        let mut mu_sum = 0.0;
        let mut mu_multi = 0.0;
        let mut p1 = Complex::new(0.0, 0.0);
        let mut p2 = Complex::new(0.0, 0.0);

        let mut sweeps = 0usize;
        loop {
            if m == 1 {
                lambda[0] = Complex::new(a.get(0, 0), 0.0);
                break;
            } else if m == 2 {
                let (up, lo) = a.eigen22(0, 0);
                lambda[0] = up;
                lambda[1] = lo;
                break;
            }

            sweeps += 1;
            if sweeps > 100 * n {
                return Err(LinalgError::EigenNotConverged);
            }

            // Double-shift selection from the trailing 2x2 block.
            {
                let (p1_new, p2_new) = a.eigen22(m - 2, m - 2);
                if first {
                    first = false;
                } else if (p1_new - p1).norm() > p1_new.norm() / 2.0 {
                    if (p2_new - p2).norm() > p2_new.norm() / 2.0 {
                        mu_sum = (p1 + p2).re;
                        mu_multi = (p1 * p2).re;
                    } else {
                        mu_sum = p2_new.re * 2.0;
                        mu_multi = p2_new.re.powi(2);
                    }
                } else if (p2_new - p2).norm() > p2_new.norm() / 2.0 {
                    mu_sum = p1_new.re * 2.0;
                    mu_multi = p1_new.re * p1_new.re;
                } else {
                    mu_sum = (p1_new + p2_new).re;
                    mu_multi = (p1_new * p2_new).re;
                }
                p1 = p1_new;
                p2 = p2_new;
            }

            // Chase the bulge with Householder reflections.
            for i in 0..(m - 1) {
                let (b1, b2, b3) = if i == 0 {
                    (
                        a.get(0, 0) * a.get(0, 0) - mu_sum * a.get(0, 0)
                            + mu_multi
                            + a.get(0, 1) * a.get(1, 0),
                        a.get(1, 0) * (a.get(0, 0) + a.get(1, 1) - mu_sum),
                        a.get(2, 1) * a.get(1, 0),
                    )
                } else {
                    (
                        a.get(i, i - 1),
                        a.get(i + 1, i - 1),
                        if i == m - 2 { 0.0 } else { a.get(i + 2, i - 1) },
                    )
                };

                let r = (b1 * b1 + b2 * b2 + b3 * b3).sqrt();

                let mut omega = Matrix::zeros(3, 1);
                omega.set(0, 0, b1 + r * if b1 >= 0.0 { 1.0 } else { -1.0 });
                omega.set(1, 0, b2);
                if b3 != 0.0 {
                    omega.set(2, 0, b3);
                }

                let mut p = Matrix::identity(n);
                let denom = (&omega.transpose() * &omega).get(0, 0);
                if denom != 0.0 {
                    p.pivot_merge(i, i, &(&(&omega * &omega.transpose()) * (-2.0 / denom)));
                }

                a = &(&p * &a) * &p;
            }

            let trailing = a.get(m - 1, m - 2);
            if !trailing.is_finite() {
                return Err(LinalgError::NotFinite);
            }

            let a_m2 = a.get(m - 2, m - 2).abs();
            let a_m1 = a.get(m - 1, m - 1).abs();
            let epsilon = threshold_abs + threshold_rel * a_m2.min(a_m1);

            if trailing.abs() < epsilon {
                m -= 1;
                lambda[m] = Complex::new(a.get(m, m), 0.0);
            } else if a.get(m - 2, m - 3).abs() < epsilon {
                let (up, lo) = a.eigen22(m - 2, m - 2);
                lambda[m - 1] = up;
                lambda[m - 2] = lo;
                m -= 2;
            }
        }

        // Eigenvectors of the Hessenberg matrix by inverse iteration,
        // rotated back through the accumulated Householder transform.
        let a_c: Matrix<Complex<f64>> = a_hess.map(|v| Complex::new(v, 0.0));
        let mut x: Matrix<Complex<f64>> = Matrix::identity(n);

        for j in 0..n {
            let mut a_shifted = a_c.materialize();
            let mut approx_lambda = lambda[j];
            if (a_shifted.get(j, j) - approx_lambda).norm() <= 1e-3 {
                approx_lambda += Complex::new(2e-3, 0.0);
            }
            for i in 0..n {
                let v = a_shifted.get(i, i) - approx_lambda;
                a_shifted.set(i, i, v);
            }
            let lu = a_shifted.decompose_lup()?;

            let mut target: Matrix<Complex<f64>> = x.column_vector(j)?.materialize();
            let mut loops = 0usize;
            loop {
                let target_new = lu.solve(&target)?;
                let mu = (&target_new.transpose() * &target).get(0, 0).norm_sqr();
                let v2 = (&target_new.transpose() * &target_new).get(0, 0).norm_sqr();
                let v2s = v2.sqrt();
                for i in 0..n {
                    target.set(i, 0, target_new.get(i, 0) / Complex::new(v2s, 0.0));
                }
                if (1.0 - mu * mu / v2) < 1.1 {
                    for i in 0..n {
                        x.set(i, j, target.get(i, 0));
                    }
                    break;
                }
                loops += 1;
                if loops > 100 {
                    return Err(LinalgError::EigenNotConverged);
                }
            }
        }

        let transform_c: Matrix<Complex<f64>> = transform.map(|v| Complex::new(v, 0.0));
        let mut vectors = &transform_c * &x;
        for j in 0..n {
            let mut norm2 = 0.0;
            for i in 0..n {
                norm2 += vectors.get(i, j).norm_sqr();
            }
            let norm = Complex::new(norm2.sqrt(), 0.0);
            for i in 0..n {
                let v = vectors.get(i, j) / norm;
                vectors.set(i, j, v);
            }
        }

        Ok(EigenDecomposition {
            values: lambda,
            vectors,
        })
    }

    /// Calculates the principal square root through the eigen
    /// decomposition: `A^½ = V · D^½ · V⁻¹`.
    pub fn sqrtm(&self) -> Result<Matrix<Complex<f64>>, LinalgError> {
        let eig = self.eigen()?;
        let n = self.rows();
        let v_inv = eig.vectors.inverse()?;
        let mut v_scaled = eig.vectors.materialize();
        for j in 0..n {
            let root = eig.values[j].sqrt_elem();
            for i in 0..n {
                let val = v_scaled.get(i, j) * root;
                v_scaled.set(i, j, val);
            }
        }
        Ok(&v_scaled * &v_inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eigen22_complex_pair() {
        // Rotation-like block: purely imaginary pair.
        let a = Matrix::from_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]);
        let (up, lo) = a.eigen22(0, 0);
        assert!((up - Complex::new(0.0, 1.0)).norm() < 1e-12);
        assert!((lo - Complex::new(0.0, -1.0)).norm() < 1e-12);
    }

    #[test]
    fn hessenberg_shape_and_similarity() {
        let a = Matrix::from_slice(
            4,
            4,
            &[
                4.0, 1.0, -2.0, 2.0, 1.0, 2.0, 0.0, 1.0, -2.0, 0.0, 3.0, -2.0, 2.0, 1.0, -2.0,
                -1.0,
            ],
        );
        let mut tr = Matrix::identity(4);
        let h = a.hessenberg(Some(&mut tr)).unwrap();
        for j in 0..2 {
            for i in (j + 2)..4 {
                assert_eq!(h.get(i, j), 0.0);
            }
        }
        // transform · H · transformᵀ recomposes A (Householder products are orthogonal).
        let recomposed = &(&tr * &h) * &tr.transpose();
        assert!(recomposed.distance(&a) < 1e-9);
    }
}
