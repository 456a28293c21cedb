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

/// Result of an LU factorization with column pivoting:
/// `L · U = A · Π`, where column `k` of `A · Π` is column `pivot[k]` of `A`.
#[derive(Debug, Clone)]
pub struct LuDecomposition<T: MatElem> {
    /// Unit-lower-triangular factor.
    pub l: Matrix<T>,
    /// Upper-triangular factor.
    pub u: Matrix<T>,
    /// Column permutation.
    pub pivot: Vec<usize>,
    /// Number of exchanges performed (sign of the permutation).
    pub exchanges: usize,
}

impl<T: MatElem> LuDecomposition<T> {
    /// Resolves `x` of `(A·Π) x = y` by forward/backward substitution.
    pub fn solve(&self, y: &Matrix<T>) -> Result<Matrix<T>, LinalgError> {
        let n = self.l.rows();
        if y.columns() != 1 || y.rows() != n {
            return Err(LinalgError::SizeMismatch("LU solve rhs".to_string()));
        }

        // L y' = y
        let mut y_copy = y.materialize();
        let mut y_prime = Matrix::zeros(n, 1);
        for i in 0..n {
            let v = y_copy.get(i, 0) / self.l.get(i, i);
            y_prime.set(i, 0, v);
            for j in (i + 1)..n {
                let upd = y_copy.get(j, 0) - self.l.get(j, i) * v;
                y_copy.set(j, 0, upd);
            }
        }

        // U x = y'
        let mut x = Matrix::zeros(n, 1);
        for i in (0..n).rev() {
            let v = y_prime.get(i, 0) / self.u.get(i, i);
            x.set(i, 0, v);
            for j in 0..i {
                let upd = y_prime.get(j, 0) - self.u.get(j, i) * v;
                y_prime.set(j, 0, upd);
            }
        }

        Ok(x)
    }
}

/// Result of a UD factorization of a symmetric PSD matrix:
/// `P = U · D · Uᵀ` with `U` unit-upper-triangular and `D` diagonal.
#[derive(Debug, Clone)]
pub struct UdDecomposition<T: MatElem> {
    pub u: Matrix<T>,
    pub d: Matrix<T>,
}

impl<T: MatElem> UdDecomposition<T> {
    /// Rebuilds `U · D · Uᵀ`.
    pub fn compose(&self) -> Matrix<T> {
        &(&self.u * &self.d) * &self.u.transpose()
    }
}

impl<T: MatElem> Matrix<T> {
    /// Performs the LU factorization with partial (column exchange)
    /// pivoting via Gaussian elimination.
    ///
    /// Fails `Singular` when a zero pivot row cannot be fixed by any
    /// column exchange. Tolerant of view-wrapped inputs; the factors are
    /// materialized.
    pub fn decompose_lup(&self) -> Result<LuDecomposition<T>, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare);
        }
        let n = self.rows();
        let mut l = Matrix::identity(n);
        let mut u = self.materialize();
        let mut pivot: Vec<usize> = (0..n).collect();
        let mut exchanges = 0;

        for i in 0..n {
            if u.get(i, i) == T::zero() {
                let mut j = i;
                loop {
                    j += 1;
                    if j == n {
                        return Err(LinalgError::Singular("LU decomposition".to_string()));
                    }
                    if u.get(i, j) != T::zero() {
                        break;
                    }
                }
                u.exchange_columns(i, j)?;
                pivot.swap(i, j);
                exchanges += 1;
            }
            for i2 in (i + 1)..n {
                let factor = u.get(i2, i) / u.get(i, i);
                l.set(i2, i, factor);
                u.set(i2, i, T::zero());
                for j2 in (i + 1)..n {
                    let upd = u.get(i2, j2) - factor * u.get(i, j2);
                    u.set(i2, j2, upd);
                }
            }
        }

        Ok(LuDecomposition {
            l,
            u,
            pivot,
            exchanges,
        })
    }

    /// Calculates the determinant through the LU factorization.
    pub fn determinant(&self) -> Result<T, LinalgError> {
        let lu = self.decompose_lup()?;
        let mut det = if lu.exchanges % 2 == 0 {
            T::one()
        } else {
            -T::one()
        };
        for i in 0..self.rows() {
            det *= lu.l.get(i, i) * lu.u.get(i, i);
        }
        Ok(det)
    }

    /// Performs the UD factorization of a symmetric matrix, recursing from
    /// the bottom right corner up.
    pub fn decompose_ud(&self) -> Result<UdDecomposition<T>, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare);
        }
        if !self.is_symmetric() {
            return Err(LinalgError::NotSymmetric);
        }
        let n = self.rows();
        let mut p = self.materialize();
        let mut u = Matrix::zeros(n, n);
        let mut d = Matrix::zeros(n, n);

        for i in (0..n).rev() {
            let dii = p.get(i, i);
            d.set(i, i, dii);
            u.set(i, i, T::one());
            for j in 0..i {
                let uji = if dii == T::zero() {
                    T::zero()
                } else {
                    p.get(j, i) / dii
                };
                u.set(j, i, uji);
                for k in 0..=j {
                    let upd = p.get(k, j) - u.get(k, i) * dii * uji;
                    p.set(k, j, upd);
                }
            }
        }

        Ok(UdDecomposition { u, d })
    }

    /// Calculates the inverse by Gauss-Jordan elimination with row
    /// exchanges; fails `Singular` when a zero pivot cannot be eliminated
    /// by any row exchange.
    pub fn inverse(&self) -> Result<Matrix<T>, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare);
        }
        let n = self.rows();
        let mut left = self.materialize();
        let mut right = Matrix::identity(n);

        for i in 0..n {
            if left.get(i, i) == T::zero() {
                let mut i2 = i;
                loop {
                    i2 += 1;
                    if i2 == n {
                        return Err(LinalgError::Singular("inverse".to_string()));
                    }
                    if left.get(i2, i) != T::zero() {
                        break;
                    }
                }
                left.exchange_rows(i, i2)?;
                right.exchange_rows(i, i2)?;
            }
            let pivot = left.get(i, i);
            if pivot != T::one() {
                for j in 0..n {
                    let v = right.get(i, j) / pivot;
                    right.set(i, j, v);
                }
                for j in (i + 1)..n {
                    let v = left.get(i, j) / pivot;
                    left.set(i, j, v);
                }
                left.set(i, i, T::one());
            }
            for k in 0..n {
                if k == i {
                    continue;
                }
                let factor = left.get(k, i);
                if factor != T::zero() {
                    for j in 0..n {
                        let v = right.get(k, j) - right.get(i, j) * factor;
                        right.set(k, j, v);
                    }
                    for j in (i + 1)..n {
                        let v = left.get(k, j) - left.get(i, j) * factor;
                        left.set(k, j, v);
                    }
                    left.set(k, i, T::zero());
                }
            }
        }

        Ok(right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_without_pivoting() {
        let a = Matrix::from_slice(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]);
        let lu = a.decompose_lup().unwrap();
        assert_eq!(lu.exchanges, 0);
        let recomposed = &lu.l * &lu.u;
        assert!(recomposed.distance(&a) < 1e-12);
    }

    #[test]
    fn lu_with_pivoting() {
        // Zero leading pivot forces a column exchange.
        let a = Matrix::from_slice(3, 3, &[0.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]);
        let lu = a.decompose_lup().unwrap();
        assert!(lu.exchanges > 0);
        // L·U must equal A with its columns permuted by the pivot.
        let permuted = Matrix::from_fn(3, 3, |i, k| a.get(i, lu.pivot[k]));
        let recomposed = &lu.l * &lu.u;
        assert!(recomposed.distance(&permuted) < 1e-12);
    }

    #[test]
    fn lu_solve() {
        let a = Matrix::from_slice(2, 2, &[3.0, 1.0, 1.0, 2.0]);
        let y = Matrix::from_slice(2, 1, &[9.0, 8.0]);
        let x = a.decompose_lup().unwrap().solve(&y).unwrap();
        assert!((x.get(0, 0) - 2.0).abs() < 1e-12);
        assert!((x.get(1, 0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn determinant_with_and_without_exchange() {
        let a = Matrix::from_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert!((a.determinant().unwrap() + 2.0).abs() < 1e-12);
        let b = Matrix::from_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        assert!((b.determinant().unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn ud_recomposes() {
        // Symmetric positive definite.
        let a = Matrix::from_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let ud = a.decompose_ud().unwrap();
        assert!(ud.compose().distance(&a) < 1e-12);
        // U unit-upper-triangular, D diagonal non-negative.
        for i in 0..3 {
            assert_eq!(ud.u.get(i, i), 1.0);
            assert!(ud.d.get(i, i) >= 0.0);
            for j in 0..i {
                assert_eq!(ud.u.get(i, j), 0.0);
                if i != j {
                    assert_eq!(ud.d.get(i, j), 0.0);
                }
            }
        }
    }

    #[test]
    fn inverse_roundtrip() {
        let a = Matrix::from_slice(3, 3, &[2.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let inv = a.inverse().unwrap();
        let eye = &a * &inv;
        assert!(eye.distance(&Matrix::identity(3)) < 1e-12);
    }

    #[test]
    fn inverse_singular() {
        let a = Matrix::from_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(matches!(a.inverse(), Err(LinalgError::Singular(_))));
    }
}
