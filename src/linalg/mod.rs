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

/*! # Dense matrix kernel

Run-time sized dense matrices backed by reference-counted storage with
composable views. A `clone()` is shallow: it shares the underlying buffer.
Views (transpose, partial window) are cheap projections which redefine the
shape and the element accessor without copying data; they are normalized to
a canonical `partial ∘ transpose` composition at construction. Mutating an
element of a matrix whose buffer is shared detaches a private deep copy
first, so two handles onto the same storage never observe each other's
writes.

The filter dimension (10 or 16 error states) is only known once the engine
is configured, hence a run-time sized kernel rather than `nalgebra` static
matrices, which serve all fixed-size 3-D kinematics in this crate.
*/

use nalgebra::Complex;
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::rc::Rc;
use thiserror::Error;

mod decompose;
mod eigen;

pub use decompose::{LuDecomposition, UdDecomposition};
pub use eigen::EigenDecomposition;

/// Errors raised by the matrix kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinalgError {
    /// The operation requires a square matrix.
    #[error("matrix is not square")]
    NotSquare,

    /// The operation requires a symmetric matrix.
    #[error("matrix is not symmetric")]
    NotSymmetric,

    /// The operands do not have compatible dimensions.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// A zero pivot could not be eliminated by an exchange.
    #[error("singular matrix in {0}")]
    Singular(String),

    /// The QR or inverse iteration did not converge.
    #[error("eigen decomposition did not converge")]
    EigenNotConverged,

    /// A non-finite intermediate value was produced.
    #[error("non-finite intermediate value")]
    NotFinite,
}

/// Scalar element of a [`Matrix`]. Implemented for `f64` and `Complex<f64>`,
/// which is all the eigen solver needs.
pub trait MatElem:
    Copy
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
{
    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(v: f64) -> Self;
    /// Modulus of the element.
    fn norm(self) -> f64;
    fn sqrt_elem(self) -> Self;
    fn is_finite_elem(self) -> bool;
}

impl MatElem for f64 {
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn norm(self) -> f64 {
        self.abs()
    }
    fn sqrt_elem(self) -> Self {
        self.sqrt()
    }
    fn is_finite_elem(self) -> bool {
        self.is_finite()
    }
}

impl MatElem for Complex<f64> {
    fn zero() -> Self {
        Complex::new(0.0, 0.0)
    }
    fn one() -> Self {
        Complex::new(1.0, 0.0)
    }
    fn from_f64(v: f64) -> Self {
        Complex::new(v, 0.0)
    }
    fn norm(self) -> f64 {
        Complex::norm(self)
    }
    fn sqrt_elem(self) -> Self {
        self.sqrt()
    }
    fn is_finite_elem(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

/// View descriptor, already normalized: the partial window applies to the
/// (possibly) transposed base, so composing views in any order folds into
/// this single canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct View {
    rows: usize,
    columns: usize,
    row_offset: usize,
    column_offset: usize,
    transposed: bool,
}

/// A dense 2-D matrix with shared storage and composable views.
#[derive(Debug, Clone)]
pub struct Matrix<T: MatElem = f64> {
    storage: Rc<Vec<T>>,
    /// Physical shape of the storage, independent of any view.
    store_rows: usize,
    store_columns: usize,
    view: View,
}

impl<T: MatElem> Matrix<T> {
    /// Builds a zero-filled matrix of the provided shape.
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Self {
            storage: Rc::new(vec![T::zero(); rows * columns]),
            store_rows: rows,
            store_columns: columns,
            view: View {
                rows,
                columns,
                row_offset: 0,
                column_offset: 0,
                transposed: false,
            },
        }
    }

    /// Builds a matrix from row-major serialized values.
    pub fn from_slice(rows: usize, columns: usize, serialized: &[T]) -> Self {
        assert_eq!(rows * columns, serialized.len(), "serialized length");
        let mut m = Self::zeros(rows, columns);
        Rc::make_mut(&mut m.storage).copy_from_slice(serialized);
        m
    }

    pub fn from_fn<F: FnMut(usize, usize) -> T>(rows: usize, columns: usize, mut f: F) -> Self {
        let mut m = Self::zeros(rows, columns);
        for i in 0..rows {
            for j in 0..columns {
                m.set(i, j, f(i, j));
            }
        }
        m
    }

    /// Builds a scalar matrix: `value` on the diagonal, zero elsewhere.
    pub fn scalar(size: usize, value: T) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.set(i, i, value);
        }
        m
    }

    /// Builds an identity matrix.
    pub fn identity(size: usize) -> Self {
        Self::scalar(size, T::one())
    }

    /// Builds a square matrix with the provided diagonal.
    pub fn from_diagonal(diag: &[T]) -> Self {
        let mut m = Self::zeros(diag.len(), diag.len());
        for (i, v) in diag.iter().enumerate() {
            m.set(i, i, *v);
        }
        m
    }

    pub const fn rows(&self) -> usize {
        self.view.rows
    }

    pub const fn columns(&self) -> usize {
        self.view.columns
    }

    /// Whether this handle shares its storage with another handle.
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.storage) > 1
    }

    /// Whether this matrix is a projection rather than a plain storage handle.
    pub fn is_view(&self) -> bool {
        self.view.transposed
            || self.view.row_offset != 0
            || self.view.column_offset != 0
            || self.view.rows != self.store_rows
            || self.view.columns != self.store_columns
    }

    fn storage_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.view.rows && j < self.view.columns, "index incorrect");
        let (pi, pj) = (i + self.view.row_offset, j + self.view.column_offset);
        let (si, sj) = if self.view.transposed { (pj, pi) } else { (pi, pj) };
        si * self.store_columns + sj
    }

    pub fn get(&self, i: usize, j: usize) -> T {
        self.storage[self.storage_index(i, j)]
    }

    /// Sets one element. If the storage is shared with another handle, a
    /// private deep copy is detached first.
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        let idx = self.storage_index(i, j);
        Rc::make_mut(&mut self.storage)[idx] = value;
    }

    pub fn add_to(&mut self, i: usize, j: usize, value: T) {
        let idx = self.storage_index(i, j);
        Rc::make_mut(&mut self.storage)[idx] += value;
    }

    /// Materializes this matrix into fresh, view-less, unshared storage.
    pub fn materialize(&self) -> Self {
        let mut out = Self::zeros(self.rows(), self.columns());
        for i in 0..self.rows() {
            for j in 0..self.columns() {
                out.set(i, j, self.get(i, j));
            }
        }
        out
    }

    /// Returns the transpose as a view: no data is copied and the result
    /// shares this matrix's storage.
    pub fn transpose(&self) -> Self {
        let mut t = self.clone();
        t.view = View {
            rows: self.view.columns,
            columns: self.view.rows,
            row_offset: self.view.column_offset,
            column_offset: self.view.row_offset,
            transposed: !self.view.transposed,
        };
        t
    }

    /// Returns a partial window view of the provided shape with its upper
    /// left corner at `(row_offset, column_offset)`. Shares storage.
    pub fn partial(
        &self,
        rows: usize,
        columns: usize,
        row_offset: usize,
        column_offset: usize,
    ) -> Result<Self, LinalgError> {
        if rows + row_offset > self.rows() || columns + column_offset > self.columns() {
            return Err(LinalgError::SizeMismatch(format!(
                "partial {rows}x{columns}+({row_offset},{column_offset}) exceeds {}x{}",
                self.rows(),
                self.columns()
            )));
        }
        let mut p = self.clone();
        p.view.rows = rows;
        p.view.columns = columns;
        p.view.row_offset += row_offset;
        p.view.column_offset += column_offset;
        Ok(p)
    }

    /// Single-row view.
    pub fn row_vector(&self, row: usize) -> Result<Self, LinalgError> {
        self.partial(1, self.columns(), row, 0)
    }

    /// Single-column view.
    pub fn column_vector(&self, column: usize) -> Result<Self, LinalgError> {
        self.partial(self.rows(), 1, 0, column)
    }

    /// Exchanges two rows in place.
    pub fn exchange_rows(&mut self, row1: usize, row2: usize) -> Result<(), LinalgError> {
        if row1 >= self.rows() || row2 >= self.rows() {
            return Err(LinalgError::SizeMismatch("row exchange".to_string()));
        }
        for j in 0..self.columns() {
            let tmp = self.get(row1, j);
            self.set(row1, j, self.get(row2, j));
            self.set(row2, j, tmp);
        }
        Ok(())
    }

    /// Exchanges two columns in place.
    pub fn exchange_columns(&mut self, col1: usize, col2: usize) -> Result<(), LinalgError> {
        if col1 >= self.columns() || col2 >= self.columns() {
            return Err(LinalgError::SizeMismatch("column exchange".to_string()));
        }
        for i in 0..self.rows() {
            let tmp = self.get(i, col1);
            self.set(i, col1, self.get(i, col2));
            self.set(i, col2, tmp);
        }
        Ok(())
    }

    pub const fn is_square(&self) -> bool {
        self.view.rows == self.view.columns
    }

    pub fn is_symmetric(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        for i in 0..self.rows() {
            for j in (i + 1)..self.columns() {
                if self.get(i, j) != self.get(j, i) {
                    return false;
                }
            }
        }
        true
    }

    pub fn is_diagonal(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        for i in 0..self.rows() {
            for j in (i + 1)..self.columns() {
                if self.get(i, j) != T::zero() || self.get(j, i) != T::zero() {
                    return false;
                }
            }
        }
        true
    }

    pub fn trace(&self) -> Result<T, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare);
        }
        let mut tr = T::zero();
        for i in 0..self.rows() {
            tr += self.get(i, i);
        }
        Ok(tr)
    }

    /// Adds `other` into the sub-block whose upper left corner is at
    /// `(row, column)`; the parts of `other` falling outside this matrix
    /// are ignored.
    pub fn pivot_merge(&mut self, row: usize, column: usize, other: &Self) {
        for i in 0..other.rows() {
            if row + i >= self.rows() {
                break;
            }
            for j in 0..other.columns() {
                if column + j >= self.columns() {
                    break;
                }
                self.add_to(row + i, column + j, other.get(i, j));
            }
        }
    }

    /// Non-mutating [`Matrix::pivot_merge`] on a materialized copy.
    pub fn pivot_add(&self, row: usize, column: usize, other: &Self) -> Self {
        let mut out = self.materialize();
        out.pivot_merge(row, column, other);
        out
    }

    /// Maximum modulus over the difference with another matrix; handy for
    /// tolerance checks.
    pub fn distance(&self, other: &Self) -> f64 {
        assert_eq!(self.rows(), other.rows());
        assert_eq!(self.columns(), other.columns());
        let mut d: f64 = 0.0;
        for i in 0..self.rows() {
            for j in 0..self.columns() {
                d = d.max((self.get(i, j) - other.get(i, j)).norm());
            }
        }
        d
    }

    /// Casts every element through the provided function; used to lift a
    /// real matrix into the complex plane for the eigen solver.
    pub fn map<U: MatElem, F: Fn(T) -> U>(&self, f: F) -> Matrix<U> {
        Matrix::from_fn(self.rows(), self.columns(), |i, j| f(self.get(i, j)))
    }
}

impl<T: MatElem> PartialEq for Matrix<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.rows() != other.rows() || self.columns() != other.columns() {
            return false;
        }
        for i in 0..self.rows() {
            for j in 0..self.columns() {
                if self.get(i, j) != other.get(i, j) {
                    return false;
                }
            }
        }
        true
    }
}

impl<T: MatElem> Add for &Matrix<T> {
    type Output = Matrix<T>;

    fn add(self, other: Self) -> Matrix<T> {
        assert_eq!(self.rows(), other.rows(), "incorrect size");
        assert_eq!(self.columns(), other.columns(), "incorrect size");
        let mut out = self.materialize();
        for i in 0..out.rows() {
            for j in 0..out.columns() {
                out.add_to(i, j, other.get(i, j));
            }
        }
        out
    }
}

impl<T: MatElem> Sub for &Matrix<T> {
    type Output = Matrix<T>;

    fn sub(self, other: Self) -> Matrix<T> {
        assert_eq!(self.rows(), other.rows(), "incorrect size");
        assert_eq!(self.columns(), other.columns(), "incorrect size");
        let mut out = self.materialize();
        for i in 0..out.rows() {
            for j in 0..out.columns() {
                out.add_to(i, j, -other.get(i, j));
            }
        }
        out
    }
}

impl<T: MatElem> Mul for &Matrix<T> {
    type Output = Matrix<T>;

    fn mul(self, other: Self) -> Matrix<T> {
        assert_eq!(self.columns(), other.rows(), "incorrect size");
        let mut out = Matrix::zeros(self.rows(), other.columns());
        for i in 0..out.rows() {
            for j in 0..out.columns() {
                let mut acc = T::zero();
                for k in 0..self.columns() {
                    acc += self.get(i, k) * other.get(k, j);
                }
                out.set(i, j, acc);
            }
        }
        out
    }
}

impl<T: MatElem> Mul<T> for &Matrix<T> {
    type Output = Matrix<T>;

    fn mul(self, scalar: T) -> Matrix<T> {
        let mut out = self.materialize();
        for i in 0..out.rows() {
            for j in 0..out.columns() {
                let v = out.get(i, j) * scalar;
                out.set(i, j, v);
            }
        }
        out
    }
}

impl<T: MatElem> Div<T> for &Matrix<T> {
    type Output = Matrix<T>;

    fn div(self, scalar: T) -> Matrix<T> {
        self * (T::one() / scalar)
    }
}

impl<T: MatElem> Neg for &Matrix<T> {
    type Output = Matrix<T>;

    fn neg(self) -> Matrix<T> {
        self * (-T::one())
    }
}

impl<T: MatElem> fmt::Display for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for i in 0..self.rows() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "\n{{")?;
            for j in 0..self.columns() {
                if j > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", self.get(i, j))?;
            }
            write!(f, "}}")?;
        }
        write!(f, "\n}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_clone_shares_until_write() {
        let a = Matrix::<f64>::identity(3);
        let mut b = a.clone();
        assert!(a.is_shared() && b.is_shared());
        b.set(0, 1, 5.0);
        // The write detached b; a is untouched.
        assert_eq!(a.get(0, 1), 0.0);
        assert_eq!(b.get(0, 1), 5.0);
        assert!(!b.is_shared());
    }

    #[test]
    fn view_composition_normalizes() {
        let m = Matrix::from_fn(4, 6, |i, j| (i * 10 + j) as f64);
        let p = m.partial(2, 3, 1, 2).unwrap();
        assert_eq!(p.get(0, 0), 12.0);
        let pt = p.transpose();
        assert_eq!(pt.rows(), 3);
        assert_eq!(pt.columns(), 2);
        assert_eq!(pt.get(2, 1), m.get(2, 4));
        // partial of a transposed view
        let tp = m.transpose().partial(3, 2, 2, 1).unwrap();
        assert_eq!(tp.get(0, 0), m.get(1, 2));
        // double transpose folds back
        let tt = m.transpose().transpose();
        assert_eq!(&tt, &m);
        assert!(!tt.is_view());
    }

    #[test]
    fn operators_materialize() {
        let a = Matrix::from_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = Matrix::from_slice(2, 2, &[0.5, 0.5, 0.5, 0.5]);
        let sum = &a + &b;
        assert_eq!(sum.get(1, 1), 4.5);
        let prod = &a * &b;
        assert_eq!(prod.get(0, 0), 1.5);
        assert_eq!(prod.get(1, 0), 3.5);
        let scaled = &a * 2.0;
        assert_eq!(scaled.get(0, 1), 4.0);
        // through a transpose view
        let at_b = &a.transpose() * &b;
        assert_eq!(at_b.get(0, 0), 2.0);
        assert!(!at_b.is_view());
    }

    #[test]
    fn pivot_merge_clips() {
        let mut a = Matrix::<f64>::zeros(3, 3);
        let small = Matrix::from_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        a.pivot_merge(2, 2, &small);
        assert_eq!(a.get(2, 2), 1.0);
        // everything else clipped
        let mut total = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                total += a.get(i, j);
            }
        }
        assert_eq!(total, 1.0);
    }

    #[test]
    fn exchanges() {
        let mut a = Matrix::from_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        a.exchange_rows(0, 1).unwrap();
        assert_eq!(a.get(0, 0), 3.0);
        a.exchange_columns(0, 1).unwrap();
        assert_eq!(a.get(0, 0), 4.0);
        assert!(a.exchange_rows(0, 5).is_err());
    }
}
