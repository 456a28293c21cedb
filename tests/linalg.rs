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

extern crate erebus;
extern crate rand;
extern crate rand_pcg;

use erebus::linalg::{LinalgError, Matrix};
use rand::Rng;
use rand_pcg::Pcg64Mcg;

fn random_matrix(rng: &mut Pcg64Mcg, n: usize) -> Matrix {
    Matrix::from_fn(n, n, |_, _| rng.gen_range(-2.0..2.0))
}

fn random_spd(rng: &mut Pcg64Mcg, n: usize) -> Matrix {
    // A·Aᵀ + n·I is symmetric positive definite.
    let a = random_matrix(rng, n);
    &(&a * &a.transpose()) + &Matrix::scalar(n, n as f64)
}

#[test]
fn inverse_of_random_nonsingular() {
    let mut rng = Pcg64Mcg::new(0xDEFC_2470);
    for n in [2, 3, 5, 8] {
        let a = random_spd(&mut rng, n);
        let inv = a.inverse().unwrap();
        let eye = &a * &inv;
        assert!(
            eye.distance(&Matrix::identity(n)) < 1e-10,
            "A·A⁻¹ ≠ I for n = {n}"
        );
    }
}

#[test]
fn lu_recomposes_with_pivot() {
    let mut rng = Pcg64Mcg::new(0x0BAD_5EED);
    for n in [3, 4, 6] {
        let mut a = random_matrix(&mut rng, n);
        // Force a zero leading pivot so the exchange path runs.
        a.set(0, 0, 0.0);
        let lu = a.decompose_lup().unwrap();
        let permuted = Matrix::from_fn(n, n, |i, k| a.get(i, lu.pivot[k]));
        assert!((&lu.l * &lu.u).distance(&permuted) < 1e-10);
        // L unit lower, U upper.
        for i in 0..n {
            assert!((lu.l.get(i, i) - 1.0).abs() < 1e-15);
            for j in (i + 1)..n {
                assert_eq!(lu.l.get(i, j), 0.0);
                assert_eq!(lu.u.get(j, i), 0.0);
            }
        }
    }
}

#[test]
fn ud_recomposes_symmetric() {
    let mut rng = Pcg64Mcg::new(0x1234_5678);
    for n in [2, 4, 7, 10] {
        let p = random_spd(&mut rng, n);
        let ud = p.decompose_ud().unwrap();
        assert!(ud.compose().distance(&p) < 1e-9);
        for i in 0..n {
            assert!((ud.u.get(i, i) - 1.0).abs() < 1e-15);
            assert!(ud.d.get(i, i) >= 0.0);
        }
    }
}

#[test]
fn ud_rejects_asymmetric() {
    let a = Matrix::from_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(a.decompose_ud().unwrap_err(), LinalgError::NotSymmetric);
}

#[test]
fn determinant_via_lu() {
    // Known determinant, needs an exchange.
    let a = Matrix::from_slice(3, 3, &[0.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 3.0]);
    assert!((a.determinant().unwrap() + 6.0).abs() < 1e-12);
    let singular = Matrix::from_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
    assert!(singular.determinant().is_err());
}

#[test]
fn hessenberg_is_upper_and_similar() {
    let mut rng = Pcg64Mcg::new(0xFEED_F00D);
    for n in [4, 6] {
        let a = random_matrix(&mut rng, n);
        let mut transform = Matrix::identity(n);
        let h = a.hessenberg(Some(&mut transform)).unwrap();
        for j in 0..n {
            for i in (j + 2)..n {
                assert!(h.get(i, j).abs() < 1e-12, "H({i},{j}) not scrubbed");
            }
        }
        // Similarity preserves the trace.
        assert!((h.trace().unwrap() - a.trace().unwrap()).abs() < 1e-9);
        // And the orthogonal transform recomposes the original.
        let back = &(&transform * &h) * &transform.transpose();
        assert!(back.distance(&a) < 1e-8);
    }
}

#[test]
fn eigen_pairs_satisfy_definition() {
    let mut rng = Pcg64Mcg::new(0xACE0_FBA5);
    for n in [3, 5, 8] {
        let a = random_spd(&mut rng, n);
        let eig = a.eigen().unwrap();
        let a_c = a.map(|v| nalgebra::Complex::new(v, 0.0));
        for (j, lambda) in eig.values.iter().enumerate() {
            // Symmetric input: real spectrum.
            assert!(lambda.im.abs() < 1e-8, "complex eigenvalue of SPD matrix");
            let v = eig.vectors.column_vector(j).unwrap().materialize();
            let av = &a_c * &v;
            let lv = &v * *lambda;
            assert!(
                av.distance(&lv) < 1e-7,
                "A·v ≠ λ·v for pair {j} of n = {n}"
            );
        }
    }
}

#[test]
fn eigen_of_rotation_block_is_complex() {
    // 90° planar rotation: eigenvalues ±i.
    let a = Matrix::from_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]);
    let eig = a.eigen().unwrap();
    let mut ims: Vec<f64> = eig.values.iter().map(|l| l.im).collect();
    ims.sort_by(|x, y| x.partial_cmp(y).unwrap());
    assert!((ims[0] + 1.0).abs() < 1e-9);
    assert!((ims[1] - 1.0).abs() < 1e-9);
}

#[test]
fn sqrtm_squares_back() {
    let mut rng = Pcg64Mcg::new(0x5AFE_CAFE);
    let a = random_spd(&mut rng, 4);
    let root = a.sqrtm().unwrap();
    let squared = &root * &root;
    let a_c = a.map(|v| nalgebra::Complex::new(v, 0.0));
    assert!(squared.distance(&a_c) < 1e-7);
}

#[test]
fn views_compose_without_copying() {
    let m = Matrix::from_fn(5, 7, |i, j| (i * 10 + j) as f64);
    let t = m.transpose();
    assert_eq!(t.rows(), 7);
    assert_eq!(t.get(6, 4), m.get(4, 6));
    let tp = t.partial(3, 2, 1, 2).unwrap();
    assert_eq!(tp.get(0, 0), m.get(2, 1));
    let tpt = tp.transpose();
    assert_eq!(tpt.rows(), 2);
    assert_eq!(tpt.get(1, 2), tp.get(2, 1));
    // Decompositions accept view-wrapped inputs and return materialized
    // results.
    let square = m.partial(5, 5, 0, 1).unwrap();
    let lu = square.decompose_lup();
    assert!(lu.is_ok());
    assert!(!lu.unwrap().u.is_view());
}

#[test]
fn shared_storage_detaches_on_write() {
    let a = Matrix::from_fn(3, 3, |i, j| (i + j) as f64);
    let mut b = a.clone();
    assert!(b.is_shared());
    b.set(2, 2, 99.0);
    assert_eq!(a.get(2, 2), 4.0);
    assert_eq!(b.get(2, 2), 99.0);
}

#[test]
fn pivot_merge_adds_sub_block() {
    let mut a = Matrix::<f64>::identity(4);
    let blk = Matrix::from_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    a.pivot_merge(1, 1, &blk);
    assert_eq!(a.get(1, 1), 2.0);
    assert_eq!(a.get(1, 2), 2.0);
    assert_eq!(a.get(2, 1), 3.0);
    assert_eq!(a.get(2, 2), 5.0);
    // Out-of-range parts clip instead of panicking.
    let mut c = Matrix::<f64>::zeros(2, 2);
    c.pivot_merge(1, 1, &blk);
    assert_eq!(c.get(1, 1), 1.0);
}
