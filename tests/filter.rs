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

use erebus::kf::{KalmanCore, StandardKalman, UdKalman};
use erebus::linalg::Matrix;
use rand::Rng;
use rand_pcg::Pcg64Mcg;

fn spd(rng: &mut Pcg64Mcg, n: usize) -> Matrix {
    let a = Matrix::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
    &(&a * &a.transpose()) + &Matrix::scalar(n, 0.5)
}

/// Runs the same prediction/correction sequence through both covariance
/// representations; they are algebraically identical, so the recomposed
/// covariances must agree tightly.
#[test]
fn ud_and_standard_paths_agree() {
    let n = 6;
    let q = 3;
    let mut rng = Pcg64Mcg::new(0xC0FF_EE00);

    let p0 = spd(&mut rng, n);
    let mut standard = StandardKalman::new(n);
    standard.set_covariance(&p0).unwrap();
    let mut ud = UdKalman::new(n);
    ud.set_covariance(&p0).unwrap();
    assert!(ud.covariance().distance(&p0) < 1e-11);

    let a = Matrix::from_fn(n, n, |_, _| rng.gen_range(-0.1..0.1));
    let g = Matrix::from_fn(n, q, |_, _| rng.gen_range(-1.0..1.0));
    let q_diag = [0.04, 0.09, 0.01];
    let dt = 0.1;

    for step in 0..25 {
        standard.predict(&a, &g, &q_diag, dt).unwrap();
        ud.predict(&a, &g, &q_diag, dt).unwrap();

        if step % 5 == 0 {
            let h = Matrix::from_fn(2, n, |_, _| rng.gen_range(-1.0..1.0));
            let y = Matrix::from_fn(2, 1, |_, _| rng.gen_range(-1.0..1.0));
            let r_diag = [0.25, 0.5];
            let dx_std = standard.correct(&h, &y, &r_diag).unwrap();
            let dx_ud = ud.correct(&h, &y, &r_diag).unwrap();
            assert!(
                dx_std.distance(&dx_ud) < 1e-9,
                "state corrections diverge at step {step}"
            );
        }

        let p_std = standard.covariance();
        let p_ud = ud.covariance();
        assert!(
            p_std.distance(&p_ud) < 1e-9,
            "covariances diverge at step {step}: {}",
            p_std.distance(&p_ud)
        );
    }
}

#[test]
fn covariance_invariants_hold_through_updates() {
    let n = 6;
    let mut rng = Pcg64Mcg::new(0xBEEF_BEEF);
    let p0 = spd(&mut rng, n);

    let mut standard = StandardKalman::new(n);
    standard.set_covariance(&p0).unwrap();
    let mut ud = UdKalman::new(n);
    ud.set_covariance(&p0).unwrap();

    let a = Matrix::from_fn(n, n, |_, _| rng.gen_range(-0.2..0.2));
    let g = Matrix::identity(n);
    let q_diag = vec![1e-3; n];

    for _ in 0..100 {
        standard.predict(&a, &g, &q_diag, 0.05).unwrap();
        ud.predict(&a, &g, &q_diag, 0.05).unwrap();
        let h = Matrix::from_fn(1, n, |_, _| rng.gen_range(-1.0..1.0));
        let y = Matrix::from_slice(1, 1, &[rng.gen_range(-0.5..0.5)]);
        standard.correct(&h, &y, &[0.1]).unwrap();
        ud.correct(&h, &y, &[0.1]).unwrap();

        for p in [standard.covariance(), ud.covariance()] {
            assert!(p.distance(&p.transpose().materialize()) < 1e-12, "asymmetric P");
            for i in 0..n {
                assert!(p.get(i, i) >= 0.0, "negative variance");
            }
        }
        // UD invariants: unit upper U, non-negative D.
        let (u, d) = ud.factors();
        for i in 0..n {
            assert_eq!(u.get(i, i), 1.0);
            assert!(d[i] >= 0.0);
            for j in 0..i {
                assert_eq!(u.get(i, j), 0.0);
            }
        }
    }
    assert_eq!(standard.consecutive_repairs(), 0);
    assert_eq!(ud.consecutive_repairs(), 0);
}

/// A nearly-degenerate covariance: the Joseph/clamp machinery keeps the
/// standard path serviceable and the UD path exact.
#[test]
fn stiff_covariance_survives() {
    let n = 4;
    let p0 = Matrix::from_diagonal(&[1e8, 1e-8, 1e4, 1e-6]);
    let mut standard = StandardKalman::new(n);
    standard.set_covariance(&p0).unwrap();
    let mut ud = UdKalman::new(n);
    ud.set_covariance(&p0).unwrap();

    let h = Matrix::from_slice(1, n, &[1.0, 1.0, 1.0, 1.0]);
    let y = Matrix::from_slice(1, 1, &[3.0]);
    standard.correct(&h, &y, &[1e-4]).unwrap();
    ud.correct(&h, &y, &[1e-4]).unwrap();

    for p in [standard.covariance(), ud.covariance()] {
        for i in 0..n {
            assert!(p.get(i, i) >= 0.0);
            assert!(p.get(i, i).is_finite());
        }
    }
}
