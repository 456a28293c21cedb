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

/*! # Filtered strapdown navigation

The error-state extended Kalman filter around the strapdown mechanization.
The error vector is ordered as the covariance initialization expects:

| indices | error                                   |
|---------|-----------------------------------------|
| 0–2     | δv, navigation frame                    |
| 3–5     | η, position-quaternion tilt             |
| 6       | δh                                      |
| 7–9     | ε, attitude tilt                        |
| 10–12   | δb accelerometer (bias-augmented only)  |
| 13–15   | δb gyroscope (bias-augmented only)      |

Both tilts are navigation-frame rotation vectors applied on the left:
`q_true = (1, η/2) ⊗ q_est`. A GPS fix observes north/east position error,
height error and navigation-frame velocity error directly, so the
observation matrix is identity-block shaped, plus the skew of `C_b2n·r_b`
on the attitude block when a lever arm is configured.
*/

use crate::errors::NavError;
use crate::ins::Ins;
use crate::kf::{KalmanCore, StandardKalman, UdKalman};
use crate::linalg::Matrix;
use crate::msr::GpsSolution;
use crate::utils::{between_pm_pi, tilde_matrix};
use crate::earth::{meridian_radius, transverse_radius, WGS84_A};
use log::warn;
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

mod builder;
pub use builder::FilterBuilder;

/// Error-state size without bias augmentation.
pub const ERR_STATE_CORE: usize = 10;
/// Error-state size with bias augmentation.
pub const ERR_STATE_BIAS: usize = 16;
/// Process-noise size without bias augmentation.
pub const PROC_NOISE_CORE: usize = 7;
/// Process-noise size with bias augmentation.
pub const PROC_NOISE_BIAS: usize = 13;

/// Consecutive PSD repairs (or gate rejections) tolerated before the
/// filter is declared diverged.
const DIVERGENCE_LIMIT: usize = 8;

/// Outcome of a measurement update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectOutcome {
    Applied,
    /// The innovation exceeded the rejection gate; the prior was kept.
    GatedOut,
}

/// One-sigma standard deviations extracted from the covariance diagonal,
/// expressed in output units.
#[derive(Debug, Clone, Copy)]
pub struct StandardDeviations {
    pub latitude_rad: f64,
    pub longitude_rad: f64,
    pub height_m: f64,
    pub v_north_ms: f64,
    pub v_east_ms: f64,
    pub v_down_ms: f64,
    pub heading_rad: f64,
    pub pitch_rad: f64,
    pub roll_rad: f64,
    pub bias_accel: Option<Vector3<f64>>,
    pub bias_gyro: Option<Vector3<f64>>,
}

/// The strapdown mechanization paired with one of the Kalman cores.
#[derive(Debug, Clone)]
pub struct FilteredIns<K: KalmanCore> {
    pub ins: Ins,
    kf: K,
    q_diag: Vec<f64>,
    /// Innovation rejection gate, in sigma multiples.
    gate: Option<f64>,
    gate_rejections: usize,
}

impl<K: KalmanCore> FilteredIns<K> {
    pub fn new(ins: Ins, kf: K, q_diag: Vec<f64>, gate: Option<f64>) -> Self {
        Self {
            ins,
            kf,
            q_diag,
            gate,
            gate_rejections: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.kf.dimension()
    }

    pub fn covariance(&self) -> Matrix {
        self.kf.covariance()
    }

    pub fn set_covariance(&mut self, p: &Matrix) -> Result<(), NavError> {
        self.kf.set_covariance(p)
    }

    pub fn set_process_noise(&mut self, q_diag: Vec<f64>) {
        self.q_diag = q_diag;
    }

    pub fn process_noise(&self) -> &[f64] {
        &self.q_diag
    }

    /// Builds the linearized error dynamics `A` and the noise mapping `G`
    /// about the current state.
    fn system_matrices(&self, accel: &Vector3<f64>) -> (Matrix, Matrix) {
        let n = self.dimension();
        let nq = self.q_diag.len();
        let state = &self.ins.state;
        let (lat, _, alpha) = state.geodetic();
        let h = state.height;
        let rm = meridian_radius(lat) + h;
        let rn = transverse_radius(lat) + h;
        let gamma = self.ins.normal_gravity_here();

        let omega_ie = self.ins.earth_rate();
        let omega_en = self.ins.transport_rate(&state.v);
        let c_b2n = state.q_b2n.to_rotation_matrix().into_inner();
        let f_b = match &self.ins.bias {
            Some(b) => accel - b.accel,
            None => *accel,
        };
        let f_n = state.q_b2n * f_b;

        // Curvature map ∂ω_en/∂v, rotated through the wander angle.
        let to_ned = Rotation3::from_axis_angle(&Vector3::z_axis(), alpha)
            .matrix()
            .to_owned();
        let m_curv = Matrix3::new(0.0, 1.0 / rn, 0.0, -1.0 / rm, 0.0, 0.0, 0.0, 0.0, 0.0);
        let curv = to_ned.transpose() * m_curv * to_ned;

        let mut a = Matrix::zeros(n, n);
        let set3 = |mat: &mut Matrix, r0: usize, c0: usize, blk: &Matrix3<f64>| {
            for i in 0..3 {
                for j in 0..3 {
                    mat.set(r0 + i, c0 + j, blk[(i, j)]);
                }
            }
        };

        // Velocity error rows.
        set3(&mut a, 0, 0, &(-tilde_matrix(&(omega_ie * 2.0 + omega_en))));
        set3(&mut a, 0, 3, &tilde_matrix(&Vector3::new(0.0, 0.0, gamma)));
        set3(&mut a, 0, 7, &(-tilde_matrix(&f_n)));
        a.set(2, 6, -2.0 * gamma / (WGS84_A + h));

        // Position tilt rows.
        set3(&mut a, 3, 0, &curv);
        set3(&mut a, 3, 3, &(-tilde_matrix(&omega_en)));

        // Height row.
        a.set(6, 2, -1.0);

        // Attitude tilt rows.
        set3(&mut a, 7, 0, &curv);
        set3(&mut a, 7, 3, &tilde_matrix(&omega_ie));
        set3(&mut a, 7, 7, &(-tilde_matrix(&(omega_ie + omega_en))));

        let mut g = Matrix::zeros(n, nq);
        set3(&mut g, 0, 0, &c_b2n);
        g.set(2, 6, 1.0);
        set3(&mut g, 7, 3, &(-c_b2n));

        if let Some(bias) = &self.ins.bias {
            let (beta_a, beta_g) = bias.betas();
            set3(&mut a, 0, 10, &(-c_b2n));
            set3(&mut a, 7, 13, &(-c_b2n));
            for i in 0..3 {
                a.set(10 + i, 10 + i, -beta_a);
                a.set(13 + i, 13 + i, -beta_g);
                g.set(10 + i, 7 + i, 1.0);
                g.set(13 + i, 10 + i, 1.0);
            }
        }

        (a, g)
    }

    /// Time update: propagates the covariance through the linearized error
    /// dynamics, then the full state through the mechanization.
    pub fn time_update(
        &mut self,
        accel: &Vector3<f64>,
        omega: &Vector3<f64>,
        dt: f64,
    ) -> Result<(), NavError> {
        let (a, g) = self.system_matrices(accel);
        self.kf.predict(&a, &g, &self.q_diag, dt)?;
        self.ins.update(accel, omega, dt);
        Ok(())
    }

    /// Applies the estimated error-state correction back onto the manifold
    /// through the quaternion delta parameterization.
    fn inject(&mut self, dx: &Matrix) {
        let state = &mut self.ins.state;
        for i in 0..3 {
            state.v[i] += dx.get(i, 0);
        }
        let eta = Vector3::new(dx.get(3, 0), dx.get(4, 0), dx.get(5, 0));
        state.q_e2n = UnitQuaternion::from_quaternion(
            Quaternion::from_parts(1.0, eta * 0.5) * state.q_e2n.into_inner(),
        );
        state.height += dx.get(6, 0);
        let eps = Vector3::new(dx.get(7, 0), dx.get(8, 0), dx.get(9, 0));
        state.q_b2n = UnitQuaternion::from_quaternion(
            Quaternion::from_parts(1.0, eps * 0.5) * state.q_b2n.into_inner(),
        );
        if let Some(bias) = &mut self.ins.bias {
            for i in 0..3 {
                bias.accel[i] += dx.get(10 + i, 0);
                bias.gyro[i] += dx.get(13 + i, 0);
            }
        }
    }

    fn check_divergence(&self, what: &str) -> Result<(), NavError> {
        if self.kf.consecutive_repairs() > DIVERGENCE_LIMIT
            || self.gate_rejections > DIVERGENCE_LIMIT
        {
            return Err(NavError::FilterDiverged(what.to_string()));
        }
        Ok(())
    }

    /// Measurement update against a GPS position/velocity fix. The lever
    /// arm, when present, couples attitude error into the position
    /// observation and shifts the predicted velocity by `C_b2n (ω × r_b)`.
    pub fn correct(
        &mut self,
        solution: &GpsSolution,
        lever: Option<(Vector3<f64>, Vector3<f64>)>,
    ) -> Result<CorrectOutcome, NavError> {
        let n = self.dimension();
        let state = &self.ins.state;
        let (lat, lon, alpha) = state.geodetic();
        let h = state.height;
        let rm = meridian_radius(lat) + h;
        let rn = transverse_radius(lat) + h;
        let to_ned = Rotation3::from_axis_angle(&Vector3::z_axis(), alpha);
        let to_wander = to_ned.inverse();

        // Predicted GPS observation, including the antenna offset.
        let mut lat_pred = lat;
        let mut lon_pred = lon;
        let mut h_pred = h;
        let mut v_pred = state.v;
        let mut lever_n = None;
        if let Some((r_b, omega_mean)) = lever {
            let omega_b = match &self.ins.bias {
                Some(b) => omega_mean - b.gyro,
                None => omega_mean,
            };
            let l_n = state.q_b2n * r_b;
            let l_ned = to_ned * l_n;
            lat_pred += l_ned[0] / rm;
            lon_pred += l_ned[1] / (rn * lat.cos());
            h_pred -= l_ned[2];
            v_pred += state.q_b2n * omega_b.cross(&r_b);
            lever_n = Some(l_n);
        }

        // Innovation: north/east position in meters, height, velocity in
        // the navigation frame.
        let y_n = rm * (solution.latitude - lat_pred);
        let y_e = rn * lat.cos() * (solution.longitude - lon_pred);
        let y_h = solution.height - h_pred;
        let v_gps_ned = Vector3::new(solution.v_north, solution.v_east, solution.v_down);
        let y_v = to_wander * v_gps_ned - v_pred;
        let y = Matrix::from_slice(6, 1, &[y_n, y_e, y_h, y_v[0], y_v[1], y_v[2]]);

        let mut h_mat = Matrix::zeros(6, n);
        // Position tilt to north/east displacement, through the wander
        // rotation: δp_ned = to_ned · [(R_M+h)·η_y, -(R_N+h)·η_x, 0].
        let tilt_to_disp = to_ned.matrix()
            * Matrix3::new(0.0, rm, 0.0, -rn, 0.0, 0.0, 0.0, 0.0, 0.0);
        for j in 0..3 {
            h_mat.set(0, 3 + j, tilt_to_disp[(0, j)]);
            h_mat.set(1, 3 + j, tilt_to_disp[(1, j)]);
        }
        h_mat.set(2, 6, 1.0);
        for i in 0..3 {
            h_mat.set(3 + i, i, 1.0);
        }
        if let Some(l_n) = lever_n {
            // Attitude error moves the antenna: δant = -[l_n×]·ε.
            let ant = to_ned.matrix() * (-tilde_matrix(&l_n));
            for j in 0..3 {
                h_mat.set(0, 7 + j, ant[(0, j)]);
                h_mat.set(1, 7 + j, ant[(1, j)]);
                // Height row measures -Down.
                h_mat.set(2, 7 + j, -ant[(2, j)]);
            }
        }

        let r_diag = [
            solution.sigma_2d.powi(2),
            solution.sigma_2d.powi(2),
            solution.sigma_height.powi(2),
            solution.sigma_vel.powi(2),
            solution.sigma_vel.powi(2),
            solution.sigma_vel.powi(2),
        ];

        if let Some(gate) = self.gate {
            let p = self.kf.covariance();
            let hpht = &(&h_mat * &p) * &h_mat.transpose();
            for i in 0..6 {
                let sigma = (hpht.get(i, i) + r_diag[i]).sqrt();
                if y.get(i, 0).abs() > gate * sigma {
                    warn!(
                        "rejecting GPS update: innovation {} = {:.3} exceeds {gate} x {sigma:.3}",
                        i,
                        y.get(i, 0)
                    );
                    self.gate_rejections += 1;
                    self.check_divergence("innovation gate")?;
                    return Ok(CorrectOutcome::GatedOut);
                }
            }
        }
        self.gate_rejections = 0;

        let dx = self.kf.correct(&h_mat, &y, &r_diag)?;
        self.inject(&dx);
        self.check_divergence("covariance repair")?;
        Ok(CorrectOutcome::Applied)
    }

    /// Scalar heading update: `z = ψ_measured - ψ_predicted` observed on
    /// the vertical attitude tilt.
    pub fn correct_yaw(&mut self, delta_yaw: f64, variance: f64) -> Result<(), NavError> {
        let n = self.dimension();
        let mut h_mat = Matrix::zeros(1, n);
        h_mat.set(0, 9, 1.0);
        let y = Matrix::from_slice(1, 1, &[between_pm_pi(delta_yaw)]);
        let dx = self.kf.correct(&h_mat, &y, &[variance])?;
        self.inject(&dx);
        self.check_divergence("yaw auxiliary")?;
        Ok(())
    }

    /// One-sigma values from the covariance diagonal, converted to output
    /// units: the horizontal tilt entries become latitude/longitude sigmas.
    pub fn sigmas(&self) -> StandardDeviations {
        let p = self.kf.covariance();
        let lat = self.ins.state.latitude();
        let sd = |i: usize| p.get(i, i).max(0.0).sqrt();
        let (bias_accel, bias_gyro) = if self.ins.bias.is_some() {
            (
                Some(Vector3::new(sd(10), sd(11), sd(12))),
                Some(Vector3::new(sd(13), sd(14), sd(15))),
            )
        } else {
            (None, None)
        };
        StandardDeviations {
            latitude_rad: sd(4),
            longitude_rad: sd(3) / lat.cos(),
            height_m: sd(6),
            v_north_ms: sd(0),
            v_east_ms: sd(1),
            v_down_ms: sd(2),
            heading_rad: sd(9),
            pitch_rad: sd(8),
            roll_rad: sd(7),
            bias_accel,
            bias_gyro,
        }
    }
}

/// The concrete filter variant, tagged at construction from the
/// configuration: standard or UD-factorized covariance, with or without
/// bias augmentation (carried inside [`Ins`]).
#[derive(Debug, Clone)]
pub enum FusionFilter {
    Standard(FilteredIns<StandardKalman>),
    Ud(FilteredIns<UdKalman>),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            FusionFilter::Standard($inner) => $body,
            FusionFilter::Ud($inner) => $body,
        }
    };
}

impl FusionFilter {
    pub fn ins(&self) -> &Ins {
        dispatch!(self, f => &f.ins)
    }

    pub fn ins_mut(&mut self) -> &mut Ins {
        dispatch!(self, f => &mut f.ins)
    }

    pub fn dimension(&self) -> usize {
        dispatch!(self, f => f.dimension())
    }

    pub fn covariance(&self) -> Matrix {
        dispatch!(self, f => f.covariance())
    }

    pub fn set_covariance(&mut self, p: &Matrix) -> Result<(), NavError> {
        dispatch!(self, f => f.set_covariance(p))
    }

    pub fn set_process_noise(&mut self, q_diag: Vec<f64>) {
        dispatch!(self, f => f.set_process_noise(q_diag))
    }

    pub fn time_update(
        &mut self,
        accel: &Vector3<f64>,
        omega: &Vector3<f64>,
        dt: f64,
    ) -> Result<(), NavError> {
        dispatch!(self, f => f.time_update(accel, omega, dt))
    }

    pub fn correct(
        &mut self,
        solution: &GpsSolution,
        lever: Option<(Vector3<f64>, Vector3<f64>)>,
    ) -> Result<CorrectOutcome, NavError> {
        dispatch!(self, f => f.correct(solution, lever))
    }

    pub fn correct_yaw(&mut self, delta_yaw: f64, variance: f64) -> Result<(), NavError> {
        dispatch!(self, f => f.correct_yaw(delta_yaw, variance))
    }

    pub fn sigmas(&self) -> StandardDeviations {
        dispatch!(self, f => f.sigmas())
    }
}
