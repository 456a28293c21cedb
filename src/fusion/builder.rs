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

use super::{FilteredIns, FusionFilter, ERR_STATE_BIAS, ERR_STATE_CORE};
use crate::earth::GravityModel;
use crate::errors::NavError;
use crate::ins::{Ins, SensorBias};
use crate::kf::{KalmanCore, StandardKalman, UdKalman};
use crate::linalg::Matrix;
use crate::process::conf::FusionConfig;
use log::{info, warn};

/// Builds the concrete filter variant from the configuration, exactly
/// once: covariance form, bias augmentation and gravity model are all
/// decided here and never change afterwards.
pub struct FilterBuilder;

impl FilterBuilder {
    pub fn build(cfg: &FusionConfig) -> Result<FusionFilter, NavError> {
        cfg.validate()?;

        let gravity = if cfg.use_egm {
            match &cfg.egm_grid_path {
                Some(path) => GravityModel::egm_or_fallback(path),
                None => {
                    warn!("use_egm requested without a grid file; using normal gravity");
                    GravityModel::Wgs84Normal
                }
            }
        } else {
            GravityModel::Wgs84Normal
        };

        let bias = cfg
            .est_bias
            .then(|| SensorBias::new(cfg.tau_accel, cfg.tau_gyro));
        let ins = Ins::new(gravity, bias);

        let n = if cfg.est_bias {
            ERR_STATE_BIAS
        } else {
            ERR_STATE_CORE
        };

        /*
         * Initial covariance diagonal:
         *  0-2 : velocity in the navigation axes, (m/s)²
         *  3-5 : position delta-quaternion (latitude, longitude, wander)
         *  6   : altitude, m²
         *  7-9 : attitude delta-quaternion; 7-8 mostly roll/pitch
         *        (1-sigma about 1 deg), 9 mostly heading (about 7 deg)
         * 10-15: accelerometer and gyro bias drift
         */
        let mut p_diag = vec![1e1, 1e1, 1e1, 1e-8, 1e-8, 1e-8, 1e2, 1e-4, 1e-4, 5e-3];
        if cfg.est_bias {
            p_diag.extend_from_slice(&[1e-4, 1e-4, 1e-4, 1e-7, 1e-7, 1e-7]);
        }
        if let Some(over) = &cfg.p_diag_override {
            if over.len() != n {
                return Err(NavError::DimensionMismatch(format!(
                    "p_diag override needs {n} entries, got {}",
                    over.len()
                )));
            }
            p_diag.copy_from_slice(over);
        }

        // Process noise from the calibration sigma contract.
        let mut q_diag: Vec<f64> = cfg
            .accel_sigma
            .iter()
            .chain(cfg.gyro_sigma.iter())
            .map(|s| s.powi(2))
            .collect();
        q_diag.push(cfg.gravity_noise);
        if cfg.est_bias {
            q_diag.extend_from_slice(&[cfg.bias_accel_noise; 3]);
            q_diag.extend_from_slice(&[cfg.bias_gyro_noise; 3]);
        }
        if let Some(over) = &cfg.q_diag_override {
            if over.len() != q_diag.len() {
                return Err(NavError::DimensionMismatch(format!(
                    "q_diag override needs {} entries, got {}",
                    q_diag.len(),
                    over.len()
                )));
            }
            q_diag.copy_from_slice(over);
        }

        let p0 = Matrix::from_diagonal(&p_diag);
        info!(
            "filter: {} covariance, {} error states, {} gravity",
            if cfg.use_udkf { "UD" } else { "standard" },
            n,
            if cfg.use_egm { "EGM" } else { "normal" }
        );

        Ok(if cfg.use_udkf {
            let mut core = UdKalman::new(n);
            core.set_covariance(&p0)?;
            FusionFilter::Ud(FilteredIns::new(ins, core, q_diag, cfg.innovation_gate))
        } else {
            let mut core = StandardKalman::new(n);
            core.set_covariance(&p0)?;
            FusionFilter::Standard(FilteredIns::new(ins, core, q_diag, cfg.innovation_gate))
        })
    }
}
