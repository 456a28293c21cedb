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

use crate::errors::NavError;
use crate::msr::SECONDS_PER_WEEK;
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

/// Time stamp mode of the output records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeStampMode {
    /// GPS seconds of week.
    #[default]
    Itow,
    /// Calendar UTC with an hour offset.
    Calendar { correction_hr: i32 },
}

/// Synchronization discipline, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncStrategy {
    /// Sort every packet by itow before applying it.
    #[default]
    Offline,
    /// Offline sorting plus a fixed-lag smoothing ring.
    BackPropagation,
    /// No sorting; bounded rewind for delayed fixes.
    RealTime,
}

/// GPS quality gates, in meters (1-sigma).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsThreshold {
    /// Initial measurement update threshold for the 2D estimated error.
    pub init_acc_2d: f64,
    /// Initial measurement update threshold for the vertical estimated error.
    pub init_acc_v: f64,
    /// Continual measurement update threshold for the 2D estimated error.
    pub cont_acc_2d: f64,
}

impl Default for GpsThreshold {
    fn default() -> Self {
        Self {
            init_acc_2d: 20.0,
            init_acc_v: 10.0,
            cont_acc_2d: 100.0,
        }
    }
}

/// How much of the initial attitude the user provided; anything not given
/// is estimated from the buffered accelerometer (and magnetometer) data
/// under a stationary assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum AttitudeMode {
    #[default]
    NotGiven,
    YawOnly,
    YawPitch,
    FullGiven,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InitialAttitude {
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub mode: AttitudeMode,
}

impl InitialAttitude {
    /// Parses `yaw[,pitch[,roll]]`; the number of values given sets the mode.
    pub fn parse(spec: &str) -> Result<Self, NavError> {
        let mut out = Self::default();
        let parts: Vec<&str> = spec.split(',').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(NavError::ConfigConflict(format!(
                "expected yaw[,pitch[,roll]] in degrees, got `{spec}`"
            )));
        }
        let parse = |s: &str| {
            s.trim().parse::<f64>().map_err(|_| {
                NavError::ConfigConflict(format!("invalid attitude component `{s}`"))
            })
        };
        out.yaw_deg = parse(parts[0])?;
        out.mode = AttitudeMode::YawOnly;
        if parts.len() > 1 {
            out.pitch_deg = parse(parts[1])?;
            out.mode = AttitudeMode::YawPitch;
        }
        if parts.len() > 2 {
            out.roll_deg = parse(parts[2])?;
            out.mode = AttitudeMode::FullGiven;
        }
        Ok(out)
    }
}

/// A GPS time point, either `seconds` within the current week or
/// `WN:seconds` pinned to a week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsTimeSpec {
    pub week: Option<u16>,
    pub seconds: f64,
}

impl GpsTimeSpec {
    pub fn parse(spec: &str) -> Result<Self, NavError> {
        let bad = || NavError::ConfigConflict(format!("invalid GPS time `{spec}`"));
        match spec.split_once(':') {
            Some((wn, sec)) => Ok(Self {
                week: Some(wn.trim().parse().map_err(|_| bad())?),
                seconds: sec.trim().parse().map_err(|_| bad())?,
            }),
            None => Ok(Self {
                week: None,
                seconds: spec.trim().parse().map_err(|_| bad())?,
            }),
        }
    }

    /// Absolute GPS seconds when both weeks are known, otherwise seconds
    /// of week.
    fn comparable(&self, current_week: Option<u16>) -> f64 {
        match (self.week, current_week) {
            (Some(w), _) | (None, Some(w)) => f64::from(w) * SECONDS_PER_WEEK + self.seconds,
            _ => self.seconds,
        }
    }

    pub fn is_before(&self, itow: f64, current_week: Option<u16>) -> bool {
        self.comparable(current_week) <= absolute_seconds(itow, current_week)
    }
}

fn absolute_seconds(itow: f64, week: Option<u16>) -> f64 {
    match week {
        Some(w) => f64::from(w) * SECONDS_PER_WEEK + itow,
        None => itow,
    }
}

/// Processing time window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeWindow {
    pub start: Option<GpsTimeSpec>,
    pub end: Option<GpsTimeSpec>,
}

impl TimeWindow {
    pub fn is_after_start(&self, itow: f64, week: Option<u16>) -> bool {
        self.start.map_or(true, |s| s.is_before(itow, week))
    }

    pub fn is_before_end(&self, itow: f64, week: Option<u16>) -> bool {
        self.end
            .map_or(true, |e| absolute_seconds(itow, week) <= e.comparable(week))
    }
}

/// Every knob of the engine, read once at startup. Mirrors the command
/// line surface; defaults follow the NinjaScan post-processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Dump states at time updates.
    pub dump_update: bool,
    /// Dump states at measurement updates.
    pub dump_correct: bool,
    /// Append one-sigma columns to each record.
    pub dump_stddev: bool,
    pub time_stamp: TimeStampMode,

    pub back_propagate: bool,
    pub realtime: bool,
    /// Depth of the smoothing ring, in seconds.
    pub bp_depth: f64,
    /// Maximum rewind accepted in realtime mode, in seconds.
    pub realtime_max_lag: f64,

    /// Estimate accelerometer and gyro bias drift.
    pub est_bias: bool,
    /// UD-factorized Kalman filter instead of the standard form.
    pub use_udkf: bool,
    /// Precise gravity through an external anomaly grid.
    pub use_egm: bool,
    pub egm_grid_path: Option<PathBuf>,

    pub gps_threshold: GpsThreshold,
    pub time_window: TimeWindow,

    pub use_magnet: bool,
    pub mag_heading_accuracy_deg: f64,
    /// Perform the magnetic yaw correction when the horizontal speed is
    /// under this many m/s; non-positive disables it.
    pub yaw_correct_with_mag_when_speed_less_than_ms: f64,

    pub initial_attitude: InitialAttitude,

    /// Accelerometer output 1-sigma per axis, m/s² (calibration contract).
    pub accel_sigma: [f64; 3],
    /// Gyro output 1-sigma per axis, rad/s (calibration contract).
    pub gyro_sigma: [f64; 3],
    /// Gravity anomaly process noise, (m/s²)².
    pub gravity_noise: f64,
    /// Accelerometer bias driving noise, ((m/s²)/√s)².
    pub bias_accel_noise: f64,
    /// Gyro bias driving noise, ((rad/s)/√s)².
    pub bias_gyro_noise: f64,
    /// Bias time constants, seconds.
    pub tau_accel: f64,
    pub tau_gyro: f64,

    /// Innovation rejection gate in sigma multiples; `None` disables it.
    pub innovation_gate: Option<f64>,
    /// Full replacement of the initial covariance diagonal.
    pub p_diag_override: Option<Vec<f64>>,
    /// Full replacement of the process noise diagonal.
    pub q_diag_override: Option<Vec<f64>>,

    /// Compensate the logger's 1-PPS counter wrap.
    pub reduce_1pps_sync_error: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            dump_update: true,
            dump_correct: false,
            dump_stddev: false,
            time_stamp: TimeStampMode::Itow,
            back_propagate: false,
            realtime: false,
            bp_depth: 1.0,
            realtime_max_lag: 0.5,
            est_bias: true,
            use_udkf: false,
            use_egm: false,
            egm_grid_path: None,
            gps_threshold: GpsThreshold::default(),
            time_window: TimeWindow::default(),
            use_magnet: false,
            mag_heading_accuracy_deg: 3.0,
            yaw_correct_with_mag_when_speed_less_than_ms: 5.0,
            initial_attitude: InitialAttitude::default(),
            accel_sigma: [0.05; 3],
            gyro_sigma: [5e-3; 3],
            gravity_noise: 1e-6,
            bias_accel_noise: 1e-6,
            bias_gyro_noise: 1e-8,
            tau_accel: 100.0,
            tau_gyro: 100.0,
            innovation_gate: Some(10.0),
            p_diag_override: None,
            q_diag_override: None,
            reduce_1pps_sync_error: true,
        }
    }
}

impl FusionConfig {
    /// Rejects mutually exclusive options. Fatal at startup.
    pub fn validate(&self) -> Result<(), NavError> {
        if self.back_propagate && self.realtime {
            return Err(NavError::ConfigConflict(
                "back_propagate and realtime are mutually exclusive".to_string(),
            ));
        }
        if self.bp_depth <= 0.0 {
            return Err(NavError::ConfigConflict(
                "bp_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_strategy(&self) -> SyncStrategy {
        if self.back_propagate {
            SyncStrategy::BackPropagation
        } else if self.realtime {
            SyncStrategy::RealTime
        } else {
            SyncStrategy::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_sync_is_rejected() {
        let cfg = FusionConfig {
            back_propagate: true,
            realtime: true,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(NavError::ConfigConflict(_))));
        assert!(FusionConfig::default().validate().is_ok());
    }

    #[test]
    fn attitude_spec_sets_mode_by_arity() {
        let a = InitialAttitude::parse("45").unwrap();
        assert_eq!(a.mode, AttitudeMode::YawOnly);
        let a = InitialAttitude::parse("45,1.5").unwrap();
        assert_eq!(a.mode, AttitudeMode::YawPitch);
        let a = InitialAttitude::parse("45,1.5,-0.5").unwrap();
        assert_eq!(a.mode, AttitudeMode::FullGiven);
        assert!((a.roll_deg + 0.5).abs() < 1e-12);
        assert!(InitialAttitude::parse("x").is_err());
    }

    #[test]
    fn gps_time_spec_parses_both_forms() {
        let t = GpsTimeSpec::parse("120.5").unwrap();
        assert_eq!(t.week, None);
        assert!((t.seconds - 120.5).abs() < 1e-12);
        let t = GpsTimeSpec::parse("2190:345600").unwrap();
        assert_eq!(t.week, Some(2190));
        assert!(GpsTimeSpec::parse("a:b").is_err());
    }

    #[test]
    fn time_window_bounds() {
        let w = TimeWindow {
            start: Some(GpsTimeSpec {
                week: None,
                seconds: 100.0,
            }),
            end: Some(GpsTimeSpec {
                week: None,
                seconds: 200.0,
            }),
        };
        assert!(!w.is_after_start(50.0, None));
        assert!(w.is_after_start(150.0, None));
        assert!(w.is_before_end(150.0, None));
        assert!(!w.is_before_end(250.0, None));
    }
}
