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

/*! # Measurement packets

Typed packets delivered by the (external) log decoder: inertial samples,
GPS receiver solutions, magnetometer samples, and time references, each
stamped with GPS seconds of week.
*/

use nalgebra::Vector3;
use serde_derive::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Seconds in one GPS week.
pub const SECONDS_PER_WEEK: f64 = 60.0 * 60.0 * 24.0 * 7.0;

/// Interval from `from` to `to` in seconds, positive when `to` is later.
pub fn interval(from: f64, to: f64) -> f64 {
    to - from
}

/// Interval from `from` to `to` in consideration of the one-week rollover;
/// the result lies in `[-SECONDS_PER_WEEK/2, +SECONDS_PER_WEEK/2)`.
pub fn interval_rollover(from: f64, to: f64) -> f64 {
    let delta = to - from;
    delta - ((delta / SECONDS_PER_WEEK) + 0.5).floor() * SECONDS_PER_WEEK
}

/// Rollover-aware packet ordering, for sorting a bounded window.
pub fn compare_itow(a: f64, b: f64) -> Ordering {
    let delta = interval_rollover(a, b);
    if delta > 0.0 {
        Ordering::Less
    } else if delta < 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Inertial sample: specific force and angular rate in the body frame,
/// already calibrated to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct APacket {
    pub itow: f64,
    /// Specific force, in m/s².
    pub accel: Vector3<f64>,
    /// Angular rate, in rad/s.
    pub omega: Vector3<f64>,
}

/// GPS receiver solution with its quality indicators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSolution {
    /// Geodetic latitude, in radians.
    pub latitude: f64,
    /// Longitude, in radians.
    pub longitude: f64,
    /// Ellipsoidal height, in meters.
    pub height: f64,
    pub v_north: f64,
    pub v_east: f64,
    pub v_down: f64,
    /// Estimated horizontal position accuracy, 1-sigma meters.
    pub sigma_2d: f64,
    /// Estimated vertical position accuracy, 1-sigma meters.
    pub sigma_height: f64,
    /// Estimated velocity accuracy, 1-sigma m/s.
    pub sigma_vel: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GPacket {
    pub itow: f64,
    pub solution: GpsSolution,
    /// IMU to GPS antenna offset in the body frame, in meters.
    pub lever_arm: Option<Vector3<f64>>,
}

/// Magnetometer sample in the sensor frame (axes aligned with the IMU).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MPacket {
    pub itow: f64,
    pub mag: Vector3<f64>,
}

/// Time reference: GPS week number and leap seconds when the receiver
/// reports them as valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePacket {
    pub itow_s: u32,
    pub week_number: Option<u16>,
    pub leap_seconds: Option<i8>,
}

/// Any packet the controller consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    A(APacket),
    G(GPacket),
    M(MPacket),
    T(TimePacket),
}

impl Packet {
    pub fn itow(&self) -> f64 {
        match self {
            Packet::A(p) => p.itow,
            Packet::G(p) => p.itow,
            Packet::M(p) => p.itow,
            Packet::T(p) => f64::from(p.itow_s),
        }
    }
}

/// Compensates the known one-pulse-per-second counter wrap of the logger:
/// when the interval from the previous packet of the same kind lies in
/// [1, 2) seconds, exactly one second is subtracted from the new time
/// stamp. The symmetric negative interval is intentionally left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct PpsGuard {
    last_itow: Option<f64>,
}

impl PpsGuard {
    pub fn correct(&mut self, itow: f64) -> f64 {
        let corrected = match self.last_itow {
            Some(last) => {
                let delta = itow - last;
                if (1.0..2.0).contains(&delta) {
                    itow - 1.0
                } else {
                    itow
                }
            }
            None => itow,
        };
        self.last_itow = Some(corrected);
        corrected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_interval() {
        // End of week to start of next week.
        let d = interval_rollover(SECONDS_PER_WEEK - 1.0, 1.0);
        assert!((d - 2.0).abs() < 1e-9);
        let d = interval_rollover(1.0, SECONDS_PER_WEEK - 1.0);
        assert!((d + 2.0).abs() < 1e-9);
        // Plain case unchanged.
        assert!((interval_rollover(100.0, 130.0) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn rollover_ordering() {
        assert_eq!(compare_itow(SECONDS_PER_WEEK - 1.0, 1.0), Ordering::Less);
        assert_eq!(compare_itow(10.0, 5.0), Ordering::Greater);
        assert_eq!(compare_itow(5.0, 5.0), Ordering::Equal);
    }

    #[test]
    fn pps_guard_subtracts_one_second() {
        let mut guard = PpsGuard::default();
        assert_eq!(guard.correct(100.00), 100.00);
        assert_eq!(guard.correct(100.01), 100.01);
        // Counter wrap: jump of 1.01 s at a 10 ms cadence.
        assert_eq!(guard.correct(101.02), 100.02);
        // Normal cadence resumes against the corrected stamp.
        assert_eq!(guard.correct(100.03), 100.03);
        // A 2.5 s gap is a genuine gap and stays.
        assert_eq!(guard.correct(102.53), 102.53);
    }
}
