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

/*! # erebus

[Erebus](https://en.wikipedia.org/wiki/Erebus): loosely-coupled INS/GPS
integration for post-processing logged flight data. Fuses inertial
measurements with GPS receiver solutions through a strapdown mechanization
and an extended Kalman filter (standard or UD-factorized, optionally
bias-augmented), producing time-stamped geodetic position, NED velocity,
attitude, sensor biases, and one-sigma uncertainties.
*/

/// Dense run-time sized matrices with shared storage, composable views and
/// the LU/UD/eigen decompositions the filter needs.
pub mod linalg;

/// WGS-84 ellipsoid geometry, gravity, and the geomagnetic field model.
pub mod earth;

/// Strapdown inertial mechanization in a wander-azimuth local-level frame.
pub mod ins;

/// Kalman filter cores: standard (Joseph form) and UD (Thornton/Bierman).
pub mod kf;

/// The error-state filter tying the mechanization to the Kalman cores.
pub mod fusion;

/// Synchronization policies: offline sorting, back-propagation, realtime.
pub mod sync;

/// Measurement packet types and GPS time-of-week arithmetic.
pub mod msr;

/// The fusion controller: gating, initialization, magnetic heading.
pub mod process;

/// Output records and time stamping.
pub mod report;

/// Utility functions shared by different modules.
pub mod utils;

mod errors;
/// Erebus will (almost) never panic and functions which may fail will return an error.
pub use self::errors::NavError;

/// Re-export of hifitime
pub mod time {
    pub use hifitime::*;
}

pub use self::process::{run_stream, FusionConfig, FusionProcess};
