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

/*! # Earth models

WGS-84 ellipsoid geometry, normal gravity, and the magnetic field model
used by the heading auxiliary.
*/

use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub mod magnetic;

/// WGS-84 semi-major axis, in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS-84 first eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);
/// Earth rotation rate, in rad/s.
pub const OMEGA_EARTH: f64 = 7.292_115_146_7e-5;
/// Normal gravity at the equator, in m/s².
pub const GAMMA_EQUATOR: f64 = 9.780_325_335_9;
/// Somigliana constant k.
const SOMIGLIANA_K: f64 = 1.931_852_652_41e-3;
/// m = ω²a²b/GM, used by the free-air correction.
const GRAVITY_M: f64 = 3.449_786_506_84e-3;

/// Meridian radius of curvature R_M at the provided geodetic latitude.
pub fn meridian_radius(latitude: f64) -> f64 {
    let s2 = latitude.sin().powi(2);
    WGS84_A * (1.0 - WGS84_E2) / (1.0 - WGS84_E2 * s2).powf(1.5)
}

/// Transverse (prime vertical) radius of curvature R_N.
pub fn transverse_radius(latitude: f64) -> f64 {
    let s2 = latitude.sin().powi(2);
    WGS84_A / (1.0 - WGS84_E2 * s2).sqrt()
}

/// Somigliana normal gravity on the ellipsoid surface, in m/s².
pub fn normal_gravity_surface(latitude: f64) -> f64 {
    let s2 = latitude.sin().powi(2);
    GAMMA_EQUATOR * (1.0 + SOMIGLIANA_K * s2) / (1.0 - WGS84_E2 * s2).sqrt()
}

/// Normal gravity at geodetic latitude and ellipsoidal height, with the
/// WGS-84 free-air correction.
pub fn normal_gravity(latitude: f64, height: f64) -> f64 {
    let s2 = latitude.sin().powi(2);
    normal_gravity_surface(latitude)
        * (1.0 - 2.0 / WGS84_A * (1.0 + WGS84_F + GRAVITY_M - 2.0 * WGS84_F * s2) * height
            + 3.0 * height.powi(2) / WGS84_A.powi(2))
}

/// Gravity anomaly grid read from an external file; the engine does not
/// embed any geopotential coefficients.
///
/// Format: a header line `n_lat n_lon lat0_deg lon0_deg dlat_deg dlon_deg`
/// followed by `n_lat · n_lon` anomaly values in m/s², row major from
/// `lat0`/`lon0`.
#[derive(Debug, Clone)]
pub struct AnomalyGrid {
    n_lat: usize,
    n_lon: usize,
    lat0: f64,
    lon0: f64,
    dlat: f64,
    dlon: f64,
    values: Vec<f64>,
}

impl AnomalyGrid {
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut numbers = Vec::new();
        for line in reader.lines() {
            for tok in line?.split_whitespace() {
                numbers.push(tok.parse::<f64>().map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                })?);
            }
        }
        if numbers.len() < 6 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "anomaly grid header truncated",
            ));
        }
        let (n_lat, n_lon) = (numbers[0] as usize, numbers[1] as usize);
        if numbers.len() != 6 + n_lat * n_lon {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "anomaly grid size does not match its header",
            ));
        }
        Ok(Self {
            n_lat,
            n_lon,
            lat0: numbers[2].to_radians(),
            lon0: numbers[3].to_radians(),
            dlat: numbers[4].to_radians(),
            dlon: numbers[5].to_radians(),
            values: numbers[6..].to_vec(),
        })
    }

    /// Bilinear interpolation of the anomaly, clamped to the grid edges.
    pub fn anomaly(&self, latitude: f64, longitude: f64) -> f64 {
        let fi = ((latitude - self.lat0) / self.dlat).clamp(0.0, (self.n_lat - 1) as f64);
        let fj = ((longitude - self.lon0) / self.dlon).clamp(0.0, (self.n_lon - 1) as f64);
        let (i0, j0) = (fi.floor() as usize, fj.floor() as usize);
        let (i1, j1) = ((i0 + 1).min(self.n_lat - 1), (j0 + 1).min(self.n_lon - 1));
        let (wi, wj) = (fi - i0 as f64, fj - j0 as f64);
        let at = |i: usize, j: usize| self.values[i * self.n_lon + j];
        at(i0, j0) * (1.0 - wi) * (1.0 - wj)
            + at(i1, j0) * wi * (1.0 - wj)
            + at(i0, j1) * (1.0 - wi) * wj
            + at(i1, j1) * wi * wj
    }
}

/// Gravity model selected once at construction.
#[derive(Debug, Clone, Default)]
pub enum GravityModel {
    /// WGS-84 normal gravity with free-air height correction.
    #[default]
    Wgs84Normal,
    /// Normal gravity plus an externally supplied anomaly grid.
    Egm(AnomalyGrid),
}

impl GravityModel {
    /// Builds the EGM variant from a grid file, falling back to normal
    /// gravity when the file cannot be read.
    pub fn egm_or_fallback<P: AsRef<Path>>(path: P) -> Self {
        match AnomalyGrid::load(&path) {
            Ok(grid) => GravityModel::Egm(grid),
            Err(e) => {
                warn!(
                    "could not load gravity anomaly grid from {}: {e}; falling back to normal gravity",
                    path.as_ref().display()
                );
                GravityModel::Wgs84Normal
            }
        }
    }

    /// Down component of gravity at the provided position, in m/s².
    pub fn down(&self, latitude: f64, longitude: f64, height: f64) -> f64 {
        let gamma = normal_gravity(latitude, height);
        match self {
            GravityModel::Wgs84Normal => gamma,
            GravityModel::Egm(grid) => gamma + grid.anomaly(latitude, longitude),
        }
    }
}
