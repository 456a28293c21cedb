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

/*! # Strapdown inertial mechanization

Propagates position, velocity, and attitude in a wander-azimuth local-level
frame on the WGS-84 ellipsoid. Horizontal position is a unit quaternion
`q_e2n` parameterizing latitude, longitude, and the wander angle, which
keeps the mechanization free of the polar tangent singularity: the
transport rate carries no vertical component and the wander angle is
whatever the quaternion says it is.

Frame and operator conventions, used consistently across the crate:

- `q_X2Y` maps X-frame coordinates to Y-frame coordinates through
  `v_Y = q ⊗ (0, v_X) ⊗ q*`.
- The navigation frame `n` is NED rotated about Down by the wander angle α;
  velocity is stored in `n` and converted to true NED at the accessors.
- True heading = Euler yaw of `q_b2n` + α.
*/

use crate::earth::{
    meridian_radius, normal_gravity, transverse_radius, GravityModel, OMEGA_EARTH,
};
use nalgebra::{Rotation3, UnitQuaternion, Vector3};
use std::f64::consts::FRAC_PI_2;

mod bias;
pub use bias::SensorBias;

/// Position, velocity and attitude of the vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsState {
    /// Earth to navigation frame quaternion: latitude, longitude, wander
    /// azimuth.
    pub q_e2n: UnitQuaternion<f64>,
    /// Ellipsoidal height, in meters.
    pub height: f64,
    /// Velocity in the navigation (wander) frame, in m/s.
    pub v: Vector3<f64>,
    /// Body to navigation frame attitude quaternion.
    pub q_b2n: UnitQuaternion<f64>,
}

impl Default for InsState {
    fn default() -> Self {
        Self {
            q_e2n: build_position_quaternion(0.0, 0.0, 0.0),
            height: 0.0,
            v: Vector3::zeros(),
            q_b2n: UnitQuaternion::identity(),
        }
    }
}

/// Builds `q_e2n` from geodetic latitude, longitude and wander azimuth.
pub fn build_position_quaternion(
    latitude: f64,
    longitude: f64,
    azimuth: f64,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -azimuth)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), latitude + FRAC_PI_2)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -longitude)
}

impl InsState {
    /// Extracts (latitude, longitude, wander azimuth) from `q_e2n`.
    pub fn geodetic(&self) -> (f64, f64, f64) {
        let c = self.q_e2n.to_rotation_matrix().into_inner();
        let latitude = (-c[(2, 2)]).clamp(-1.0, 1.0).asin();
        let longitude = (-c[(2, 1)]).atan2(-c[(2, 0)]);
        let azimuth = (-c[(1, 2)]).atan2(c[(0, 2)]);
        (latitude, longitude, azimuth)
    }

    pub fn latitude(&self) -> f64 {
        self.geodetic().0
    }

    pub fn longitude(&self) -> f64 {
        self.geodetic().1
    }

    /// Wander azimuth α, in radians.
    pub fn azimuth(&self) -> f64 {
        self.geodetic().2
    }

    /// Velocity in true north-east-down coordinates.
    pub fn v_ned(&self) -> Vector3<f64> {
        let alpha = self.azimuth();
        Rotation3::from_axis_angle(&Vector3::z_axis(), alpha) * self.v
    }

    pub fn v_north(&self) -> f64 {
        self.v_ned()[0]
    }

    pub fn v_east(&self) -> f64 {
        self.v_ned()[1]
    }

    pub fn v_down(&self) -> f64 {
        // Down is invariant under the wander rotation.
        self.v[2]
    }

    /// Euler angles of `q_b2n`: (roll, pitch, yaw-in-wander-frame).
    pub fn euler(&self) -> (f64, f64, f64) {
        self.q_b2n.euler_angles()
    }

    /// True heading, in radians.
    pub fn heading(&self) -> f64 {
        let (_, _, psi) = self.euler();
        crate::utils::between_pm_pi(psi + self.azimuth())
    }

    pub fn pitch(&self) -> f64 {
        self.euler().1
    }

    pub fn roll(&self) -> f64 {
        self.euler().0
    }
}

/// The strapdown mechanization: an [`InsState`], its gravity model, and the
/// optional Gauss-Markov sensor bias augmentation.
#[derive(Debug, Clone)]
pub struct Ins {
    pub state: InsState,
    pub gravity: GravityModel,
    pub bias: Option<SensorBias>,
}

impl Ins {
    pub fn new(gravity: GravityModel, bias: Option<SensorBias>) -> Self {
        Self {
            state: InsState::default(),
            gravity,
            bias,
        }
    }

    pub fn init_position(&mut self, latitude: f64, longitude: f64, height: f64) {
        self.state.q_e2n = build_position_quaternion(latitude, longitude, 0.0);
        self.state.height = height;
    }

    pub fn init_velocity(&mut self, v_north: f64, v_east: f64, v_down: f64) {
        let alpha = self.state.azimuth();
        self.state.v = Rotation3::from_axis_angle(&Vector3::z_axis(), -alpha)
            * Vector3::new(v_north, v_east, v_down);
    }

    pub fn init_attitude(&mut self, yaw: f64, pitch: f64, roll: f64) {
        let alpha = self.state.azimuth();
        self.state.q_b2n = UnitQuaternion::from_euler_angles(roll, pitch, yaw - alpha);
    }

    /// Earth rate resolved in the navigation frame.
    pub fn earth_rate(&self) -> Vector3<f64> {
        let (lat, _, alpha) = self.state.geodetic();
        let omega_ned = Vector3::new(OMEGA_EARTH * lat.cos(), 0.0, -OMEGA_EARTH * lat.sin());
        Rotation3::from_axis_angle(&Vector3::z_axis(), -alpha) * omega_ned
    }

    /// Transport rate resolved in the navigation frame for the provided
    /// navigation-frame velocity. Free azimuth: no vertical component.
    pub fn transport_rate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let (lat, _, alpha) = self.state.geodetic();
        let to_ned = Rotation3::from_axis_angle(&Vector3::z_axis(), alpha);
        let v_ned = to_ned * v;
        let rm = meridian_radius(lat) + self.state.height;
        let rn = transverse_radius(lat) + self.state.height;
        let omega_ned = Vector3::new(v_ned[1] / rn, -v_ned[0] / rm, 0.0);
        to_ned.inverse() * omega_ned
    }

    /// Gravity in the navigation frame at the current position.
    pub fn gravity_down(&self) -> f64 {
        let (lat, lon, _) = self.state.geodetic();
        self.gravity.down(lat, lon, self.state.height)
    }

    /// Normal gravity magnitude at the current position; used by the error
    /// model regardless of the anomaly grid.
    pub fn normal_gravity_here(&self) -> f64 {
        normal_gravity(self.state.geodetic().0, self.state.height)
    }

    /// Propagates the state over `dt` seconds given the measured specific
    /// force and angular rate in the body frame.
    pub fn update(&mut self, accel: &Vector3<f64>, omega: &Vector3<f64>, dt: f64) {
        // Estimated biases come off the raw measurements first.
        let (f_b, omega_b) = match &self.bias {
            Some(bias) => (accel - bias.accel, omega - bias.gyro),
            None => (*accel, *omega),
        };

        let omega_ie = self.earth_rate();
        let omega_en = self.transport_rate(&self.state.v);

        // Specific force to the navigation frame, then the velocity
        // differential equation with Coriolis and gravity.
        let f_n = self.state.q_b2n * f_b;
        let g_n = Vector3::new(0.0, 0.0, self.gravity_down());
        let v_dot = f_n + g_n - (omega_ie * 2.0 + omega_en).cross(&self.state.v);
        let v_new = self.state.v + v_dot * dt;

        // Trapezoidal velocity drives the transport integration.
        let v_avg = (self.state.v + v_new) * 0.5;
        let omega_en_avg = self.transport_rate(&v_avg);

        self.state.q_e2n =
            UnitQuaternion::from_scaled_axis(omega_en_avg * dt).conjugate() * self.state.q_e2n;
        self.state.height -= v_avg[2] * dt;

        let omega_in = omega_ie + omega_en_avg;
        self.state.q_b2n = UnitQuaternion::from_scaled_axis(omega_in * dt).conjugate()
            * self.state.q_b2n
            * UnitQuaternion::from_scaled_axis(omega_b * dt);

        self.state.v = v_new;
        self.state.q_e2n.renormalize();
        self.state.q_b2n.renormalize();

        if let Some(bias) = &mut self.bias {
            bias.propagate(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::deg2rad;

    #[test]
    fn position_quaternion_roundtrip() {
        for &(lat, lon, alpha) in &[
            (0.6, -1.2, 0.0),
            (-0.4, 2.9, 0.1),
            (0.0, 0.0, -0.3),
            (1.2, 0.5, 0.02),
        ] {
            let q = build_position_quaternion(lat, lon, alpha);
            let state = InsState {
                q_e2n: q,
                ..Default::default()
            };
            let (lat2, lon2, alpha2) = state.geodetic();
            assert!((lat - lat2).abs() < 1e-12, "latitude");
            assert!((lon - lon2).abs() < 1e-12, "longitude");
            assert!((alpha - alpha2).abs() < 1e-12, "azimuth");
        }
    }

    #[test]
    fn heading_accounts_for_wander() {
        let mut ins = Ins::new(GravityModel::Wgs84Normal, None);
        ins.init_position(0.7, 0.1, 0.0);
        ins.init_attitude(deg2rad(30.0), 0.0, 0.0);
        assert!((ins.state.heading() - deg2rad(30.0)).abs() < 1e-12);
        // Re-express the same physical attitude in a frame wandered by 10°.
        let alpha = deg2rad(10.0);
        ins.state.q_e2n = build_position_quaternion(0.7, 0.1, alpha);
        ins.init_attitude(deg2rad(30.0), 0.0, 0.0);
        assert!((ins.state.heading() - deg2rad(30.0)).abs() < 1e-12);
        let (_, _, psi) = ins.state.euler();
        assert!((psi - deg2rad(20.0)).abs() < 1e-12);
    }

    #[test]
    fn velocity_roundtrip_through_wander() {
        let mut ins = Ins::new(GravityModel::Wgs84Normal, None);
        ins.state.q_e2n = build_position_quaternion(0.7, 0.1, deg2rad(25.0));
        ins.init_velocity(10.0, -2.0, 0.5);
        let v_ned = ins.state.v_ned();
        assert!((v_ned[0] - 10.0).abs() < 1e-12);
        assert!((v_ned[1] + 2.0).abs() < 1e-12);
        assert!((v_ned[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn static_rest_is_stationary() {
        // At rest, feeding the exact gravity reaction and earth rate must
        // keep the state put to integration accuracy.
        let mut ins = Ins::new(GravityModel::Wgs84Normal, None);
        let lat = deg2rad(45.0);
        ins.init_position(lat, deg2rad(7.0), 250.0);
        ins.init_velocity(0.0, 0.0, 0.0);
        ins.init_attitude(0.0, 0.0, 0.0);

        let dt = 0.01;
        for _ in 0..1000 {
            let f_b = ins.state.q_b2n.inverse() * Vector3::new(0.0, 0.0, -ins.gravity_down());
            let omega_b = ins.state.q_b2n.inverse() * ins.earth_rate();
            ins.update(&f_b, &omega_b, dt);
        }

        assert!(ins.state.v.norm() < 1e-6, "velocity {}", ins.state.v.norm());
        assert!((ins.state.latitude() - lat).abs() < 1e-9);
        assert!((ins.state.height - 250.0).abs() < 1e-3);
        assert!(ins.state.heading().abs() < 1e-6);
        assert!(ins.state.pitch().abs() < 1e-6);
        assert!((ins.state.q_b2n.as_ref().norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn northward_cruise_moves_latitude() {
        let mut ins = Ins::new(GravityModel::Wgs84Normal, None);
        let lat0 = deg2rad(40.0);
        ins.init_position(lat0, 0.0, 0.0);
        ins.init_velocity(100.0, 0.0, 0.0);
        ins.init_attitude(0.0, 0.0, 0.0);

        let dt = 0.01;
        for _ in 0..1000 {
            // Force-free coasting: hold velocity constant by feeding the
            // exact counter-acceleration.
            let omega_ie = ins.earth_rate();
            let omega_en = ins.transport_rate(&ins.state.v);
            let g = Vector3::new(0.0, 0.0, ins.gravity_down());
            let f_n = (omega_ie * 2.0 + omega_en).cross(&ins.state.v) - g;
            let f_b = ins.state.q_b2n.inverse() * f_n;
            let omega_b = ins.state.q_b2n.inverse() * (omega_ie + omega_en);
            ins.update(&f_b, &omega_b, dt);
        }

        // 1 km north in 10 s.
        let expected = lat0 + 1000.0 / (meridian_radius(lat0) + 0.0);
        assert!(
            (ins.state.latitude() - expected).abs() * 6.4e6 < 1.0,
            "latitude error {} m",
            (ins.state.latitude() - expected).abs() * 6.4e6
        );
        let v_ned = ins.state.v_ned();
        assert!((v_ned[0] - 100.0).abs() < 1e-3);
        assert!(v_ned[1].abs() < 1e-3);
    }
}
