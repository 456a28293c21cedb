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

use erebus::earth::meridian_radius;
use erebus::ins::{build_position_quaternion, Ins};
use erebus::msr::{APacket, GPacket, GpsSolution, Packet};
use erebus::process::{run_stream, FusionProcess};
use erebus::sync::RecordTag;
use erebus::{FusionConfig, NavError};
use nalgebra::Vector3;
use std::f64::consts::PI;

const DEG: f64 = PI / 180.0;

struct TruthSim {
    ins: Ins,
}

impl TruthSim {
    fn at_rest(latitude: f64, longitude: f64, height: f64) -> Self {
        let mut ins = Ins::new(erebus::earth::GravityModel::Wgs84Normal, None);
        ins.init_position(latitude, longitude, height);
        ins.init_velocity(0.0, 0.0, 0.0);
        ins.init_attitude(0.0, 0.0, 0.0);
        Self { ins }
    }

    fn step(&mut self, dt: f64) -> (Vector3<f64>, Vector3<f64>) {
        let omega_ie = self.ins.earth_rate();
        let f_n = -Vector3::new(0.0, 0.0, self.ins.gravity_down());
        let f_b = self.ins.state.q_b2n.inverse() * f_n;
        let omega_b = self.ins.state.q_b2n.inverse() * omega_ie;
        self.ins.update(&f_b, &omega_b, dt);
        (f_b, omega_b)
    }

    fn gps(&self, itow: f64, sigma_2d: f64) -> GPacket {
        GPacket {
            itow,
            solution: GpsSolution {
                latitude: self.ins.state.latitude(),
                longitude: self.ins.state.longitude(),
                height: self.ins.state.height,
                v_north: 0.0,
                v_east: 0.0,
                v_down: 0.0,
                sigma_2d,
                sigma_height: 5.0,
                sigma_vel: 0.1,
            },
            lever_arm: None,
        }
    }
}

fn a_packet(itow: f64, readings: (Vector3<f64>, Vector3<f64>)) -> Packet {
    Packet::A(APacket {
        itow,
        accel: readings.0,
        omega: readings.1,
    })
}

#[test]
fn back_propagation_and_realtime_are_exclusive() {
    let cfg = FusionConfig {
        back_propagate: true,
        realtime: true,
        ..Default::default()
    };
    assert!(matches!(
        FusionProcess::new(cfg),
        Err(NavError::ConfigConflict(_))
    ));
}

/// A delayed fix corrects the snapshot nearest its time stamp; the
/// corrected past is re-emitted with `BP_MU`/`BP_TU` tags in time order,
/// superseding the plain forward propagation.
#[test]
fn back_propagation_corrects_the_past() {
    let cfg = FusionConfig {
        back_propagate: true,
        bp_depth: 1.0,
        dump_update: true,
        dump_correct: true,
        ..Default::default()
    };
    let mut process = FusionProcess::new(cfg).unwrap();

    let lat = 52.0 * DEG;
    let lon = 13.4 * DEG;
    let mut truth = TruthSim::at_rest(lat, lon, 80.0);

    let dt = 0.01;
    let mut itow = 500_000.0;
    for _ in 0..100 {
        itow += dt;
        let readings = truth.step(dt);
        let records = process.handle(a_packet(itow, readings)).unwrap();
        // In back-propagation mode, plain time updates emit nothing.
        assert!(records.is_empty());
    }
    process
        .handle(Packet::G(truth.gps(itow, 5.0)))
        .unwrap();
    assert!(process.is_initialized());

    // Two more seconds of quiet data.
    for _ in 0..200 {
        itow += dt;
        let readings = truth.step(dt);
        process.handle(a_packet(itow, readings)).unwrap();
    }

    // Inject a 5 m north step error into the head state.
    let r_lat = meridian_radius(lat);
    {
        let state = &mut process.sync_filter_mut().filter_mut().ins_mut().state;
        let (cur_lat, cur_lon, alpha) = state.geodetic();
        state.q_e2n = build_position_quaternion(cur_lat + 5.0 / r_lat, cur_lon, alpha);
    }
    let error_now = (process.sync_filter().filter().ins().state.latitude() - lat) * r_lat;
    assert!(error_now > 4.0, "error injected: {error_now} m");

    // 200 ms of propagation carries the error into the snapshot ring.
    let fix_itow = itow;
    for _ in 0..20 {
        itow += dt;
        let readings = truth.step(dt);
        process.handle(a_packet(itow, readings)).unwrap();
    }

    // A truth-consistent fix for the 200 ms old snapshot.
    let records = process
        .handle(Packet::G(truth.gps(fix_itow, 0.3)))
        .unwrap();
    assert!(!records.is_empty(), "the correction re-emits the past");
    assert_eq!(records[0].tag, RecordTag::BpMu);
    assert!((records[0].stamp.itow - fix_itow).abs() < 0.02);
    for pair in records.windows(2) {
        assert_eq!(pair[1].tag, RecordTag::BpTu);
        assert!(pair[1].stamp.itow >= pair[0].stamp.itow, "batch in time order");
    }
    // Every re-emitted record has been pulled back towards the truth.
    for record in &records {
        let err = (record.latitude_deg * DEG - lat) * r_lat;
        assert!(
            err.abs() < 2.0,
            "record at {} still {err} m off",
            record.stamp.itow
        );
    }
    // And so has the head state the engine keeps integrating from.
    let head_err =
        (process.sync_filter().filter().ins().state.latitude() - lat) * r_lat;
    assert!(head_err.abs() < 2.0, "head error {head_err} m");
}

/// A fix lagging the inertial stream applies at its own epoch and the
/// emitted measurement record carries the fix's time stamp.
#[test]
fn realtime_handles_lagging_and_early_fixes() {
    let cfg = FusionConfig {
        realtime: true,
        dump_update: true,
        dump_correct: true,
        ..Default::default()
    };
    let mut process = FusionProcess::new(cfg).unwrap();

    let lat = 35.7 * DEG;
    let mut truth = TruthSim::at_rest(lat, 139.7 * DEG, 40.0);

    let dt = 0.01;
    let mut itow = 600_000.0;
    for _ in 0..100 {
        itow += dt;
        let readings = truth.step(dt);
        process.handle(a_packet(itow, readings)).unwrap();
    }
    process
        .handle(Packet::G(truth.gps(itow, 5.0)))
        .unwrap();
    assert!(process.is_initialized());

    // One more second of data, then a fix that is 100 ms stale.
    for _ in 0..100 {
        itow += dt;
        let readings = truth.step(dt);
        process.handle(a_packet(itow, readings)).unwrap();
    }
    let stale_itow = itow - 0.1;
    let records = process
        .handle(Packet::G(truth.gps(stale_itow, 1.0)))
        .unwrap();
    let mu: Vec<_> = records
        .iter()
        .filter(|r| r.tag == RecordTag::Mu)
        .collect();
    assert_eq!(mu.len(), 1);
    // The record carries the fix's own itow, not the filter clock.
    assert!((mu[0].stamp.itow - stale_itow).abs() < 1e-9);

    // Forward integration resumes.
    itow += dt;
    let readings = truth.step(dt);
    let records = process.handle(a_packet(itow, readings)).unwrap();
    assert!(records.iter().any(|r| r.tag == RecordTag::Tu));

    // An early fix parks until the inertial stream catches up.
    let early_itow = itow + 0.05;
    let records = process
        .handle(Packet::G(truth.gps(early_itow, 1.0)))
        .unwrap();
    assert!(records.is_empty(), "early fix is deferred");
    let mut seen_mu_at = None;
    for _ in 0..10 {
        itow += dt;
        let readings = truth.step(dt);
        for record in process.handle(a_packet(itow, readings)).unwrap() {
            if record.tag == RecordTag::Mu {
                seen_mu_at = Some(record.stamp.itow);
            }
        }
    }
    assert!((seen_mu_at.expect("deferred fix applied") - early_itow).abs() < 1e-9);
}

/// Two lagging fixes inside one inertial sample interval: the second
/// rewind must land on the first fix's correction, not on the stale
/// pre-correction snapshot.
#[test]
fn realtime_consecutive_fixes_in_one_interval_compound() {
    let cfg = FusionConfig {
        realtime: true,
        dump_correct: true,
        ..Default::default()
    };
    let mut process = FusionProcess::new(cfg).unwrap();

    let lat = 51.5 * DEG;
    let mut truth = TruthSim::at_rest(lat, -0.1 * DEG, 25.0);
    let r_lat = meridian_radius(lat);

    let dt = 0.01;
    let mut itow = 800_000.0;
    for _ in 0..100 {
        itow += dt;
        let readings = truth.step(dt);
        process.handle(a_packet(itow, readings)).unwrap();
    }
    process.handle(Packet::G(truth.gps(itow, 5.0))).unwrap();
    assert!(process.is_initialized());

    for _ in 0..100 {
        itow += dt;
        let readings = truth.step(dt);
        process.handle(a_packet(itow, readings)).unwrap();
    }

    // First fix, inside the last buffered step, reporting the antenna
    // 10 m north of the truth.
    let mut shifted = truth.gps(itow - 0.005, 1.0);
    shifted.solution.latitude += 10.0 / r_lat;
    let records = process.handle(Packet::G(shifted)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tag, RecordTag::Mu);
    assert!((records[0].stamp.itow - (itow - 0.005)).abs() < 1e-9);
    let after_first =
        (process.sync_filter().filter().ins().state.latitude() - lat) * r_lat;
    assert!(after_first > 8.0, "first fix pulled north: {after_first} m");

    // Second fix, still inside the same interval, back at the truth. Its
    // correction must start from the first fix's posterior: with equal
    // measurement weights the estimate splits the difference rather than
    // snapping back to the (huge-variance) pre-fix prior.
    let records = process
        .handle(Packet::G(truth.gps(itow - 0.003, 1.0)))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!((records[0].stamp.itow - (itow - 0.003)).abs() < 1e-9);

    let after_second =
        (process.sync_filter().filter().ins().state.latitude() - lat) * r_lat;
    assert!(
        after_second > 3.0 && after_second < 7.0,
        "corrections compound: {after_second} m north"
    );
}

/// Offline discipline: an out-of-order stream comes out sorted and the
/// emitted time stamps never decrease.
#[test]
fn offline_emission_is_monotonic() {
    let cfg = FusionConfig {
        dump_update: true,
        dump_correct: true,
        ..Default::default()
    };

    let mut truth = TruthSim::at_rest(47.0 * DEG, 8.5 * DEG, 500.0);
    let dt = 0.01;
    let mut itow = 700_000.0;
    let mut packets = Vec::new();
    for second in 0..5 {
        let mut chunk = Vec::new();
        for _ in 0..100 {
            itow += dt;
            let readings = truth.step(dt);
            chunk.push(a_packet(itow, readings));
        }
        // The fix for this second is delivered before its inertial data,
        // as a delayed receiver would.
        let fix = Packet::G(truth.gps(itow, 5.0));
        let at = if second == 0 { chunk.len() } else { 0 };
        chunk.insert(at, fix);
        packets.extend(chunk);
    }

    let mut out = Vec::new();
    run_stream(cfg, packets, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("mode,itow"));

    let mut previous = f64::NEG_INFINITY;
    let mut count = 0;
    for line in lines {
        let mut fields = line.split(',');
        let mode = fields.next().unwrap();
        assert!(mode == "TU" || mode == "MU");
        let stamp: f64 = fields.next().unwrap().parse().unwrap();
        assert!(
            stamp >= previous,
            "timestamp regression: {stamp} after {previous}"
        );
        previous = stamp;
        count += 1;
    }
    assert!(count > 300, "records were emitted");
}
