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

/*! # Fusion controller

Owns the filter and decides what every packet does to it: GPS quality
gating, initialization from buffered inertial data, the magnetic heading
estimate and its low-speed auxiliary update, lever arm averaging, and the
bookkeeping of dropped packets. The controller is single threaded and
advances only when a packet is delivered.
*/

use crate::earth::magnetic::DipoleField;
use crate::errors::NavError;
use crate::fusion::FilterBuilder;
use crate::msr::{
    interval, interval_rollover, APacket, GPacket, MPacket, Packet, PpsGuard, SECONDS_PER_WEEK,
};
use crate::report::{NavRecord, Reporter, TimeStamper};
use crate::sync::{
    BackPropagateFilter, CorrectDisposition, NavUpdate, RealTimeFilter, RecordTag, SortingBuffer,
    SyncFilter,
};
use crate::utils::{between_pm_pi, deg2rad, rad2deg};
use log::{debug, error, info, warn};
use nalgebra::{Rotation3, UnitQuaternion, Vector3};
use std::collections::VecDeque;
use std::io::Write;

pub mod conf;
pub use conf::{FusionConfig, SyncStrategy};

/// Cap of the recent inertial packet window.
const RECENT_A_CAP: usize = 0x100;
/// Cap of the recent magnetometer window.
const RECENT_M_CAP: usize = 0x10;
/// Buffered inertial packets required before initialization, unless the
/// full initial attitude was given by the user.
const MIN_A_PACKETS_FOR_INIT: usize = 0x10;
/// Inertial samples averaged around a fix for the lever arm rate.
const LEVER_ARM_MEAN_SAMPLES: usize = 0x10;
/// A time update is dropped when its interval reaches this many seconds.
const INTERVAL_THRESHOLD: f64 = 10.0;

/// Counters of silently dropped packets, reported at end of stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounters {
    /// Inertial packets with a non-positive or oversized interval.
    pub time_out_of_order: usize,
    /// Packets which arrived before the filter initialized.
    pub uninitialized: usize,
}

/// Lifecycle of the filter as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Status {
    Uninitialized,
    JustInitialized,
    TimeUpdated,
    MeasurementUpdated,
    WaitingUpdate,
}

fn push_capped<T>(buf: &mut VecDeque<T>, cap: usize, item: T) {
    if buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

/// Index of the packet window entry so that `group_size` entries starting
/// there straddle `itow`.
fn nearest_index(itows: &[f64], itow: f64, group_size: usize) -> usize {
    let mut head = 0;
    let mut eval = group_size / 2;
    let mut remaining = itows.len();
    while remaining > group_size {
        if itows[eval] >= itow {
            break;
        }
        remaining -= 1;
        head += 1;
        eval += 1;
    }
    head
}

/// The fusion controller.
pub struct FusionProcess {
    cfg: FusionConfig,
    sync: SyncFilter,
    recent_a: VecDeque<APacket>,
    recent_m: VecDeque<MPacket>,
    min_a_packets_for_init: usize,
    status: Status,
    stamper: TimeStamper,
    counters: DropCounters,
    mag_model: DipoleField,
    pps_a: PpsGuard,
    pps_m: PpsGuard,
    ended: bool,
}

fn build_sync_filter(cfg: &FusionConfig) -> Result<SyncFilter, NavError> {
    let filter = FilterBuilder::build(cfg)?;
    Ok(match cfg.sync_strategy() {
        SyncStrategy::Offline => SyncFilter::Plain(filter),
        SyncStrategy::BackPropagation => {
            SyncFilter::BackProp(BackPropagateFilter::new(filter, cfg.bp_depth))
        }
        SyncStrategy::RealTime => {
            SyncFilter::RealTime(RealTimeFilter::new(filter, cfg.realtime_max_lag))
        }
    })
}

impl FusionProcess {
    pub fn new(cfg: FusionConfig) -> Result<Self, NavError> {
        let sync = build_sync_filter(&cfg)?;
        let min_a_packets_for_init =
            if cfg.initial_attitude.mode == conf::AttitudeMode::FullGiven {
                1
            } else {
                MIN_A_PACKETS_FOR_INIT
            };
        let stamper = TimeStamper::new(cfg.time_stamp);
        Ok(Self {
            cfg,
            sync,
            recent_a: VecDeque::with_capacity(RECENT_A_CAP),
            recent_m: VecDeque::with_capacity(RECENT_M_CAP),
            min_a_packets_for_init,
            status: Status::Uninitialized,
            stamper,
            counters: DropCounters::default(),
            mag_model: DipoleField::default(),
            pps_a: PpsGuard::default(),
            pps_m: PpsGuard::default(),
            ended: false,
        })
    }

    /// The filter behind the active synchronization policy; handy for
    /// bench setups and inspection.
    pub fn sync_filter(&self) -> &SyncFilter {
        &self.sync
    }

    pub fn sync_filter_mut(&mut self) -> &mut SyncFilter {
        &mut self.sync
    }

    pub fn is_initialized(&self) -> bool {
        self.status >= Status::JustInitialized
    }

    /// Whether a fix past the configured end of window arrived; the stream
    /// may stop.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn counters(&self) -> DropCounters {
        self.counters
    }

    /// Feeds one packet, returning the records it produced.
    pub fn handle(&mut self, packet: Packet) -> Result<Vec<NavRecord>, NavError> {
        self.before_any_update();
        match packet {
            Packet::A(a) => self.handle_a(a),
            Packet::G(g) => self.handle_g(g),
            Packet::M(m) => {
                self.handle_m(m);
                Ok(Vec::new())
            }
            Packet::T(t) => {
                self.stamper.update(&t);
                Ok(Vec::new())
            }
        }
    }

    fn before_any_update(&mut self) {
        if self.status >= Status::JustInitialized {
            self.status = Status::WaitingUpdate;
        }
    }

    fn records(&self, updates: &[NavUpdate]) -> Vec<NavRecord> {
        updates
            .iter()
            .filter(|u| match u.tag {
                RecordTag::Tu | RecordTag::BpTu => self.cfg.dump_update,
                RecordTag::Mu | RecordTag::BpMu => self.cfg.dump_correct,
            })
            .map(|u| NavRecord::from_update(u, &self.stamper, &self.cfg))
            .collect()
    }

    fn handle_a(&mut self, mut packet: APacket) -> Result<Vec<NavRecord>, NavError> {
        if self.cfg.reduce_1pps_sync_error {
            packet.itow = self.pps_a.correct(packet.itow);
        }

        let mut records = Vec::new();
        if self.status >= Status::JustInitialized {
            let previous = self.recent_a.back().expect("initialized without A packets");
            let mut dt = interval(previous.itow, packet.itow);
            if dt <= -(SECONDS_PER_WEEK / 2.0) {
                dt += SECONDS_PER_WEEK;
            }
            if dt <= 0.0 || dt >= INTERVAL_THRESHOLD {
                // Discontinuity too large; skip the update.
                self.counters.time_out_of_order += 1;
            } else {
                match self
                    .sync
                    .time_update(packet.itow, &packet.accel, &packet.omega, dt)
                {
                    Ok(updates) => {
                        self.status = Status::TimeUpdated;
                        records = self.records(&updates);
                    }
                    Err(e @ NavError::FilterDiverged(_)) => {
                        self.declare_diverged(&e);
                    }
                    Err(e) => return Err(e),
                }
            }
        } else {
            self.counters.uninitialized += 1;
        }

        push_capped(&mut self.recent_a, RECENT_A_CAP, packet);
        Ok(records)
    }

    fn handle_m(&mut self, mut packet: MPacket) {
        if !self.cfg.use_magnet {
            return;
        }
        if self.cfg.reduce_1pps_sync_error {
            packet.itow = self.pps_m.correct(packet.itow);
        }
        push_capped(&mut self.recent_m, RECENT_M_CAP, packet);
    }

    fn handle_g(&mut self, packet: GPacket) -> Result<Vec<NavRecord>, NavError> {
        let week = self.stamper.week();
        if !self.cfg.time_window.is_after_start(packet.itow, week) {
            return Ok(Vec::new());
        }
        if !self.cfg.time_window.is_before_end(packet.itow, week) {
            self.ended = true;
            return Ok(Vec::new());
        }

        // When the estimated accuracy is too big, skip.
        if packet.solution.sigma_2d >= self.cfg.gps_threshold.cont_acc_2d {
            return Ok(Vec::new());
        }

        if self.status >= Status::JustInitialized {
            self.measurement_update(&packet)
        } else {
            self.try_initialize(&packet)
        }
    }

    fn measurement_update(&mut self, packet: &GPacket) -> Result<Vec<NavRecord>, NavError> {
        debug!("MU: {:.4}", packet.itow);

        // Fix timing relative to the newest inertial packet: slightly
        // positive in the sorted disciplines, possibly negative (delayed)
        // in realtime.
        if !matches!(self.sync, SyncFilter::RealTime(_)) {
            if let Some(last_a) = self.recent_a.back().copied() {
                let advance = interval(last_a.itow, packet.itow);
                if advance > 0.0 && advance < INTERVAL_THRESHOLD {
                    // Bridge the gap to the fix with one short time update;
                    // no record for it.
                    self.sync
                        .time_update(packet.itow, &last_a.accel, &last_a.omega, advance)?;
                }
            }
        }

        let lever = packet.lever_arm.map(|r_b| {
            (r_b, self.mean_omega_around(packet.itow))
        });

        let yaw_aux = self.yaw_auxiliary(packet);

        match self.sync.correct(packet.itow, &packet.solution, lever, yaw_aux) {
            Ok((CorrectDisposition::Applied, updates)) => {
                self.status = Status::MeasurementUpdated;
                Ok(self.records(&updates))
            }
            Ok((CorrectDisposition::GatedOut, _)) => {
                warn!("fix at {:.4} rejected by the innovation gate", packet.itow);
                Ok(Vec::new())
            }
            Ok((CorrectDisposition::Deferred, _)) => Ok(Vec::new()),
            Err(e @ NavError::FilterDiverged(_)) => {
                self.declare_diverged(&e);
                Ok(Vec::new())
            }
            // Numerical trouble in one update: keep the prior and move on.
            Err(e @ (NavError::SingularMatrix(_) | NavError::EigenNotConverged)) => {
                warn!("skipping fix at {:.4}: {e}", packet.itow);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// The scalar magnetic heading update, when the fix says the vehicle
    /// is slow enough for the magnetic heading to beat the kinematic one.
    fn yaw_auxiliary(&self, packet: &GPacket) -> Option<(f64, f64)> {
        let threshold = self.cfg.yaw_correct_with_mag_when_speed_less_than_ms;
        if self.recent_m.is_empty() || threshold <= 0.0 {
            return None;
        }
        let speed2 = packet.solution.v_north.powi(2) + packet.solution.v_east.powi(2);
        if speed2 >= threshold.powi(2) {
            return None;
        }
        let mag = self.interpolated_mag(packet.itow)?;
        let ins = self.sync.filter().ins();
        let (lat, lon, alpha) = ins.state.geodetic();
        let delta_yaw = self.mag_delta_yaw(
            &mag,
            &ins.state.q_b2n,
            alpha,
            lat,
            lon,
            ins.state.height,
        );
        let sigma = deg2rad(self.cfg.mag_heading_accuracy_deg);
        Some((delta_yaw, sigma.powi(2)))
    }

    /// Linear interpolation between the two magnetometer samples nearest
    /// `itow`. Extrapolation is reduced: past 3 sample intervals the
    /// nearer sample wins outright.
    fn interpolated_mag(&self, itow: f64) -> Option<Vector3<f64>> {
        if self.recent_m.len() < 2 {
            return None;
        }
        let itows: Vec<f64> = self.recent_m.iter().map(|m| m.itow).collect();
        let head = nearest_index(&itows, itow, 2);
        let (m_a, m_b) = (&self.recent_m[head], &self.recent_m[head + 1]);
        let mut weight_a = (m_b.itow - itow) / (m_b.itow - m_a.itow);
        let mut weight_b = 1.0 - weight_a;
        if weight_a > 3.0 {
            weight_a = 1.0;
            weight_b = 0.0;
        } else if weight_b > 3.0 {
            weight_b = 1.0;
            weight_a = 0.0;
        }
        Some(m_a.mag * weight_a + m_b.mag * weight_b)
    }

    /// Yaw correction angle from a magnetometer sample: the angle from the
    /// measured horizontal field (rotated into NED through the current
    /// attitude) to the model field.
    fn mag_delta_yaw(
        &self,
        mag: &Vector3<f64>,
        q_b2n: &UnitQuaternion<f64>,
        alpha: f64,
        latitude: f64,
        longitude: f64,
        height: f64,
    ) -> f64 {
        let to_ned = Rotation3::from_axis_angle(&Vector3::z_axis(), alpha);
        let mag_ned = to_ned * (q_b2n * mag);
        let model = self.mag_model.field_components(latitude, longitude, height);
        between_pm_pi(model[1].atan2(model[0]) - mag_ned[1].atan2(mag_ned[0]))
    }

    /// Heading estimate under a stationary assumption, for initialization.
    fn mag_yaw(
        &self,
        mag: &Vector3<f64>,
        pitch: f64,
        roll: f64,
        latitude: f64,
        longitude: f64,
        height: f64,
    ) -> f64 {
        let level = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);
        self.mag_delta_yaw(mag, &level, 0.0, latitude, longitude, height)
    }

    /// Mean angular rate over the inertial samples nearest `itow`, for the
    /// lever arm coupling.
    fn mean_omega_around(&self, itow: f64) -> Vector3<f64> {
        let itows: Vec<f64> = self.recent_a.iter().map(|a| a.itow).collect();
        let head = nearest_index(&itows, itow, LEVER_ARM_MEAN_SAMPLES);
        let mut sum = Vector3::zeros();
        let mut count = 0;
        for a in self
            .recent_a
            .iter()
            .skip(head)
            .take(LEVER_ARM_MEAN_SAMPLES)
        {
            sum += a.omega;
            count += 1;
        }
        if count == 0 {
            Vector3::zeros()
        } else {
            sum / f64::from(count)
        }
    }

    fn try_initialize(&mut self, packet: &GPacket) -> Result<Vec<NavRecord>, NavError> {
        let sol = &packet.solution;
        let sync_ok = match self.recent_a.front() {
            Some(front) => {
                interval_rollover(front.itow, packet.itow).abs()
                    < 0.1 * self.recent_a.len() as f64
            }
            None => false,
        };
        if self.recent_a.len() < self.min_a_packets_for_init
            || !sync_ok
            || sol.sigma_2d > self.cfg.gps_threshold.init_acc_2d
            || sol.sigma_height > self.cfg.gps_threshold.init_acc_v
        {
            self.counters.uninitialized += 1;
            return Ok(Vec::new());
        }

        self.initialize(packet);
        self.status = Status::JustInitialized;

        // Replay the buffered inertial packets newer than the fix.
        let mut previous_itow = packet.itow;
        let replay: Vec<APacket> = self
            .recent_a
            .iter()
            .filter(|a| interval_rollover(packet.itow, a.itow) > 0.0)
            .copied()
            .collect();
        for a in replay {
            let dt = interval_rollover(previous_itow, a.itow);
            if dt > 0.0 && dt < INTERVAL_THRESHOLD {
                self.sync.time_update(a.itow, &a.accel, &a.omega, dt)?;
            }
            previous_itow = a.itow;
        }

        if self.cfg.dump_correct {
            let update = NavUpdate {
                tag: RecordTag::Mu,
                itow: packet.itow,
                snapshot: self.sync.filter().clone(),
            };
            Ok(vec![NavRecord::from_update(
                &update,
                &self.stamper,
                &self.cfg,
            )])
        } else {
            Ok(Vec::new())
        }
    }

    fn initialize(&mut self, packet: &GPacket) {
        let sol = &packet.solution;
        let attitude = self.cfg.initial_attitude;
        let mut yaw = deg2rad(attitude.yaw_deg);
        let mut pitch = deg2rad(attitude.pitch_deg);
        let mut roll = deg2rad(attitude.roll_deg);

        if attitude.mode < conf::AttitudeMode::FullGiven {
            // Estimate the attitude from the averaged specific force under
            // a stationary assumption.
            let mut acc = Vector3::zeros();
            for a in &self.recent_a {
                acc += a.accel;
            }
            acc /= self.recent_a.len() as f64;
            let acc_reg = -acc / acc.norm();

            roll = acc_reg[1].atan2(acc_reg[2]);
            if attitude.mode < conf::AttitudeMode::YawPitch {
                pitch = -acc_reg[0].asin();
                if attitude.mode < conf::AttitudeMode::YawOnly {
                    yaw = 0.0;
                    if !self.recent_m.is_empty() {
                        if let Some(mag) = self.interpolated_mag(packet.itow) {
                            yaw = self.mag_yaw(
                                &mag,
                                pitch,
                                roll,
                                sol.latitude,
                                sol.longitude,
                                sol.height,
                            );
                        }
                    }
                }
            }
        }

        info!("Init: {:.4}", packet.itow);
        info!(
            "Initial attitude (yaw, pitch, roll) [deg]: {:.3}, {:.3}, {:.3}",
            rad2deg(yaw),
            rad2deg(pitch),
            rad2deg(roll)
        );

        let ins = self.sync.filter_mut().ins_mut();
        ins.init_position(sol.latitude, sol.longitude, sol.height);
        ins.init_velocity(sol.v_north, sol.v_east, sol.v_down);
        ins.init_attitude(yaw, pitch, roll);
    }

    fn declare_diverged(&mut self, e: &NavError) {
        error!("{e}; filter returns to the initialization gate");
        // Fresh filter, fresh covariance; the state seeds again at the
        // next accepted fix.
        if let Ok(sync) = build_sync_filter(&self.cfg) {
            self.sync = sync;
        }
        self.status = Status::Uninitialized;
        self.recent_a.clear();
        self.recent_m.clear();
    }

    /// Logs the drop counters; called at end of stream.
    pub fn log_counters(&self) {
        if self.counters.time_out_of_order > 0 || self.counters.uninitialized > 0 {
            info!(
                "dropped packets: {} out-of-order, {} before initialization",
                self.counters.time_out_of_order, self.counters.uninitialized
            );
        }
    }
}

/// Drives a packet stream through the engine and writes the records.
/// Offline and back-propagation sort through a [`SortingBuffer`];
/// realtime feeds the controller directly. Returns the drop counters.
pub fn run_stream<I, W>(
    cfg: FusionConfig,
    packets: I,
    out: W,
) -> Result<DropCounters, NavError>
where
    I: IntoIterator<Item = Packet>,
    W: Write,
{
    let realtime = cfg.sync_strategy() == SyncStrategy::RealTime;
    let mut process = FusionProcess::new(cfg.clone())?;
    let mut reporter = Reporter::new(out, &cfg);
    reporter.label().map_err(io_err)?;

    let mut emit = |process: &mut FusionProcess,
                    reporter: &mut Reporter<W>,
                    packet: Packet|
     -> Result<(), NavError> {
        for record in process.handle(packet)? {
            reporter.dump(&record).map_err(io_err)?;
        }
        Ok(())
    };

    if realtime {
        for packet in packets {
            emit(&mut process, &mut reporter, packet)?;
            if process.is_ended() {
                break;
            }
        }
    } else {
        let mut buffer = SortingBuffer::new();
        'stream: for packet in packets {
            for sorted in buffer.push(packet) {
                emit(&mut process, &mut reporter, sorted)?;
                if process.is_ended() {
                    break 'stream;
                }
            }
        }
        for sorted in buffer.flush() {
            emit(&mut process, &mut reporter, sorted)?;
            if process.is_ended() {
                break;
            }
        }
    }

    process.log_counters();
    Ok(process.counters())
}

fn io_err(e: std::io::Error) -> NavError {
    NavError::Io(e.to_string())
}
