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

/*! # Synchronization policies

Reconciles delayed GPS fixes with the inertial stream. Three mutually
exclusive disciplines:

- **Offline**: a [`SortingBuffer`] orders every packet by itow (one-week
  rollover aware) before the controller sees it, so each fix applies at
  its own time stamp exactly.
- **Back-propagation**: offline ordering plus a ring of recent filter
  snapshots; a fix corrects the nearest snapshot and the corrected past is
  re-emitted with `BP_MU`/`BP_TU` tags.
- **Realtime**: no sorting; a lagging fix rewinds the filter by one
  buffered step (capped), an early fix is deferred until the inertial
  stream catches up.
*/

use crate::errors::NavError;
use crate::fusion::{CorrectOutcome, FusionFilter};
use crate::msr::{compare_itow, GpsSolution, Packet};
use nalgebra::Vector3;

mod backprop;
mod realtime;

pub use backprop::BackPropagateFilter;
pub use realtime::RealTimeFilter;

/// Pool size which triggers a partial drain of the sorting buffer.
const SORT_POOL_TRIGGER: usize = 0x200;
/// How many packets a partial drain delivers.
const SORT_POOL_DRAIN: usize = 0x100;

/// Header tag of an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    /// Time update.
    Tu,
    /// Measurement update.
    Mu,
    /// Re-emitted time update after a back-propagated correction.
    BpTu,
    /// Back-propagated measurement update.
    BpMu,
}

impl RecordTag {
    pub fn label(&self) -> &'static str {
        match self {
            RecordTag::Tu => "TU",
            RecordTag::Mu => "MU",
            RecordTag::BpTu => "BP_TU",
            RecordTag::BpMu => "BP_MU",
        }
    }
}

/// One update the reporter may turn into a record: the tag, the time it
/// applies at, and the filter state at that time.
#[derive(Debug, Clone)]
pub struct NavUpdate {
    pub tag: RecordTag,
    pub itow: f64,
    pub snapshot: FusionFilter,
}

/// What happened to a measurement update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectDisposition {
    Applied,
    /// Rejected by the innovation gate; prior kept.
    GatedOut,
    /// Realtime only: the fix is ahead of the filter clock and parked
    /// until the inertial stream reaches it.
    Deferred,
}

/// Control input of one time update, kept so a past state can be
/// re-advanced after a retroactive correction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlInput {
    pub accel: Vector3<f64>,
    pub omega: Vector3<f64>,
    pub dt: f64,
}

/// The filter behind the active synchronization policy.
#[derive(Debug, Clone)]
pub enum SyncFilter {
    Plain(FusionFilter),
    BackProp(BackPropagateFilter),
    RealTime(RealTimeFilter),
}

impl SyncFilter {
    /// Borrow of the current (head) filter.
    pub fn filter(&self) -> &FusionFilter {
        match self {
            SyncFilter::Plain(f) => f,
            SyncFilter::BackProp(b) => b.filter(),
            SyncFilter::RealTime(r) => r.filter(),
        }
    }

    pub fn filter_mut(&mut self) -> &mut FusionFilter {
        match self {
            SyncFilter::Plain(f) => f,
            SyncFilter::BackProp(b) => b.filter_mut(),
            SyncFilter::RealTime(r) => r.filter_mut(),
        }
    }

    /// Advances the filter by one inertial sample ending at `itow`.
    pub fn time_update(
        &mut self,
        itow: f64,
        accel: &Vector3<f64>,
        omega: &Vector3<f64>,
        dt: f64,
    ) -> Result<Vec<NavUpdate>, NavError> {
        let control = ControlInput {
            accel: *accel,
            omega: *omega,
            dt,
        };
        match self {
            SyncFilter::Plain(f) => {
                f.time_update(accel, omega, dt)?;
                Ok(vec![NavUpdate {
                    tag: RecordTag::Tu,
                    itow,
                    snapshot: f.clone(),
                }])
            }
            SyncFilter::BackProp(b) => b.time_update(itow, control),
            SyncFilter::RealTime(r) => r.time_update(itow, control),
        }
    }

    /// Applies a GPS fix at `itow`, with the optional lever arm
    /// `(r_b, mean ω_b)` and the optional scalar yaw auxiliary
    /// `(Δψ, variance)` performed right after an accepted fix at the same
    /// epoch.
    pub fn correct(
        &mut self,
        itow: f64,
        solution: &GpsSolution,
        lever: Option<(Vector3<f64>, Vector3<f64>)>,
        yaw_aux: Option<(f64, f64)>,
    ) -> Result<(CorrectDisposition, Vec<NavUpdate>), NavError> {
        match self {
            SyncFilter::Plain(f) => {
                match f.correct(solution, lever)? {
                    CorrectOutcome::GatedOut => Ok((CorrectDisposition::GatedOut, vec![])),
                    CorrectOutcome::Applied => {
                        if let Some((dyaw, var)) = yaw_aux {
                            f.correct_yaw(dyaw, var)?;
                        }
                        Ok((
                            CorrectDisposition::Applied,
                            vec![NavUpdate {
                                tag: RecordTag::Mu,
                                itow,
                                snapshot: f.clone(),
                            }],
                        ))
                    }
                }
            }
            SyncFilter::BackProp(b) => b.correct(itow, solution, lever, yaw_aux),
            SyncFilter::RealTime(r) => r.correct(itow, solution, lever, yaw_aux),
        }
    }
}

/// Bounded pool which delivers packets in itow order: the external sorter
/// of the offline and back-propagation disciplines. Packets accumulate
/// until the pool is deep enough that a prefix is safely ordered, then the
/// oldest packets drain.
#[derive(Debug, Default)]
pub struct SortingBuffer {
    pool: Vec<Packet>,
}

impl SortingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Queues one packet; returns the drained prefix when the pool is full
    /// enough.
    pub fn push(&mut self, packet: Packet) -> Vec<Packet> {
        self.pool.push(packet);
        if self.pool.len() < SORT_POOL_TRIGGER {
            return Vec::new();
        }
        self.drain(SORT_POOL_DRAIN)
    }

    /// Sorts and hands out every queued packet; called at end of stream.
    pub fn flush(&mut self) -> Vec<Packet> {
        let n = self.pool.len();
        self.drain(n)
    }

    fn drain(&mut self, count: usize) -> Vec<Packet> {
        self.pool
            .sort_by(|a, b| compare_itow(a.itow(), b.itow()));
        let count = count.min(self.pool.len());
        self.pool.drain(..count).collect()
    }
}
