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

use super::{ControlInput, CorrectDisposition, NavUpdate, RecordTag};
use crate::errors::NavError;
use crate::fusion::{CorrectOutcome, FusionFilter};
use crate::msr::{interval_rollover, GpsSolution};
use log::debug;
use nalgebra::Vector3;
use std::collections::VecDeque;

/// One remembered filter state: the posterior at `itow` together with the
/// control input that produced it, so it can be re-advanced after a
/// retroactive correction.
#[derive(Debug, Clone)]
struct Snapshot {
    filter: FusionFilter,
    itow: f64,
    control: ControlInput,
}

/// Fixed-lag smoother: keeps a ring of recent snapshots; a GPS fix
/// corrects the snapshot nearest its time stamp and the newer snapshots
/// are re-advanced through their stored controls. The corrected past is
/// re-emitted oldest first, the correction itself tagged `BP_MU` and the
/// re-advanced states `BP_TU`.
///
/// Plain time updates emit nothing here: every record this policy
/// produces has been through at least one retroactive correction.
#[derive(Debug, Clone)]
pub struct BackPropagateFilter {
    inner: FusionFilter,
    /// Newest snapshot at the front.
    snapshots: VecDeque<Snapshot>,
    /// Ring depth, in seconds.
    depth: f64,
}

impl BackPropagateFilter {
    pub fn new(filter: FusionFilter, depth: f64) -> Self {
        Self {
            inner: filter,
            snapshots: VecDeque::new(),
            depth,
        }
    }

    pub fn filter(&self) -> &FusionFilter {
        &self.inner
    }

    pub fn filter_mut(&mut self) -> &mut FusionFilter {
        &mut self.inner
    }

    /// Number of snapshots currently retained.
    pub fn ring_len(&self) -> usize {
        self.snapshots.len()
    }

    pub(crate) fn time_update(
        &mut self,
        itow: f64,
        control: ControlInput,
    ) -> Result<Vec<NavUpdate>, NavError> {
        self.inner
            .time_update(&control.accel, &control.omega, control.dt)?;
        self.snapshots.push_front(Snapshot {
            filter: self.inner.clone(),
            itow,
            control,
        });
        while let Some(oldest) = self.snapshots.back() {
            if interval_rollover(oldest.itow, itow) > self.depth {
                self.snapshots.pop_back();
            } else {
                break;
            }
        }
        // Records are deferred until the next correction re-emits them.
        Ok(Vec::new())
    }

    pub(crate) fn correct(
        &mut self,
        itow: f64,
        solution: &GpsSolution,
        lever: Option<(Vector3<f64>, Vector3<f64>)>,
        yaw_aux: Option<(f64, f64)>,
    ) -> Result<(CorrectDisposition, Vec<NavUpdate>), NavError> {
        if self.snapshots.is_empty() {
            // Nothing buffered yet: correct the head state directly.
            return match self.inner.correct(solution, lever)? {
                CorrectOutcome::GatedOut => Ok((CorrectDisposition::GatedOut, vec![])),
                CorrectOutcome::Applied => Ok((
                    CorrectDisposition::Applied,
                    vec![NavUpdate {
                        tag: RecordTag::BpMu,
                        itow,
                        snapshot: self.inner.clone(),
                    }],
                )),
            };
        }

        // Nearest snapshot by time stamp.
        let mut best = 0;
        let mut best_gap = f64::INFINITY;
        for (idx, snap) in self.snapshots.iter().enumerate() {
            let gap = interval_rollover(snap.itow, itow).abs();
            if gap < best_gap {
                best_gap = gap;
                best = idx;
            }
        }
        debug!(
            "back-propagating to snapshot {best} of {} ({best_gap:.3} s from the fix)",
            self.snapshots.len()
        );

        let mut work = self.snapshots[best].filter.clone();
        match work.correct(solution, lever)? {
            CorrectOutcome::GatedOut => return Ok((CorrectDisposition::GatedOut, vec![])),
            CorrectOutcome::Applied => {}
        }
        if let Some((dyaw, var)) = yaw_aux {
            work.correct_yaw(dyaw, var)?;
        }

        let mut updates = vec![NavUpdate {
            tag: RecordTag::BpMu,
            itow: self.snapshots[best].itow,
            snapshot: work.clone(),
        }];
        self.snapshots[best].filter = work.clone();

        // Re-advance the newer snapshots, oldest first.
        for idx in (0..best).rev() {
            let control = self.snapshots[idx].control;
            work.time_update(&control.accel, &control.omega, control.dt)?;
            self.snapshots[idx].filter = work.clone();
            updates.push(NavUpdate {
                tag: RecordTag::BpTu,
                itow: self.snapshots[idx].itow,
                snapshot: work.clone(),
            });
        }

        self.inner = work;
        Ok((CorrectDisposition::Applied, updates))
    }
}
