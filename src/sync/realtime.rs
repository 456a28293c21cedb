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
use log::{debug, warn};
use nalgebra::Vector3;

/// A parked fix waiting for the inertial stream to reach its time stamp.
#[derive(Debug, Clone)]
struct PendingFix {
    itow: f64,
    solution: GpsSolution,
    lever: Option<(Vector3<f64>, Vector3<f64>)>,
    yaw_aux: Option<(f64, f64)>,
}

/// Online synchronization: packets apply as they arrive. A fix lagging the
/// filter clock rewinds through the single buffered step (the lag is
/// capped); a fix ahead of the clock is deferred until a time update
/// passes it. The emitted measurement record always carries the fix's own
/// time stamp, not the filter clock.
#[derive(Debug, Clone)]
pub struct RealTimeFilter {
    inner: FusionFilter,
    /// State at the previous inertial epoch, plus the control that moved
    /// the filter past it.
    prev: Option<(FusionFilter, f64, ControlInput)>,
    current_itow: Option<f64>,
    pending: Option<PendingFix>,
    max_lag: f64,
}

impl RealTimeFilter {
    pub fn new(filter: FusionFilter, max_lag: f64) -> Self {
        Self {
            inner: filter,
            prev: None,
            current_itow: None,
            pending: None,
            max_lag,
        }
    }

    pub fn filter(&self) -> &FusionFilter {
        &self.inner
    }

    pub fn filter_mut(&mut self) -> &mut FusionFilter {
        &mut self.inner
    }

    pub(crate) fn time_update(
        &mut self,
        itow: f64,
        control: ControlInput,
    ) -> Result<Vec<NavUpdate>, NavError> {
        let pre = self.inner.clone();
        self.inner
            .time_update(&control.accel, &control.omega, control.dt)?;
        self.prev = Some((pre, itow - control.dt, control));
        self.current_itow = Some(itow);

        let mut updates = vec![NavUpdate {
            tag: RecordTag::Tu,
            itow,
            snapshot: self.inner.clone(),
        }];

        // A deferred fix applies as soon as the clock passes it.
        if let Some(pending) = self.pending.take() {
            if interval_rollover(pending.itow, itow) >= 0.0 {
                let (_, mut more) = self.correct(
                    pending.itow,
                    &pending.solution,
                    pending.lever,
                    pending.yaw_aux,
                )?;
                updates.append(&mut more);
            } else {
                self.pending = Some(pending);
            }
        }

        Ok(updates)
    }

    pub(crate) fn correct(
        &mut self,
        itow: f64,
        solution: &GpsSolution,
        lever: Option<(Vector3<f64>, Vector3<f64>)>,
        yaw_aux: Option<(f64, f64)>,
    ) -> Result<(CorrectDisposition, Vec<NavUpdate>), NavError> {
        let current = match self.current_itow {
            Some(t) => t,
            // No time update yet: apply in place (initialization path).
            None => itow,
        };

        let lag = interval_rollover(itow, current);
        if lag < 0.0 {
            debug!("fix at {itow:.3} is {:.3} s ahead; deferring", -lag);
            self.pending = Some(PendingFix {
                itow,
                solution: *solution,
                lever,
                yaw_aux,
            });
            return Ok((CorrectDisposition::Deferred, vec![]));
        }

        // Rewind to the buffered step when the fix falls inside it.
        let rewind = match &self.prev {
            Some((_, prev_itow, _)) if lag > 0.0 && lag <= self.max_lag => {
                interval_rollover(*prev_itow, itow) >= 0.0
            }
            _ => false,
        };

        if !rewind {
            if lag > self.max_lag {
                warn!("fix lags by {lag:.3} s (cap {:.3}); correcting in place", self.max_lag);
            }
            return match self.inner.correct(solution, lever)? {
                CorrectOutcome::GatedOut => Ok((CorrectDisposition::GatedOut, vec![])),
                CorrectOutcome::Applied => {
                    if let Some((dyaw, var)) = yaw_aux {
                        self.inner.correct_yaw(dyaw, var)?;
                    }
                    // The buffered step no longer reflects the corrected
                    // head; it must not serve a later rewind.
                    self.prev = None;
                    Ok((
                        CorrectDisposition::Applied,
                        vec![NavUpdate {
                            tag: RecordTag::Mu,
                            itow,
                            snapshot: self.inner.clone(),
                        }],
                    ))
                }
            };
        }

        let (pre, prev_itow, control) = self.prev.clone().expect("rewind requires a buffered step");
        let mut work = pre;
        let dt_to_fix = interval_rollover(prev_itow, itow);
        if dt_to_fix > 0.0 {
            work.time_update(&control.accel, &control.omega, dt_to_fix)?;
        }
        match work.correct(solution, lever)? {
            CorrectOutcome::GatedOut => return Ok((CorrectDisposition::GatedOut, vec![])),
            CorrectOutcome::Applied => {}
        }
        if let Some((dyaw, var)) = yaw_aux {
            work.correct_yaw(dyaw, var)?;
        }

        let update = NavUpdate {
            tag: RecordTag::Mu,
            itow,
            snapshot: work.clone(),
        };

        // The corrected state at the fix epoch becomes the buffered step,
        // so another fix inside the same inertial interval rewinds onto
        // this correction instead of the stale pre-correction state.
        self.prev = Some((
            work.clone(),
            itow,
            ControlInput {
                accel: control.accel,
                omega: control.omega,
                dt: lag,
            },
        ));

        // Resume forward integration up to the filter clock.
        if lag > 0.0 {
            work.time_update(&control.accel, &control.omega, lag)?;
        }
        self.inner = work;

        Ok((CorrectDisposition::Applied, vec![update]))
    }
}
