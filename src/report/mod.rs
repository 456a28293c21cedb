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

/*! # Post-fit reporting

Turns tagged filter states into labelled, comma-separated output records:
mode, time stamp (GPS seconds of week or calendar UTC), geodetic position,
NED velocity, attitude, then the optional bias and one-sigma columns.
*/

use crate::fusion::FusionFilter;
use crate::msr::{TimePacket, SECONDS_PER_WEEK};
use crate::process::conf::{FusionConfig, TimeStampMode};
use crate::sync::{NavUpdate, RecordTag};
use crate::utils::rad2deg;
use hifitime::{Epoch, Unit};
use std::io::Write;

/// Calendar UTC date and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: f64,
}

/// A record time stamp: always the GPS seconds of week, plus the calendar
/// rendition when requested and resolvable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStamp {
    pub itow: f64,
    pub calendar: Option<CalendarTime>,
}

/// Converts itow into output time stamps. Until a time-reference packet
/// provides the week number, calendar fields stay zero with the seconds
/// column carrying the raw itow, exactly like the historical output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeStamper {
    mode: TimeStampMode,
    week: Option<u16>,
    leap_seconds: Option<i8>,
}

impl TimeStamper {
    pub fn new(mode: TimeStampMode) -> Self {
        Self {
            mode,
            week: None,
            leap_seconds: None,
        }
    }

    pub fn update(&mut self, packet: &TimePacket) {
        if let Some(week) = packet.week_number {
            self.week = Some(week);
        }
        if let Some(leap) = packet.leap_seconds {
            // Stored for inspection; the UTC conversion relies on
            // hifitime's own leap second table.
            self.leap_seconds = Some(leap);
        }
    }

    pub fn week(&self) -> Option<u16> {
        self.week
    }

    pub fn stamp(&self, itow: f64) -> TimeStamp {
        let calendar = match self.mode {
            TimeStampMode::Itow => None,
            TimeStampMode::Calendar { correction_hr } => Some(match self.week {
                Some(week) => {
                    let epoch = Epoch::from_gpst_seconds(
                        f64::from(week) * SECONDS_PER_WEEK + itow,
                    ) + Unit::Hour * f64::from(correction_hr);
                    let (year, month, day, hour, minute, second, nanos) =
                        epoch.to_gregorian_utc();
                    CalendarTime {
                        year,
                        month,
                        day,
                        hour,
                        minute,
                        second: f64::from(second) + f64::from(nanos) * 1e-9,
                    }
                }
                None => CalendarTime {
                    year: 0,
                    month: 0,
                    day: 0,
                    hour: 0,
                    minute: 0,
                    second: itow,
                },
            }),
        };
        TimeStamp { itow, calendar }
    }
}

/// One output record, ready to be written.
#[derive(Debug, Clone)]
pub struct NavRecord {
    pub tag: RecordTag,
    pub stamp: TimeStamp,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_m: f64,
    pub v_north: f64,
    pub v_east: f64,
    pub v_down: f64,
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    /// Accelerometer then gyro bias estimates, when bias-augmented.
    pub biases: Option<[f64; 6]>,
    /// One-sigma columns: latitude, longitude, height, vN, vE, vD, yaw,
    /// pitch, roll (angles in degrees).
    pub sigmas: Option<[f64; 9]>,
    pub bias_sigmas: Option<[f64; 6]>,
}

impl NavRecord {
    /// Builds a record from a tagged filter snapshot.
    pub fn from_update(update: &NavUpdate, stamper: &TimeStamper, cfg: &FusionConfig) -> Self {
        Self::from_filter(update.tag, update.itow, &update.snapshot, stamper, cfg)
    }

    pub fn from_filter(
        tag: RecordTag,
        itow: f64,
        filter: &FusionFilter,
        stamper: &TimeStamper,
        cfg: &FusionConfig,
    ) -> Self {
        let state = &filter.ins().state;
        let biases = filter.ins().bias.as_ref().map(|b| {
            [
                b.accel[0], b.accel[1], b.accel[2], b.gyro[0], b.gyro[1], b.gyro[2],
            ]
        });
        let (sigmas, bias_sigmas) = if cfg.dump_stddev {
            let sd = filter.sigmas();
            (
                Some([
                    rad2deg(sd.latitude_rad),
                    rad2deg(sd.longitude_rad),
                    sd.height_m,
                    sd.v_north_ms,
                    sd.v_east_ms,
                    sd.v_down_ms,
                    rad2deg(sd.heading_rad),
                    rad2deg(sd.pitch_rad),
                    rad2deg(sd.roll_rad),
                ]),
                sd.bias_accel.zip(sd.bias_gyro).map(|(a, g)| {
                    [a[0], a[1], a[2], g[0], g[1], g[2]]
                }),
            )
        } else {
            (None, None)
        };
        Self {
            tag,
            stamp: stamper.stamp(itow),
            latitude_deg: rad2deg(state.latitude()),
            longitude_deg: rad2deg(state.longitude()),
            height_m: state.height,
            v_north: state.v_north(),
            v_east: state.v_east(),
            v_down: state.v_down(),
            yaw_deg: rad2deg(state.heading()),
            pitch_deg: rad2deg(state.pitch()),
            roll_deg: rad2deg(state.roll()),
            biases,
            sigmas,
            bias_sigmas,
        }
    }
}

/// Writes the label line and the records, comma separated.
#[derive(Debug)]
pub struct Reporter<W: Write> {
    out: W,
    calendar: bool,
    with_bias: bool,
    with_stddev: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, cfg: &FusionConfig) -> Self {
        Self {
            out,
            calendar: !matches!(cfg.time_stamp, TimeStampMode::Itow),
            with_bias: cfg.est_bias,
            with_stddev: cfg.dump_stddev,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn label(&mut self) -> std::io::Result<()> {
        write!(self.out, "mode,")?;
        if self.calendar {
            write!(self.out, "year,month,day,hour,min,sec")?;
        } else {
            write!(self.out, "itow")?;
        }
        write!(
            self.out,
            ",latitude,longitude,height,v_north,v_east,v_down,heading,pitch,roll"
        )?;
        if self.with_bias {
            write!(
                self.out,
                ",bias_accel(X),bias_accel(Y),bias_accel(Z),bias_gyro(X),bias_gyro(Y),bias_gyro(Z)"
            )?;
        }
        if self.with_stddev {
            write!(
                self.out,
                ",s1(latitude),s1(longitude),s1(height),s1(v_north),s1(v_east),s1(v_down),s1(psi),s1(theta),s1(phi)"
            )?;
            if self.with_bias {
                write!(
                    self.out,
                    ",s1(bias_accel(X)),s1(bias_accel(Y)),s1(bias_accel(Z)),s1(bias_gyro(X)),s1(bias_gyro(Y)),s1(bias_gyro(Z))"
                )?;
            }
        }
        writeln!(self.out)
    }

    pub fn dump(&mut self, record: &NavRecord) -> std::io::Result<()> {
        write!(self.out, "{},", record.tag.label())?;
        match (&record.stamp.calendar, self.calendar) {
            (Some(cal), true) => write!(
                self.out,
                "{},{},{},{},{},{:.3}",
                cal.year, cal.month, cal.day, cal.hour, cal.minute, cal.second
            )?,
            _ => write!(self.out, "{:.4}", record.stamp.itow)?,
        }
        write!(
            self.out,
            ",{:.9},{:.9},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4}",
            record.latitude_deg,
            record.longitude_deg,
            record.height_m,
            record.v_north,
            record.v_east,
            record.v_down,
            record.yaw_deg,
            record.pitch_deg,
            record.roll_deg
        )?;
        if let Some(biases) = &record.biases {
            for b in biases {
                write!(self.out, ",{b:.6e}")?;
            }
        }
        if let Some(sigmas) = &record.sigmas {
            for s in sigmas {
                write!(self.out, ",{s:.6}")?;
            }
            if let Some(bias_sigmas) = &record.bias_sigmas {
                for s in bias_sigmas {
                    write!(self.out, ",{s:.6e}")?;
                }
            }
        }
        writeln!(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_epoch_is_calendar_origin() {
        let mut stamper = TimeStamper::new(TimeStampMode::Calendar { correction_hr: 0 });
        stamper.update(&TimePacket {
            itow_s: 0,
            week_number: Some(0),
            leap_seconds: None,
        });
        let cal = stamper.stamp(0.0).calendar.unwrap();
        // GPS epoch: Sunday 1980-01-06 00:00:00 UTC.
        assert_eq!(cal.year, 1980);
        assert_eq!(cal.month, 1);
        assert_eq!(cal.day, 6);
        assert_eq!(cal.hour, 0);
    }

    #[test]
    fn calendar_without_week_keeps_raw_seconds() {
        let stamper = TimeStamper::new(TimeStampMode::Calendar { correction_hr: 9 });
        let cal = stamper.stamp(1234.5).calendar.unwrap();
        assert_eq!(cal.year, 0);
        assert!((cal.second - 1234.5).abs() < 1e-9);
    }

    #[test]
    fn hour_offset_shifts_the_day() {
        let mut stamper = TimeStamper::new(TimeStampMode::Calendar { correction_hr: -1 });
        stamper.update(&TimePacket {
            itow_s: 0,
            week_number: Some(0),
            leap_seconds: None,
        });
        let cal = stamper.stamp(0.0).calendar.unwrap();
        assert_eq!(cal.day, 5);
        assert_eq!(cal.hour, 23);
    }
}
