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

//! INS/GPS post-processor over a textual packet log. The log decoder
//! proper is a separate concern; this binary reads the already-decoded
//! packet stream, one packet per line:
//!
//! ```text
//! A,itow,ax,ay,az,gx,gy,gz
//! G,itow,lat_deg,lon_deg,height,vn,ve,vd,sigma_2d,sigma_h,sigma_vel
//! M,itow,mx,my,mz
//! T,itow[,week[,leap_seconds]]
//! ```

use clap::{ArgAction, Parser};
use erebus::msr::{APacket, GPacket, GpsSolution, MPacket, Packet, TimePacket};
use erebus::process::conf::{GpsTimeSpec, InitialAttitude, TimeStampMode};
use erebus::{run_stream, FusionConfig, NavError};
use log::{error, warn};
use nalgebra::Vector3;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::exit;

#[derive(Parser, Debug)]
#[command(
    name = "erebus",
    author = "Christopher Rabotin <christopher.rabotin@gmail.com>",
    about = "Loosely-coupled INS/GPS post-processor",
    version
)]
struct Cli {
    /// Packet log file, or `-` for the standard input.
    log: String,

    /// Start of the processing window: `seconds` or `WN:seconds`.
    #[arg(long = "start_gpst", value_name = "GPST")]
    start_gpst: Option<String>,
    /// End of the processing window: `seconds` or `WN:seconds`.
    #[arg(long = "end_gpst", value_name = "GPST")]
    end_gpst: Option<String>,

    /// Output states at time updates.
    #[arg(long = "dump_update", action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    dump_update: bool,
    /// Output states at measurement updates.
    #[arg(long = "dump_correct", action = ArgAction::Set, default_value_t = false, value_name = "BOOL")]
    dump_correct: bool,
    /// Append one-sigma columns to every record.
    #[arg(long = "dump_stddev", action = ArgAction::SetTrue)]
    dump_stddev: bool,

    /// Calendar UTC time stamps instead of GPS seconds of week, with an
    /// optional hour offset.
    #[arg(long = "calendar_time", value_name = "HR", num_args = 0..=1, default_missing_value = "0")]
    calendar_time: Option<i32>,

    /// Initial attitude in degrees: `yaw[,pitch[,roll]]`.
    #[arg(long = "init_attitude_deg", value_name = "Y,P,R")]
    init_attitude_deg: Option<String>,
    /// Initial true heading in degrees.
    #[arg(long = "init_yaw_deg", value_name = "DEG")]
    init_yaw_deg: Option<f64>,

    /// Estimate sensor bias drift.
    #[arg(long = "est_bias", action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    est_bias: bool,
    /// UD-factorized Kalman filter instead of the standard form.
    #[arg(long = "use_udkf", action = ArgAction::SetTrue)]
    use_udkf: bool,
    /// Precise gravity model from an external anomaly grid.
    #[arg(long = "use_egm", action = ArgAction::SetTrue)]
    use_egm: bool,
    /// Gravity anomaly grid file for --use_egm.
    #[arg(long = "egm_grid", value_name = "FILE")]
    egm_grid: Option<PathBuf>,

    /// Kalman smoothing of previously time-updated data (exclusive with
    /// --realtime).
    #[arg(long = "back_propagate", action = ArgAction::SetTrue)]
    back_propagate: bool,
    /// Realtime synchronization: no sorting, results as soon as possible
    /// (exclusive with --back_propagate).
    #[arg(long = "realtime", action = ArgAction::SetTrue)]
    realtime: bool,
    /// Depth of the smoothing ring, in seconds.
    #[arg(long = "bp_depth", value_name = "SEC")]
    bp_depth: Option<f64>,

    /// Initial measurement update threshold for the GPS 2D error, meters.
    #[arg(long = "gps_init_acc_2d", value_name = "SIGMA")]
    gps_init_acc_2d: Option<f64>,
    /// Initial measurement update threshold for the GPS vertical error, meters.
    #[arg(long = "gps_init_acc_v", value_name = "SIGMA")]
    gps_init_acc_v: Option<f64>,
    /// Continual measurement update threshold for the GPS 2D error, meters.
    #[arg(long = "gps_cont_acc_2d", value_name = "SIGMA")]
    gps_cont_acc_2d: Option<f64>,

    /// Use the magnetic sensor stream.
    #[arg(long = "use_magnet", action = ArgAction::SetTrue)]
    use_magnet: bool,
    /// Magnetic heading accuracy, degrees.
    #[arg(long = "mag_heading_accuracy_deg", value_name = "DEG")]
    mag_heading_accuracy_deg: Option<f64>,
    /// Magnetic yaw correction below this speed, m/s (non-positive
    /// disables it).
    #[arg(long = "yaw_correct_with_mag_when_speed_less_than_ms", value_name = "MS")]
    yaw_correct_with_mag_when_speed_less_than_ms: Option<f64>,

    /// IMU to GPS antenna offset in the body frame, meters: `x,y,z`.
    #[arg(long = "lever_arm", value_name = "X,Y,Z")]
    lever_arm: Option<String>,
}

fn parse_lever_arm(spec: &str) -> Result<Vector3<f64>, NavError> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != 3 {
        return Err(NavError::ConfigConflict(
            "lever_arm requires 3 comma-separated values".to_string(),
        ));
    }
    let mut out = Vector3::zeros();
    for (i, p) in parts.iter().enumerate() {
        out[i] = p.trim().parse().map_err(|_| {
            NavError::ConfigConflict(format!("invalid lever_arm component `{p}`"))
        })?;
    }
    Ok(out)
}

fn config_from(cli: &Cli) -> Result<FusionConfig, NavError> {
    let mut cfg = FusionConfig {
        dump_update: cli.dump_update,
        dump_correct: cli.dump_correct,
        dump_stddev: cli.dump_stddev,
        est_bias: cli.est_bias,
        use_udkf: cli.use_udkf,
        use_egm: cli.use_egm,
        egm_grid_path: cli.egm_grid.clone(),
        back_propagate: cli.back_propagate,
        realtime: cli.realtime,
        use_magnet: cli.use_magnet,
        ..Default::default()
    };
    if let Some(hr) = cli.calendar_time {
        cfg.time_stamp = TimeStampMode::Calendar { correction_hr: hr };
    }
    if let Some(spec) = &cli.start_gpst {
        cfg.time_window.start = Some(GpsTimeSpec::parse(spec)?);
    }
    if let Some(spec) = &cli.end_gpst {
        cfg.time_window.end = Some(GpsTimeSpec::parse(spec)?);
    }
    if let Some(spec) = &cli.init_attitude_deg {
        cfg.initial_attitude = InitialAttitude::parse(spec)?;
    }
    if let Some(yaw) = cli.init_yaw_deg {
        cfg.initial_attitude = InitialAttitude::parse(&yaw.to_string())?;
    }
    if let Some(v) = cli.bp_depth {
        cfg.bp_depth = v;
    }
    if let Some(v) = cli.gps_init_acc_2d {
        cfg.gps_threshold.init_acc_2d = v;
    }
    if let Some(v) = cli.gps_init_acc_v {
        cfg.gps_threshold.init_acc_v = v;
    }
    if let Some(v) = cli.gps_cont_acc_2d {
        cfg.gps_threshold.cont_acc_2d = v;
    }
    if let Some(v) = cli.mag_heading_accuracy_deg {
        cfg.mag_heading_accuracy_deg = v;
    }
    if let Some(v) = cli.yaw_correct_with_mag_when_speed_less_than_ms {
        cfg.yaw_correct_with_mag_when_speed_less_than_ms = v;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Parses one packet line; `None` for blank, comment, or malformed lines
/// (malformed lines are logged).
fn parse_packet(line: &str, lever_arm: Option<Vector3<f64>>) -> Option<Packet> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let num = |idx: usize| -> Option<f64> { fields.get(idx)?.parse().ok() };

    let packet = (|| match fields[0] {
        "A" if fields.len() == 8 => Some(Packet::A(APacket {
            itow: num(1)?,
            accel: Vector3::new(num(2)?, num(3)?, num(4)?),
            omega: Vector3::new(num(5)?, num(6)?, num(7)?),
        })),
        "G" if fields.len() == 11 => Some(Packet::G(GPacket {
            itow: num(1)?,
            solution: GpsSolution {
                latitude: num(2)?.to_radians(),
                longitude: num(3)?.to_radians(),
                height: num(4)?,
                v_north: num(5)?,
                v_east: num(6)?,
                v_down: num(7)?,
                sigma_2d: num(8)?,
                sigma_height: num(9)?,
                sigma_vel: num(10)?,
            },
            lever_arm,
        })),
        "M" if fields.len() == 5 => Some(Packet::M(MPacket {
            itow: num(1)?,
            mag: Vector3::new(num(2)?, num(3)?, num(4)?),
        })),
        "T" if (2..=4).contains(&fields.len()) => Some(Packet::T(TimePacket {
            itow_s: fields.get(1)?.parse().ok()?,
            week_number: fields.get(2).and_then(|s| s.parse().ok()),
            leap_seconds: fields.get(3).and_then(|s| s.parse().ok()),
        })),
        _ => None,
    })();
    if packet.is_none() {
        warn!("skipping malformed packet line: {line}");
    }
    packet
}

fn main() {
    if pretty_env_logger::try_init().is_err() {
        eprintln!("could not init env_logger");
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            exit(-1);
        }
    };

    let lever_arm = match cli.lever_arm.as_deref().map(parse_lever_arm) {
        Some(Ok(v)) => Some(v),
        Some(Err(e)) => {
            eprintln!("{e}");
            exit(-1);
        }
        None => None,
    };

    let cfg = match config_from(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            exit(-1);
        }
    };

    let reader: Box<dyn BufRead> = if cli.log == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        match std::fs::File::open(&cli.log) {
            Ok(f) => Box::new(BufReader::new(f)),
            Err(e) => {
                eprintln!("could not open {}: {e}", cli.log);
                exit(-1);
            }
        }
    };

    let packets = reader
        .lines()
        .map_while(Result::ok)
        .filter_map(move |line| parse_packet(&line, lever_arm));

    let stdout = std::io::stdout();
    match run_stream(cfg, packets, stdout.lock()) {
        Ok(_) => {}
        Err(e) => {
            error!("{e}");
            exit(-1);
        }
    }
}
