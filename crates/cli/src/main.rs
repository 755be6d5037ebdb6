mod provenance;

use anyhow::{Context, Result};
use bender::api::*;
use bender::Vec3;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::Level as LogLevel;
use tracing_subscriber::fmt::SubscriberBuilder;

#[derive(Parser)]
#[command(name = "bender")]
#[command(about = "Two-point seismic ray bending through layered reference models")]
struct Cmd {
    /// JSON file with solver settings; missing fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Trace one ray and print its summary as JSON
    Trace {
        #[command(flatten)]
        ray: RayArgs,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        rcv_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        rcv_lon: f64,
        #[arg(long, default_value_t = 0.0)]
        rcv_depth: f64,
        /// Also write the JSON (and a provenance sidecar) to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Trace rays to receivers east of the source, one JSON line per distance
    Profile {
        #[command(flatten)]
        ray: RayArgs,
        #[arg(long, default_value_t = 1.0)]
        from_deg: f64,
        #[arg(long, default_value_t = 10.0)]
        to_deg: f64,
        #[arg(long, default_value_t = 1.0)]
        step_deg: f64,
        #[arg(long, default_value_t = 0.0)]
        rcv_depth: f64,
    },
    /// Print the default solver settings as JSON
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ModelArg {
    /// 20 km of 5 km/s over an 8 km/s half-space
    TwoLayer,
    /// Core, mantle and crust with linear gradients
    SimpleEarth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
enum PhaseArg {
    #[value(name = "direct")]
    Direct,
    #[value(name = "refracted")]
    Refracted,
    /// Up to the surface, then refracted to the receiver
    #[value(name = "pP")]
    DepthPhase,
    /// Off the top of `--layer`
    #[value(name = "reflected")]
    Reflected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
enum WaveArg {
    P,
    S,
}

#[derive(Args, Clone, Debug, Serialize)]
struct RayArgs {
    #[arg(long, value_enum, default_value_t = ModelArg::TwoLayer)]
    model: ModelArg,
    #[arg(long, value_enum, default_value_t = PhaseArg::Direct)]
    phase: PhaseArg,
    #[arg(long, value_enum, default_value_t = WaveArg::P)]
    wave: WaveArg,
    /// Reflecting layer for `reflected` (default 0)
    #[arg(long)]
    layer: Option<usize>,
    /// Synthetic turning radii per layer for refracted legs
    #[arg(long, default_value_t = 2)]
    levels_per_layer: usize,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    src_lat: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    src_lon: f64,
    #[arg(long, default_value_t = 0.0)]
    src_depth: f64,
}

fn main() -> Result<()> {
    let cmd = Cmd::parse();
    let cfg = load_cfg(cmd.config.as_deref())?;
    SubscriberBuilder::default()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_max_level(log_level(cmd.verbose.max(cfg.verbosity)))
        .init();

    match cmd.action {
        Action::Trace {
            ray,
            rcv_lat,
            rcv_lon,
            rcv_depth,
            out,
        } => {
            let info = trace(&cfg, &ray, (rcv_lat, rcv_lon, rcv_depth), out.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Action::Profile {
            ray,
            from_deg,
            to_deg,
            step_deg,
            rcv_depth,
        } => {
            for line in profile(&cfg, &ray, (from_deg, to_deg, step_deg), rcv_depth)? {
                println!("{line}");
            }
            Ok(())
        }
        Action::Config => {
            println!("{}", serde_json::to_string_pretty(&BenderCfg::default())?);
            Ok(())
        }
    }
}

fn log_level(verbosity: u8) -> LogLevel {
    match verbosity {
        0 => LogLevel::WARN,
        1 => LogLevel::INFO,
        2 => LogLevel::DEBUG,
        _ => LogLevel::TRACE,
    }
}

fn load_cfg(path: Option<&Path>) -> Result<BenderCfg> {
    let Some(path) = path else {
        return Ok(BenderCfg::default());
    };
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn build_model(arg: ModelArg) -> Result<LayeredModel> {
    Ok(match arg {
        ModelArg::TwoLayer => LayeredModel::two_layer(6371.0, 20.0, 5.0, 8.0)?,
        ModelArg::SimpleEarth => LayeredModel::simple_earth(),
    })
}

/// Turning levels for a refracted leg: every layer up to the shallower end
/// point's layer.
fn turning_levels(
    model: &dyn VelocityModel,
    src: &Vec3,
    rcv: &Vec3,
    per_layer: usize,
) -> LevelSet {
    let top = model.n_layers().saturating_sub(1);
    let shallow = model
        .interface_index(src)
        .min(model.interface_index(rcv))
        .min(top);
    let dir = src.try_normalize(1e-12).unwrap_or_else(Vec3::z);
    LevelSet::through_layers(model, &dir, 0, shallow, per_layer)
}

fn build_phase(
    model: &dyn VelocityModel,
    args: &RayArgs,
    src: &Vec3,
    rcv: &Vec3,
) -> PhaseTopology {
    let wave = match args.wave {
        WaveArg::P => WaveType::P,
        WaveArg::S => WaveType::S,
    };
    let surface = model.n_layers().saturating_sub(1);
    match args.phase {
        PhaseArg::Direct => PhaseTopology::direct(wave),
        PhaseArg::Refracted => {
            PhaseTopology::refracted(turning_levels(model, src, rcv, args.levels_per_layer), wave)
        }
        PhaseArg::DepthPhase => PhaseTopology::depth_phase(
            surface,
            turning_levels(model, src, rcv, args.levels_per_layer),
            wave,
        ),
        PhaseArg::Reflected => PhaseTopology::reflected(args.layer.unwrap_or(0), wave),
    }
}

fn trace(
    cfg: &BenderCfg,
    args: &RayArgs,
    (rcv_lat, rcv_lon, rcv_depth): (f64, f64, f64),
    out: Option<&Path>,
) -> Result<RayInfo> {
    let model = build_model(args.model)?;
    let src = position(&model, args.src_lat, args.src_lon, args.src_depth);
    let rcv = position(&model, rcv_lat, rcv_lon, rcv_depth);
    let phase = build_phase(&model, args, &src, &rcv);
    tracing::info!(
        model = ?args.model,
        phase = ?args.phase,
        rcv_lat,
        rcv_lon,
        rcv_depth,
        "trace"
    );
    let info = trace_ray(&model, cfg, src, rcv, &phase)?;

    if let Some(out) = out {
        if let Some(parent) = out.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(out, serde_json::to_vec_pretty(&info)?)
            .with_context(|| format!("writing {}", out.display()))?;
        let params = serde_json::json!({
            "ray": args,
            "receiver": { "lat": rcv_lat, "lon": rcv_lon, "depth_km": rcv_depth },
            "cfg": cfg,
        });
        provenance::write_sidecar(out, params)?;
    }
    Ok(info)
}

/// One JSON line per receiver distance. Rays that cannot be built are
/// reported with their error and the sweep continues.
fn profile(
    cfg: &BenderCfg,
    args: &RayArgs,
    (from_deg, to_deg, step_deg): (f64, f64, f64),
    rcv_depth: f64,
) -> Result<Vec<String>> {
    anyhow::ensure!(step_deg > 0.0, "--step-deg must be positive");
    let mut lines = Vec::new();
    let mut k = 0usize;
    loop {
        let distance_deg = from_deg + k as f64 * step_deg;
        if distance_deg > to_deg + 1e-9 {
            break;
        }
        let rcv = (args.src_lat, args.src_lon + distance_deg, rcv_depth);
        let row = match trace(cfg, args, rcv, None) {
            Ok(info) => serde_json::json!({ "distance_deg": distance_deg, "ray": info }),
            Err(e) => {
                tracing::warn!(distance_deg, error = %e, "ray failed");
                serde_json::json!({ "distance_deg": distance_deg, "error": e.to_string() })
            }
        };
        lines.push(serde_json::to_string(&row)?);
        k += 1;
    }
    Ok(lines)
}
