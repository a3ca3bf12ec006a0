//! Level Monitor
//!
//! Captures from an input device and prints live RMS and peak-hold levels.
//!
//! ```text
//! level-monitor [--list] [--host NAME] [--config PATH] [--device N] [--gain G] [--json]
//! ```

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_level_source::{
    audio::{
        level_meter::meter_fraction, AudioSource, CaptureBackend, CpalBackend, DeviceCatalog,
        LevelMeter, LevelSnapshot, MeterHandler,
    },
    config::AppConfig,
};

#[derive(Debug, Default)]
struct Args {
    list: bool,
    host: Option<String>,
    config: Option<PathBuf>,
    device: Option<usize>,
    gain: Option<f32>,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--list" => args.list = true,
            "--json" => args.json = true,
            "--host" => {
                args.host = Some(iter.next().context("--host needs a name")?);
            }
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--device" => {
                let value = iter.next().context("--device needs an index")?;
                args.device = Some(value.parse().with_context(|| format!("invalid device index '{}'", value))?);
            }
            "--gain" => {
                let value = iter.next().context("--gain needs a value")?;
                args.gain = Some(value.parse().with_context(|| format!("invalid gain '{}'", value))?);
            }
            "-h" | "--help" => {
                println!(
                    "Usage: level-monitor [--list] [--host NAME] [--config PATH] [--device N] [--gain G] [--json]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument '{}'", other),
        }
    }

    Ok(args)
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    if let Some(path) = path {
        return AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()));
    }

    match AppConfig::default_path() {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            AppConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
        }
        _ => Ok(AppConfig::default()),
    }
}

fn select_backend(host: Option<&str>) -> Result<CpalBackend> {
    let Some(name) = host else {
        return Ok(CpalBackend::new());
    };

    CpalBackend::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .map(CpalBackend::with_host)
        .with_context(|| format!("audio host '{}' is not available", name))
}

fn print_devices(backend: &CpalBackend, catalog: &DeviceCatalog) {
    let default = catalog.default_device();

    let hosts: Vec<&str> = CpalBackend::available_hosts().iter().map(|id| id.name()).collect();
    println!("\nAudio hosts: {} (using {})", hosts.join(", "), backend.host_name());

    println!("\n=== Available Input Devices ===");
    for device in catalog.input_devices() {
        let default_marker = if Some(device.index) == default { " [DEFAULT]" } else { "" };
        println!("  {}: {}{}", device.index, device.name, default_marker);
        println!("    Channels: {}", device.max_input_channels);
        if let Some(rate) = device.default_sample_rate {
            println!("    Sample rate: {} Hz", rate);
        }
    }
    println!();
}

fn render_bar(snapshot: &LevelSnapshot, floor_db: f32, width: usize) -> String {
    let rms_cells = (meter_fraction(snapshot.rms_db, floor_db) * width as f32).round() as usize;
    let peak_cell = (meter_fraction(snapshot.peak_db, floor_db) * width as f32).round() as usize;

    let mut bar = String::with_capacity(width);
    for cell in 0..width {
        let ch = if cell < rms_cells {
            '#'
        } else if peak_cell > 0 && cell == peak_cell.min(width) - 1 {
            '|'
        } else {
            ' '
        };
        bar.push(ch);
    }

    format!(
        "[{}] RMS {:>6.1} dB  Peak {:>6.1} dB",
        bar,
        snapshot.rms_db.max(floor_db),
        snapshot.peak_db.max(floor_db)
    )
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args()?;
    let mut config = load_config(args.config.as_ref())?;
    if let Some(gain) = args.gain {
        config.stream.gain = gain;
    }

    let cpal_backend = select_backend(args.host.as_deref())?;
    let backend: Arc<dyn CaptureBackend> = Arc::new(cpal_backend);
    let mut catalog = DeviceCatalog::new(backend.clone());
    if let Some(name) = config.devices.preferred_name.clone() {
        catalog = catalog.prefer_name_containing(name);
    }

    if args.list {
        print_devices(&cpal_backend, &catalog);
        return Ok(());
    }

    tracing::info!("Starting Level Monitor");

    let device_index = args
        .device
        .or(config.stream.device_index)
        .or_else(|| catalog.default_device())
        .context("no input device available")?;

    if let Some(device) = catalog.device_info(device_index) {
        tracing::info!("Using input device {}: {}", device.index, device.name);
    }

    let meter = Arc::new(LevelMeter::new(config.meter_params()));
    let source = AudioSource::new(backend, config.source_config())?;
    source.set_callback(MeterHandler::new(meter.clone()));
    source.start(device_index)?;

    if let Some(stream) = source.stream_config() {
        tracing::info!(
            "Capturing on host {}: {:.1} ms per frame",
            cpal_backend.host_name(),
            stream.frame_period_us() as f64 / 1000.0
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = running.clone();
    ctrlc::set_handler(move || {
        running_for_signal.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    tracing::info!("Monitoring levels - press Ctrl+C to stop");

    let refresh = config.refresh_interval();
    let started = Instant::now();
    let mut stdout = std::io::stdout();

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(refresh);

        let snapshot = meter.snapshot();
        if args.json {
            let line = serde_json::json!({
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "rms_db": snapshot.rms_db,
                "peak_db": snapshot.peak_db,
            });
            writeln!(stdout, "{}", line)?;
        } else {
            write!(
                stdout,
                "\r{}",
                render_bar(&snapshot, config.monitor.floor_db, config.monitor.bar_width)
            )?;
        }
        stdout.flush()?;
    }

    if !args.json {
        println!();
    }

    source.shutdown();

    let stats = source.stats();
    tracing::info!(
        "Captured {} frames, processed {}, dropped {}, {} callback errors",
        stats.frames_captured,
        stats.frames_processed,
        stats.frames_dropped,
        stats.callback_errors
    );
    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
    }

    Ok(())
}
