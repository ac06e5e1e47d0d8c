use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use telemetry_lab::config::{AppSettings, PowerSourceKind, SettingsManager};
use telemetry_lab::system::performance::{ConvolutionWorkload, SamplingLoop, TelemetryEvent};
use telemetry_lab::system::power::{PowerController, SysfsPowerSource};
use telemetry_lab::{LogCollector, StateStore};

const USAGE: &str = "usage: telemetry_lab [--intensity N] [--clear] [--settings PATH]";

#[derive(Debug, Default)]
struct CliArgs {
    intensity: Option<i32>,
    clear: bool,
    settings: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Option<CliArgs>> {
    let mut cli = CliArgs::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--intensity" => {
                let value = args.next().context("--intensity needs a value")?;
                cli.intensity = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid intensity '{}'", value))?,
                );
            }
            "--clear" => cli.clear = true,
            "--settings" => {
                cli.settings = Some(PathBuf::from(args.next().context("--settings needs a path")?));
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(None);
            }
            other => bail!("unknown argument '{}'\n{}", other, USAGE),
        }
    }
    Ok(Some(cli))
}

fn print_report(store: &StateStore, settings: &AppSettings) {
    let state = store.snapshot();
    match store.current_metrics(settings.metrics_window) {
        Ok(m) => println!(
            "[Report] frame #{:<6} {:>7.2}ms | intensity {} @ {}Hz{}{} | avg {:.2} min {:.2} max {:.2} p95 {:.2} p99 {:.2} | jank {}/{} ({:.1}%)",
            state.current_frame_id,
            state.current_latency_ms,
            state.current_intensity,
            state.cadence_hz,
            if state.is_power_save_mode { " [power-save]" } else { "" },
            if state.is_degraded { " [DEGRADED]" } else { "" },
            m.average_latency_ms,
            m.min_latency_ms,
            m.max_latency_ms,
            m.p95_latency_ms,
            m.p99_latency_ms,
            m.jank_count,
            m.frame_count,
            m.jank_percentage,
        ),
        Err(e) => eprintln!("[Main] WARNING: Metrics unavailable: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(cli) = parse_args()? else {
        return Ok(());
    };

    // =========================================================================
    // SETTINGS
    // =========================================================================
    let settings_path = match cli.settings {
        Some(path) => path,
        None => telemetry_lab::config::default_settings_path()?,
    };
    // Notes are logged once the collector is installed
    let (settings, settings_notes) = SettingsManager::load_with_notes(&settings_path)?;
    eprintln!("[Main] ✓ Settings loaded from {}", settings_path.display());

    // =========================================================================
    // LOGGING - BEFORE ANY RUN TASK EXISTS
    // =========================================================================
    let log_dir = settings.log_dir_path()?;
    let log_collector = LogCollector::new(&log_dir, settings.log_level())
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    if let Err(e) = log_collector.install() {
        eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
    } else {
        eprintln!("[Main] ✓ Logging to {}", log_collector.log_path().display());
    }
    log::info!("Telemetry Lab {} starting", telemetry_lab::VERSION);
    for note in &settings_notes {
        note.log();
    }

    // =========================================================================
    // STORE AND POWER SOURCE
    // =========================================================================
    let store = StateStore::from_settings(&settings)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    if settings.persist_samples {
        eprintln!("[Main] ✓ Store opened");
    } else {
        eprintln!("[Main] ✓ Samples kept in memory only");
    }

    let (power, power_task) = match settings.power_source {
        PowerSourceKind::Sysfs => {
            let source = SysfsPowerSource::new(&settings.power_profile_path, settings.power_poll_interval());
            let (controller, handle) = source.spawn();
            (controller, Some(handle))
        }
        PowerSourceKind::Disabled => (PowerController::disabled(), None),
    };

    // =========================================================================
    // SAMPLING LOOP
    // =========================================================================
    let (event_tx, mut event_rx) = mpsc::channel::<TelemetryEvent>(256);
    let events_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                TelemetryEvent::SampleRecorded(_) => {}
                other => println!("[Event] {}", other),
            }
        }
    });

    let sampling = SamplingLoop::new(
        store.clone(),
        power,
        Arc::new(ConvolutionWorkload::default()),
        Some(event_tx),
    );

    if cli.clear {
        sampling.clear_samples().await?;
        eprintln!("[Main] ✓ Sample log cleared");
    }

    let intensity = cli.intensity.unwrap_or(settings.default_intensity);
    sampling.start(intensity).await?;
    eprintln!("[Main] Sampling started; press Ctrl-C to stop");

    let mut report = tokio::time::interval(settings.report_interval());
    loop {
        tokio::select! {
            _ = report.tick() => print_report(&store, &settings),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    eprintln!("[Main] WARNING: Ctrl-C handler failed: {}", e);
                }
                break;
            }
        }
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================
    if let Err(e) = sampling.shutdown().await {
        eprintln!("[Main] WARNING: {}", e.user_message());
    }
    print_report(&store, &settings);

    drop(sampling);
    let _ = events_task.await;
    if let Some(handle) = power_task {
        handle.abort();
    }

    if let Err(e) = log_collector.wait_for_empty().await {
        eprintln!("[Main] WARNING: Failed to flush logs: {}", e);
    }
    eprintln!("[Main] Shut down cleanly");
    Ok(())
}
