use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pingpoll::cli::Args;
use pingpoll::config::{SessionConfig, Settings};
use pingpoll::engine::connectivity::{DEFAULT_CHECK_HOSTS, DEFAULT_CHECK_TIMEOUT};
use pingpoll::engine::{Connectivity, check_connectivity};
use pingpoll::export::{export_json, generate_report, load_export, write_csv_header, write_csv_row, write_csv_summary};
use pingpoll::logging::init_logging;
use pingpoll::prefs::Prefs;
use pingpoll::probe::{IcmpTransport, check_permissions};
use pingpoll::state::{Sample, SessionController, SessionHandle, SessionState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle replay mode (doesn't need permissions or target resolution)
    if let Some(ref replay_path) = args.replay {
        return run_replay_mode(replay_path);
    }

    let prefs = Prefs::load();
    let settings = args.settings(&prefs);
    let config = match SessionConfig::try_from(settings.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if args.save_defaults {
        save_defaults(&settings, args.refresh)?;
    }

    // Check permissions early
    if let Err(e) = check_permissions() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let transport = IcmpTransport::for_config(&config);

    if args.check {
        return run_check_mode(&transport).await;
    }

    let refresh = args.refresh_duration(&prefs);
    run_session_mode(&args, config, transport, refresh).await
}

fn save_defaults(settings: &Settings, refresh: Option<f64>) -> Result<()> {
    Prefs::from_settings(settings, refresh)
        .save()
        .context("Failed to save defaults")?;
    if let Some(path) = Prefs::path() {
        eprintln!("Saved defaults to {}", path.display());
    }
    Ok(())
}

/// Run replay mode - load a saved export and print its report
fn run_replay_mode(path: &Path) -> Result<()> {
    let export = load_export(path)?;
    generate_report(&export, std::io::stdout())?;
    Ok(())
}

/// Probe well-known hosts and report whether any answered
async fn run_check_mode(transport: &IcmpTransport) -> Result<()> {
    match check_connectivity(transport, DEFAULT_CHECK_HOSTS, DEFAULT_CHECK_TIMEOUT).await {
        Connectivity::Reachable { host, rtt_ms } => {
            println!("Connectivity OK: {} answered in {:.1}ms", host, rtt_ms);
            Ok(())
        }
        Connectivity::Unreachable { attempts } => {
            println!("No connectivity:");
            for (host, outcome) in attempts {
                println!("  {:<12} {}", host, outcome.label());
            }
            std::process::exit(2);
        }
    }
}

fn is_stdout(path: &Path) -> bool {
    path == Path::new("-")
}

fn open_output(path: &Path) -> Result<Box<dyn Write + Send>> {
    if is_stdout(path) {
        return Ok(Box::new(std::io::stdout()));
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// Write every tapped sample as a CSV row until the session ends
async fn stream_csv(
    mut rx: mpsc::Receiver<Sample>,
    mut writer: Box<dyn Write + Send>,
    host: String,
    start: Instant,
) -> Result<Box<dyn Write + Send>> {
    write_csv_header(&mut writer)?;
    while let Some(sample) = rx.recv().await {
        write_csv_row(&mut writer, &sample.to_record(start), &host)?;
        writer.flush()?;
    }
    Ok(writer)
}

/// Live session with a status line per refresh tick
async fn run_session_mode(args: &Args, config: SessionConfig, transport: IcmpTransport, refresh: Duration) -> Result<()> {
    let host = config.host.clone();
    let interval_secs = config.interval.as_secs_f64();
    let mut controller = SessionController::new(transport);
    let handle = controller.handle();

    let csv_tap = match args.csv {
        Some(ref path) => Some((controller.subscribe(), open_output(path)?)),
        None => None,
    };

    controller.start(config)?;
    let start = handle.started().map(|(start, _)| start).unwrap_or_else(Instant::now);

    let csv_task = csv_tap.map(|(rx, writer)| tokio::spawn(stream_csv(rx, writer, host.clone(), start)));

    // Status lines move to stderr when stdout carries data
    let status_to_stderr = [&args.csv, &args.json].into_iter().flatten().any(|p| is_stdout(p));

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    eprintln!("PING {} every {:.3}s (Ctrl+C to stop)", host, interval_secs);

    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let line = status_line(&handle, start);
                if status_to_stderr {
                    eprintln!("{}", line);
                } else {
                    println!("{}", line);
                }
                if controller.state() == SessionState::Stopped {
                    break;
                }
            }
        }
    }

    controller.stop().await?;
    let export = controller.export();

    if let Some(task) = csv_task {
        let mut writer = task.await??;
        write_csv_summary(&mut writer, &export.stats, export.duration_secs(), interval_secs)?;
        writer.flush()?;
    }

    if let Some(ref path) = args.json {
        let mut writer = open_output(path)?;
        export_json(&export, &mut writer)?;
        writer.flush()?;
    }

    if args.report {
        if status_to_stderr {
            generate_report(&export, std::io::stderr())?;
        } else {
            generate_report(&export, std::io::stdout())?;
        }
    }

    Ok(())
}

/// One-line summary of the latest sample and the windowed statistics
fn status_line(handle: &SessionHandle, start: Instant) -> String {
    let stats = handle.stats();
    let window = handle.window_stats();
    let last = handle.samples().pop();
    let ms = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".into());

    let latest = match last {
        Some(sample) => match sample.outcome.rtt_ms() {
            Some(rtt) => format!("seq={} rtt={:.1}ms", sample.sequence, rtt),
            None => format!("seq={} {}", sample.sequence, sample.outcome.label()),
        },
        None => "waiting".to_string(),
    };

    format!(
        "[{:>6.1}s] {:<24} sent={} loss={:.1}% avg={} min={} max={} jitter={} | recent loss={:.1}% avg={} | {}",
        start.elapsed().as_secs_f64(),
        latest,
        stats.count,
        stats.loss_rate_percent,
        ms(stats.mean_rtt),
        ms(stats.min_rtt),
        ms(stats.max_rtt),
        ms(stats.jitter),
        window.loss_rate_percent,
        ms(window.mean_rtt),
        stats.quality.label()
    )
}
