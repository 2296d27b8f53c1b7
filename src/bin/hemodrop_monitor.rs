//! HemoDrop monitor
//!
//! Runs the monitoring engine against the simulated source and prints every
//! broadcast event to stdout as one JSON object per line. Logs go to stderr.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};

use hemodrop::{
    JsonLinesObserver, MonitorConfig, MonitorEngine, OpenRegistry, SessionScheduler, SimulatedSource,
    SimulationProfile, SubjectId,
};

/// Command-line options
struct Options {
    /// Subjects to open sessions for
    subjects: Vec<String>,
    /// Stop after this long; otherwise run until stdin yields a line or closes
    duration: Option<Duration>,
    /// Overrides the configured sampling interval
    interval_ms: Option<u64>,
    /// Simulated minutes per wall-clock second
    speed: Option<f64>,
    /// Seed for a reproducible simulation
    seed: Option<u64>,
    /// JSON config file; environment overrides apply when absent
    config: Option<PathBuf>,
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires a value");
            std::process::exit(1);
        }
    }
}

fn parse_num<T: std::str::FromStr>(raw: &str, flag: &str) -> T {
    raw.parse().unwrap_or_else(|_| {
        eprintln!("error: invalid value for {flag}: {raw}");
        std::process::exit(1);
    })
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        subjects: Vec::new(),
        duration: None,
        interval_ms: None,
        speed: None,
        seed: None,
        config: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--subject" | "-s" => {
                options.subjects.push(value_of(&args, i, "--subject").to_string());
                i += 2;
            }
            "--duration" | "-d" => {
                let secs: u64 = parse_num(value_of(&args, i, "--duration"), "--duration");
                options.duration = Some(Duration::from_secs(secs));
                i += 2;
            }
            "--interval-ms" => {
                options.interval_ms = Some(parse_num(value_of(&args, i, "--interval-ms"), "--interval-ms"));
                i += 2;
            }
            "--speed" => {
                options.speed = Some(parse_num(value_of(&args, i, "--speed"), "--speed"));
                i += 2;
            }
            "--seed" => {
                options.seed = Some(parse_num(value_of(&args, i, "--seed"), "--seed"));
                i += 2;
            }
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(value_of(&args, i, "--config")));
                i += 2;
            }
            "--help" | "-h" => {
                println!("hemodrop-monitor - HemoDrop blood loss monitor");
                println!();
                println!("USAGE:");
                println!("    hemodrop-monitor [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -s, --subject <ID>        Subject to monitor (repeatable) [default: test_patient_001]");
                println!("    -d, --duration <SECS>     Stop after SECS seconds [default: until stdin line or EOF]");
                println!("        --interval-ms <MS>    Sampling interval override");
                println!("        --speed <MIN/SEC>     Simulated minutes per second [default: 1/60]");
                println!("        --seed <N>            Seed the simulator");
                println!("    -c, --config <FILE>       JSON configuration file");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    if options.subjects.is_empty() {
        options.subjects.push("test_patient_001".to_string());
    }
    options
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_args();
    init_tracing();

    let mut config = match &options.config {
        Some(path) => MonitorConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => MonitorConfig::from_env()?,
    };
    if let Some(ms) = options.interval_ms {
        config.scheduler.sampling_interval_ms = ms;
    }

    let mut profile = SimulationProfile::default();
    if let Some(speed) = options.speed {
        profile.minutes_per_second = speed;
    }
    let source = Arc::new(match options.seed {
        Some(seed) => SimulatedSource::seeded(profile, seed),
        None => SimulatedSource::new(profile),
    });

    let engine = Arc::new(MonitorEngine::new(config, Arc::new(OpenRegistry))?);
    engine.attach(Arc::new(JsonLinesObserver::new(std::io::stdout())))?;

    for raw in &options.subjects {
        let subject = SubjectId::new(raw.as_str())?;
        engine.start_session(&subject)?;
    }

    let scheduler = SessionScheduler::new(Arc::clone(&engine), source)?.spawn()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), subjects = options.subjects.len(), "monitor running");

    let (stop_tx, stop_rx) = bounded::<()>(1);
    thread::Builder::new().name("hemodrop-stdin".to_string()).spawn(move || {
        let mut line = String::new();
        // EOF drops the sender, which also ends the wait below.
        if matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
            let _ = stop_tx.send(());
        }
    })?;

    match options.duration {
        Some(duration) => {
            let deadline = Instant::now() + duration;
            if let Err(RecvTimeoutError::Disconnected) = stop_rx.recv_timeout(duration) {
                // stdin closed early; honor the requested duration anyway.
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
            }
        }
        None => {
            let _ = stop_rx.recv();
        }
    }

    scheduler.stop()?;
    let health = engine.health()?;
    tracing::info!(
        sessions = health.active_sessions,
        subjects = health.tracked_subjects,
        alerts = engine.alerts(None, false)?.len(),
        "monitor stopped"
    );
    Ok(())
}
