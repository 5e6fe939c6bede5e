//! RRadio - source-cycling audio player for a headless Raspberry Pi.
//!
//! Wires the configuration, the volume limiter, the source registry and the
//! playback controller together, then dispatches keyboard controls until
//! `q` or Ctrl-C.

mod keyboard;

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select, unbounded};
use rrconfig::Config;
use rrcontrol::{
    Control, ControllerDeps, ControllerSettings, DefaultBackendFactory, DnsCheck, HistorySink,
    InputDriver, JsonlHistory, LogAnnouncer, LogFeedback, NullHistory, PlayerCommand,
    PlayerController, SpotifySettings, YoutubeSettings,
};
use rrsources::SourceRegistry;
use rrspotify::SpotifyConfigExt;
use rrvolume::{AmixerMixer, TimeOffsets, VolumeLimiter, VolumeSettings};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::keyboard::{HELP, KeyboardInput};

const SOURCES_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// RRadio - plays YouTube channels, playlists and Spotify playlists.
#[derive(Parser, Debug)]
#[command(name = "rradio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory (defaults to ~/.rradio).
    #[arg(short, long, value_name = "DIR", env = "RRADIO_CONFIG")]
    config_dir: Option<String>,

    /// Log level (error, warn, info, debug, trace). Overrides the config file.
    #[arg(short, long, env = "RRADIO_LOG_LEVEL")]
    log_level: Option<String>,

    /// Do not start the current source at launch.
    #[arg(long)]
    no_autostart: bool,

    /// Do not touch the ALSA mixer.
    #[arg(long)]
    no_volume: bool,
}

fn init_logging(config: &Config, cli_level: Option<&str>) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().to_lowercase())),
    };

    let subscriber = Registry::default().with(filter);
    if config.get_log_enable_console() {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}

fn build_limiter(config: &Config) -> Result<Arc<VolumeLimiter>> {
    let mixer = AmixerMixer::new(config.get_volume_card(), config.get_volume_control());
    let settings = VolumeSettings {
        base_max_db: config.get_volume_base_max_db(),
        offsets: TimeOffsets {
            day: config.get_volume_day_offset_db(),
            evening: config.get_volume_evening_offset_db(),
            night: config.get_volume_night_offset_db(),
        },
        update_interval: Duration::from_secs(config.get_volume_update_interval_secs()),
    };

    let limiter = Arc::new(VolumeLimiter::new(Arc::new(mixer), settings));
    let percent = config.get_volume_default_percent().min(100) as i32;
    let applied = limiter
        .set_volume(percent)
        .context("Failed to set the initial volume")?;
    info!(
        percent = applied,
        ceiling_db = limiter.ceiling_db(),
        "Volume limiter ready"
    );
    limiter.start_enforcer();
    Ok(limiter)
}

fn build_history(config: &Config) -> Arc<dyn HistorySink> {
    if !config.get_history_enabled() {
        return Arc::new(NullHistory);
    }
    let opened = config.get_history_file().and_then(|path| {
        JsonlHistory::open(&path).with_context(|| format!("Failed to open {}", path.display()))
    });
    match opened {
        Ok(history) => Arc::new(history),
        Err(e) => {
            warn!(error = %e, "History disabled, cannot open history file");
            Arc::new(NullHistory)
        }
    }
}

fn build_factory(config: &Config) -> DefaultBackendFactory {
    let credentials = match config.get_spotify_credentials() {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            info!(reason = %e, "Spotify sources unavailable");
            None
        }
    };

    DefaultBackendFactory {
        youtube: YoutubeSettings {
            feed_limit: config.get_youtube_feed_limit() as usize,
            refresh_interval: Duration::from_secs(config.get_youtube_refresh_interval_secs()),
            player: PlayerCommand::mpv(config.get_youtube_player()),
            ..YoutubeSettings::default()
        },
        resolver_program: config.get_youtube_resolver(),
        resolver_timeout: Duration::from_secs(config.get_youtube_resolver_timeout_secs()),
        spotify: SpotifySettings {
            device_id: config.get_spotify_device_id(),
            device_name: config.get_spotify_device_name(),
            manage_raspotify: config.get_spotify_manage_raspotify(),
            ..SpotifySettings::default()
        },
        spotify_credentials: credentials,
        ..DefaultBackendFactory::default()
    }
}

fn controller_settings(config: &Config) -> ControllerSettings {
    ControllerSettings {
        max_retries: config.get_controller_max_retries().max(1) as u32,
        retry_sleep: Duration::from_secs(config.get_controller_retry_sleep_secs()),
        network_timeout: Duration::from_secs(config.get_network_check_timeout_secs()),
        network_interval: Duration::from_secs(config.get_network_check_interval_secs().max(1)),
        fetching_cue_delay: Duration::from_millis(config.get_fetching_cue_delay_ms()),
        volume_step: config.get_volume_step_percent() as i32,
    }
}

fn spawn_sources_watcher(
    controller: Arc<PlayerController>,
    stop_flag: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("sources-watcher".into())
        .spawn(move || {
            let tick = Duration::from_millis(250);
            let mut elapsed = Duration::ZERO;
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(tick);
                elapsed += tick;
                if elapsed >= SOURCES_WATCH_INTERVAL {
                    elapsed = Duration::ZERO;
                    controller.reload_sources_if_changed();
                }
            }
        })
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_config(args.config_dir.as_deref().unwrap_or(""))
        .context("Failed to load configuration")?;
    init_logging(&config, args.log_level.as_deref());
    info!(dir = %config.dir().display(), "Configuration loaded");

    let limiter = if args.no_volume {
        None
    } else {
        match build_limiter(&config) {
            Ok(limiter) => Some(limiter),
            Err(e) => {
                warn!(error = %e, "Running without volume limiter");
                None
            }
        }
    };

    let registry = SourceRegistry::open(config.get_sources_file()?, config.get_state_file()?);
    info!(count = registry.len(), "Sources loaded");

    let controller = Arc::new(PlayerController::new(
        ControllerDeps {
            registry,
            factory: Arc::new(build_factory(&config)),
            limiter: limiter.clone(),
            history: build_history(&config),
            feedback: Arc::new(LogFeedback),
            announcer: Arc::new(LogAnnouncer),
            network: Arc::new(DnsCheck::new(config.get_network_check_host())),
        },
        controller_settings(&config),
    ));

    if config.get_controller_auto_start() && !args.no_autostart {
        let controller = Arc::clone(&controller);
        thread::Builder::new()
            .name("auto-start".into())
            .spawn(move || {
                controller.auto_start();
            })
            .context("Failed to spawn the auto-start thread")?;
    }

    let watcher_stop = Arc::new(AtomicBool::new(false));
    let watcher = spawn_sources_watcher(Arc::clone(&controller), Arc::clone(&watcher_stop))
        .context("Failed to spawn the sources watcher")?;

    let (quit_sender, quit_receiver) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = quit_sender.try_send(());
    })
    .context("Failed to install the Ctrl-C handler")?;

    // stdin blocks, so the keyboard runs on its own thread and the main loop
    // can still react to Ctrl-C.
    let (control_sender, control_receiver) = unbounded::<Control>();
    thread::Builder::new()
        .name("keyboard-input".into())
        .spawn(move || {
            let mut input = KeyboardInput::new(io::stdin().lock());
            input.run(&mut |control| {
                control_sender.send(control).is_ok() && control != Control::Quit
            });
        })
        .context("Failed to spawn the keyboard thread")?;

    println!("{HELP}");
    loop {
        select! {
            recv(control_receiver) -> message => match message {
                Ok(control) => {
                    if !controller.handle_control(control) {
                        break;
                    }
                }
                Err(_) => {
                    info!("Keyboard input closed, waiting for Ctrl-C");
                    let _ = quit_receiver.recv();
                    break;
                }
            },
            recv(quit_receiver) -> _ => {
                info!("Interrupted");
                break;
            }
        }
    }

    watcher_stop.store(true, Ordering::Relaxed);
    let _ = watcher.join();
    controller.shutdown();
    if let Some(limiter) = limiter {
        limiter.stop_enforcer();
    }
    info!("RRadio stopped");
    Ok(())
}
