use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtc_session::config::{ClientConfig, CodecChoice, ConfigStore, DataChannelMode, VideoTransform};
use rtc_session::events::{EventBus, SessionEvent};
use rtc_session::media::SystemMediaDevices;
use rtc_session::webrtc::{HttpSignaling, RtcConnector, SessionController};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// rtc-session command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtc-session")]
#[command(version, about = "WebRTC offer/answer session client", long_about = None)]
struct CliArgs {
    /// Configuration file (default: $RTC_SESSION_CONFIG or ./rtc-session.json)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Signaling endpoint base URL (overrides config)
    #[arg(short = 's', long, value_name = "URL")]
    signaling_url: Option<String>,

    /// Use the configured STUN servers
    #[arg(long)]
    stun: bool,

    /// Send audio from the default microphone
    #[arg(long)]
    audio: bool,

    /// Do not send video
    #[arg(long)]
    no_video: bool,

    /// Do not open the auxiliary data channel
    #[arg(long)]
    no_datachannel: bool,

    /// Camera device id (e.g., /dev/video0)
    #[arg(long, value_name = "DEVICE")]
    camera: Option<String>,

    /// Capture resolution, e.g. 640x480
    #[arg(long, value_name = "WxH")]
    resolution: Option<String>,

    /// Audio codec to keep in the offer, e.g. opus/48000/2
    #[arg(long, value_name = "CODEC")]
    audio_codec: Option<String>,

    /// Video codec to keep in the offer, e.g. VP8/90000
    #[arg(long, value_name = "CODEC")]
    video_codec: Option<String>,

    /// Transform the remote side applies to the video (none, detect)
    #[arg(long, value_name = "TRANSFORM")]
    transform: Option<VideoTransform>,

    /// Data channel mode (ordered-reliable, unordered-no-retransmit,
    /// unordered-time-limited[=ms])
    #[arg(long, value_name = "MODE")]
    datachannel_mode: Option<DataChannelMode>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting rtc-session v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    tracing::info!("Configuration file: {}", config_path.display());
    let config_store = ConfigStore::new(&config_path).await?;

    let mut config = (*config_store.get()).clone();
    apply_cli_overrides(&mut config, &args)?;

    let events = Arc::new(EventBus::new());
    let controller = Arc::new(SessionController::new(
        config.clone(),
        Arc::new(RtcConnector::new()),
        Arc::new(HttpSignaling::new(config.signaling_url.clone())),
        Arc::new(SystemMediaDevices::new()),
        events.clone(),
    ));

    tokio::spawn(print_events(events.subscribe()));

    match controller.cameras().await {
        Ok(cameras) if cameras.is_empty() => tracing::warn!("No cameras found"),
        Ok(cameras) => {
            for camera in &cameras {
                tracing::info!("Camera {}: {}", camera.device_id, camera.display_label());
            }
        }
        Err(e) => tracing::warn!("Failed to enumerate cameras: {}", e),
    }

    spawn_start(controller.clone(), &config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read command: {}", e);
                        break;
                    }
                };
                if !handle_command(&controller, &config_store, &config, line.trim()).await {
                    break;
                }
            }
        }
    }

    controller.stop().await;
    controller.wait_closed().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn spawn_start(controller: Arc<SessionController>, config: &ClientConfig) {
    let mut options = config.session.clone();
    // The controller seeds its camera selection from the config and tracks changes
    options.video.device_id = None;
    tokio::spawn(async move {
        if let Err(e) = controller.start(options).await {
            if !e.is_cancelled() {
                tracing::error!("Session start failed: {} (type 'stop' to clean up)", e);
            }
        }
    });
}

/// Returns `false` when the client should exit
async fn handle_command(
    controller: &Arc<SessionController>,
    config_store: &ConfigStore,
    config: &ClientConfig,
    command: &str,
) -> bool {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "" => {}
        "start" => spawn_start(controller.clone(), config),
        "stop" => {
            controller.stop().await;
            controller.wait_closed().await;
        }
        "quit" | "exit" => return false,
        "status" => match controller.status().await {
            Some(status) => match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Failed to serialize status: {}", e),
            },
            None => println!("No active session"),
        },
        "cameras" => match controller.cameras().await {
            Ok(cameras) => {
                let selected = controller.selected_camera();
                for camera in cameras {
                    let marker = if selected.as_deref() == Some(camera.device_id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {} ({})", marker, camera.device_id, camera.display_label());
                }
            }
            Err(e) => tracing::warn!("Failed to enumerate cameras: {}", e),
        },
        "camera" if !arg.is_empty() => {
            if controller.switch_camera(arg).await {
                println!("Switched to {}", arg);
            }
            // Remembered for the next run as well
            let device = arg.to_string();
            if let Err(e) = config_store
                .update(|c| c.session.video.device_id = Some(device))
                .await
            {
                tracing::warn!("Failed to save camera selection: {}", e);
            }
        }
        _ => println!("Commands: start, stop, status, cameras, camera <device>, quit"),
    }
    true
}

async fn print_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::StateChanged { axis, from, to, .. }) => {
                println!("{} state: {} -> {}", axis, from, to);
            }
            Ok(SessionEvent::ChannelLog { line, .. }) => println!("{}", line),
            Ok(SessionEvent::RemoteTrack { kind, track_id, .. }) => {
                println!("remote {} track: {}", kind, track_id);
            }
            Ok(event) => tracing::debug!("Event: {}", event.event_name()),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event printer lagged, {} events skipped", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn apply_cli_overrides(config: &mut ClientConfig, args: &CliArgs) -> anyhow::Result<()> {
    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }

    let session = &mut config.session;
    if args.stun {
        session.use_stun = true;
    }
    if args.audio {
        session.use_audio = true;
    }
    if args.no_video {
        session.use_video = false;
    }
    if args.no_datachannel {
        session.use_datachannel = false;
    }
    if let Some(camera) = &args.camera {
        session.video.device_id = Some(camera.clone());
    }
    if let Some(resolution) = &args.resolution {
        session.video.set_resolution(resolution)?;
    }
    if let Some(codec) = &args.audio_codec {
        session.audio_codec = CodecChoice::from(codec.as_str());
    }
    if let Some(codec) = &args.video_codec {
        session.video_codec = CodecChoice::from(codec.as_str());
    }
    if let Some(transform) = args.transform {
        session.video_transform = transform;
    }
    if let Some(mode) = args.datachannel_mode {
        session.datachannel_mode = mode;
    }
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "rtc_session=error,webrtc=error",
        LogLevel::Warn => "rtc_session=warn,webrtc=warn",
        LogLevel::Info => "rtc_session=info,webrtc=warn",
        LogLevel::Verbose => "rtc_session=debug,webrtc=warn",
        LogLevel::Debug => "rtc_session=debug,webrtc=info",
        LogLevel::Trace => "rtc_session=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("RTC_SESSION_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("rtc-session.json")
}
