use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand, ValueEnum};
use ledlink_peer::{
    Color, ColorSpectrum, DeviceConfiguration, HandshakeConfig, PeerConfig, StripConfiguration,
    StripIndex,
};
use ledlink_portal::{DriverSession, EffectKind, SessionConfig};

use crate::exit::{portal_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod clear;
pub mod driver;
pub mod play;
pub mod show;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a driver with virtual strips that log what they are shown.
    Driver(DriverArgs),
    /// Play an effect on a driver's strips.
    Play(PlayArgs),
    /// Show one still color on a driver's strips.
    Show(ShowArgs),
    /// Stop whatever the strips are doing and turn them off.
    Clear(ClearArgs),
    /// Print the state of every strip on a driver.
    Status(StatusArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Driver(args) => driver::run(args),
        Command::Play(args) => play::run(args, format),
        Command::Show(args) => show::run(args),
        Command::Clear(args) => clear::run(args),
        Command::Status(args) => status::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DriverArgs {
    /// Address to listen on.
    #[arg(default_value = "127.0.0.1:7420")]
    pub addr: String,
    /// Driver settings (JSON). Missing fields take their defaults.
    #[arg(long, value_name = "FILE", env = "LEDLINK_DRIVER_CONFIG")]
    pub config: Option<PathBuf>,
    /// Persist the strip configuration here. Without it the driver forgets
    /// its configuration on exit.
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,
}

/// Where the driver is and how long to wait for it.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Driver address.
    #[arg(default_value = "127.0.0.1:7420")]
    pub addr: String,
    /// Deadline for the handshake and each request (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

impl ConnectArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let timeout = parse_duration(&self.timeout)?;
        let mut peer = PeerConfig::default();
        peer.channel.request_timeout = timeout;
        Ok(SessionConfig {
            peer,
            handshake: HandshakeConfig {
                timeout,
                ..HandshakeConfig::default()
            },
        })
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum SpectrumArg {
    #[default]
    Rgb,
    Rgbw,
    Rgbww,
}

impl From<SpectrumArg> for ColorSpectrum {
    fn from(spectrum: SpectrumArg) -> Self {
        match spectrum {
            SpectrumArg::Rgb => ColorSpectrum::Rgb,
            SpectrumArg::Rgbw => ColorSpectrum::Rgbw,
            SpectrumArg::Rgbww => ColorSpectrum::Rgbww,
        }
    }
}

/// The strip layout the portal synchronizes with the driver.
#[derive(Args, Debug)]
pub struct LayoutArgs {
    /// Device configuration (JSON) to synchronize instead of a generated one.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["strips", "pixels", "spectrum"])]
    pub layout: Option<PathBuf>,
    /// Number of strips, indexed from 0.
    #[arg(long, default_value_t = 1)]
    pub strips: u8,
    /// Pixels per strip.
    #[arg(long, default_value_t = 60)]
    pub pixels: u16,
    #[arg(long, value_enum, default_value_t = SpectrumArg::Rgb)]
    pub spectrum: SpectrumArg,
    /// Concurrency token. Defaults to one derived from the layout, so the
    /// same layout is only uploaded once.
    #[arg(long)]
    pub token: Option<String>,
}

impl LayoutArgs {
    pub fn device_configuration(&self) -> CliResult<DeviceConfiguration> {
        if let Some(path) = &self.layout {
            let raw = std::fs::read_to_string(path)
                .map_err(|err| crate::exit::io_error(&path.display().to_string(), err))?;
            let mut config: DeviceConfiguration = serde_json::from_str(&raw).map_err(|err| {
                CliError::new(
                    crate::exit::DATA_INVALID,
                    format!("{}: {err}", path.display()),
                )
            })?;
            if let Some(token) = &self.token {
                config.concurrency_token.clone_from(token);
            }
            return Ok(config);
        }

        if self.strips == 0 {
            return Err(CliError::new(USAGE, "--strips must be at least 1"));
        }
        let spectrum = ColorSpectrum::from(self.spectrum);
        let token = self.token.clone().unwrap_or_else(|| {
            format!("cli-{}x{}-{:?}", self.strips, self.pixels, spectrum).to_lowercase()
        });
        let strips = (0..self.strips)
            .map(|index| StripConfiguration::new(index, self.pixels, spectrum))
            .collect();
        Ok(DeviceConfiguration::new(token, strips))
    }
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[command(flatten)]
    pub layout: LayoutArgs,
    /// Effect to play (solid, chase, rainbow).
    #[arg(long, default_value = "rainbow", value_parser = parse_effect)]
    pub effect: EffectKind,
    /// Base color as hex RGB or RGBW (e.g. ff8000).
    #[arg(long, default_value = "ffffff", value_parser = parse_color)]
    pub color: Color,
    /// Playback frequency in frames per second.
    #[arg(long, short = 'f', default_value_t = 30)]
    pub frequency: u32,
    /// Frames sent with the start request.
    #[arg(long, default_value_t = 64)]
    pub initial_frames: usize,
    /// Play on these strip indices only (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub only: Option<Vec<StripIndex>>,
    /// Stop after this long (e.g. 10s). Plays until Ctrl-C otherwise.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[command(flatten)]
    pub layout: LayoutArgs,
    /// Color as hex RGB or RGBW (e.g. ff8000).
    #[arg(long, default_value = "ffffff", value_parser = parse_color)]
    pub color: Color,
    /// Show on these strip indices only (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub only: Option<Vec<StripIndex>>,
    /// Keep the frame up this long (e.g. 10s). Holds until Ctrl-C otherwise;
    /// the driver turns the strips off when the portal disconnects.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[command(flatten)]
    pub layout: LayoutArgs,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Connect a portal session for `layout`, uploading it if the driver's copy
/// is stale.
pub fn open_session(connect: &ConnectArgs, layout: &LayoutArgs) -> CliResult<DriverSession> {
    let configuration = layout.device_configuration()?;
    let config = connect.session_config()?;
    DriverSession::connect_with_config(connect.addr.clone(), configuration, &config)
        .map_err(|err| portal_error("connect failed", err))
}

/// Why [`hold`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldEnd {
    Elapsed,
    Interrupted,
    Disconnected(String),
}

impl std::fmt::Display for HoldEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldEnd::Elapsed => f.write_str("duration elapsed"),
            HoldEnd::Interrupted => f.write_str("interrupted"),
            HoldEnd::Disconnected(reason) => write!(f, "driver disconnected ({reason})"),
        }
    }
}

/// Keep `session` open until `duration` passes, Ctrl-C, or the driver goes
/// away.
pub fn hold(session: &DriverSession, duration: Option<Duration>) -> CliResult<HoldEnd> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })?;

    let deadline = duration.map(|duration| Instant::now() + duration);
    loop {
        if !running.load(Ordering::SeqCst) {
            return Ok(HoldEnd::Interrupted);
        }
        let slice = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(HoldEnd::Elapsed);
                }
                left.min(HOLD_SLICE)
            }
            None => HOLD_SLICE,
        };
        if let Some(reason) = session.wait_closed(Some(slice)) {
            return Ok(HoldEnd::Disconnected(reason.to_string()));
        }
    }
}

const HOLD_SLICE: Duration = Duration::from_millis(100);

/// The strips a command addresses: `only`, or every configured strip.
pub fn target_strips(
    configuration: &DeviceConfiguration,
    only: Option<&[StripIndex]>,
) -> CliResult<Vec<StripIndex>> {
    match only {
        None => Ok(configuration.strips.iter().map(|strip| strip.index).collect()),
        Some(indices) => {
            for index in indices {
                if configuration.strip(*index).is_none() {
                    return Err(CliError::new(
                        USAGE,
                        format!("strip {index} is not in the layout"),
                    ));
                }
            }
            Ok(indices.to_vec())
        }
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_effect(input: &str) -> Result<EffectKind, String> {
    input.parse().map_err(|err: ledlink_portal::PortalError| err.to_string())
}

/// Parse `rrggbb` or `rrggbbww`, with an optional leading `#`.
pub fn parse_color(input: &str) -> Result<Color, String> {
    let hex = input.trim().trim_start_matches('#');
    if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
        return Err(format!("expected rrggbb or rrggbbww, got '{input}'"));
    }
    let channel = |at: usize| {
        u8::from_str_radix(&hex[at..at + 2], 16)
            .map_err(|_| format!("invalid hex color '{input}'"))
    };
    let (r, g, b) = (channel(0)?, channel(2)?, channel(4)?);
    Ok(if hex.len() == 8 {
        Color::rgbw(r, g, b, channel(6)?)
    } else {
        Color::rgb(r, g, b)
    })
}
