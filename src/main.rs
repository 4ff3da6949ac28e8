//! # Prayer Tracker Application Entry Point
//!
//! This binary resolves the position, loads today's prayer table and prints it
//! with the next-prayer countdown and the Qibla bearing. With `--follow` it keeps
//! a session running and redraws on every tick until interrupted.

// Test modules
#[cfg(test)]
mod tests;

use anyhow::{anyhow, bail, Context};
use prayer_clock_lib::config::Config;
use prayer_clock_lib::location::{
    FixedPosition, GeoPositionProvider, LocationCapabilities, NominatimGeocoder, ReverseGeocoder,
};
use prayer_clock_lib::prayer_times::TimeTableProvider;
use prayer_clock_lib::renderer::{draw_ascii, render_methods};
use prayer_clock_lib::session::{PrayerSession, SessionSettings};
use prayer_clock_lib::storage::{self, FileStore, Store};
use prayer_clock_lib::{qibla, Coordinate};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: prayer-tracker [--lat <deg> --lon <deg>] [--method <id>] \
[--methods] [--qibla] [--clear-cache] [--follow] [--config <path>] [--write-config]";

/// Command line options.
#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub method: Option<u8>,
    pub list_methods: bool,
    pub qibla_only: bool,
    pub clear_cache: bool,
    pub follow: bool,
    pub config: Option<PathBuf>,
    pub write_config: bool,
}

impl CliArgs {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{} needs a value\n{}", name, USAGE))
            };
            match arg.as_str() {
                "--lat" => parsed.latitude = Some(value("--lat")?.parse().context("--lat")?),
                "--lon" => parsed.longitude = Some(value("--lon")?.parse().context("--lon")?),
                "--method" => parsed.method = Some(value("--method")?.parse().context("--method")?),
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--methods" => parsed.list_methods = true,
                "--qibla" => parsed.qibla_only = true,
                "--clear-cache" => parsed.clear_cache = true,
                "--follow" => parsed.follow = true,
                "--write-config" => parsed.write_config = true,
                "-h" | "--help" => bail!("{}", USAGE),
                other => bail!("unknown argument {}\n{}", other, USAGE),
            }
        }

        if parsed.latitude.is_some() != parsed.longitude.is_some() {
            bail!("--lat and --lon must be given together");
        }
        Ok(parsed)
    }

    /// Write `config` with any `--lat/--lon` folded into `[location]`, to
    /// `--config` if given, else the default file.
    pub fn write_config(&self, mut config: Config) -> anyhow::Result<()> {
        if let Some((lat, lon)) = self.manual(&config) {
            Coordinate::checked(lat, lon)?;
            config.location.latitude = Some(lat);
            config.location.longitude = Some(lon);
        }
        match &self.config {
            Some(path) => config.save_to_path(path),
            None => config.save(),
        }
    }

    /// Coordinates given on the command line or in the config.
    fn manual(&self, config: &Config) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => config.location.latitude.zip(config.location.longitude),
        }
    }

    /// Position from the command line, else the config, else the last cached fix.
    pub fn position(&self, config: &Config, store: &dyn Store) -> anyhow::Result<Coordinate> {
        if let Some((lat, lon)) = self.manual(config) {
            return Ok(Coordinate::checked(lat, lon)?);
        }

        storage::load_json::<prayer_clock_lib::ResolvedLocation>(store, storage::LOCATION_KEY)
            .map(|l| l.coordinate())
            .ok_or_else(|| {
                anyhow!("no position known: pass --lat/--lon or set [location] latitude/longitude")
            })
    }
}

/// Location provider for `position`. Manual coordinates are pinned so a
/// recently cached fix elsewhere cannot replace them.
pub fn location_provider(
    args: &CliArgs,
    config: &Config,
    position: Coordinate,
    geocoder: Arc<dyn ReverseGeocoder>,
    store: Arc<dyn Store>,
) -> GeoPositionProvider {
    if args.manual(config).is_some() {
        return GeoPositionProvider::pinned(position, geocoder, store);
    }
    GeoPositionProvider::new(
        Arc::new(FixedPosition::new(position)),
        geocoder,
        store,
        LocationCapabilities {
            continuous_watch: false,
        },
        chrono::Duration::minutes(config.location.cache_ttl_minutes),
    )
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse(env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    if args.write_config {
        return args.write_config(config);
    }

    let store: Arc<dyn Store> = Arc::new(
        FileStore::open(&config.storage.dir)
            .with_context(|| format!("opening {}", config.storage.dir.display()))?,
    );

    if let Some(method) = args.method {
        storage::save_calculation_method(store.as_ref(), method)?;
    }

    if args.list_methods {
        print!("{}", render_methods(storage::load_calculation_method(store.as_ref())));
        return Ok(());
    }

    let position = args.position(&config, store.as_ref())?;

    if args.qibla_only {
        let bearing = qibla::calculate_qibla_direction(position.latitude, position.longitude);
        println!("{:.1}°", bearing);
        return Ok(());
    }

    // Single-threaded event loop: all I/O is cooperative
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(args, config, store, position))
}

async fn run(
    args: CliArgs,
    config: Config,
    store: Arc<dyn Store>,
    position: Coordinate,
) -> anyhow::Result<()> {
    let location = location_provider(
        &args,
        &config,
        position,
        Arc::new(NominatimGeocoder::from_config(&config)?),
        store.clone(),
    );
    let schedule = TimeTableProvider::from_config(&config, store.clone())?;

    if args.clear_cache {
        location.clear_cache()?;
        schedule.clear_cache()?;
        info!("Cleared cached location and prayer table");
    }

    let settings = SessionSettings::from_config(&config);
    let tick = settings.tick;
    let session = PrayerSession::new(location, schedule, store, settings);
    session.mount().await;
    draw_ascii(&session.view());

    if !args.follow {
        return match session.view().error {
            Some(error) if session.view().prayer_times.is_none() => Err(anyhow!(error)),
            _ => Ok(()),
        };
    }

    // The CLI has no foreground/background lifecycle; keep the sender alive
    let (_app_events, app_rx) = mpsc::channel(4);
    session.start(app_rx).await;

    let mut redraw = tokio::time::interval(tick);
    redraw.tick().await;
    loop {
        tokio::select! {
            _ = redraw.tick() => {
                session.tick();
                println!();
                draw_ascii(&session.view());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.teardown();
    info!("Session stopped");
    Ok(())
}
