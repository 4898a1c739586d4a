//! ridetrack cli - replay, inspect and export tracked locations

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use argopt::{cmd_group, subcmd};
use csv::Reader;
use time::format_description::well_known;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use ridetrack::config::{load_configs, Configs, StorageConfig, StorageMode, CONFIG_FILE_NAME};
use ridetrack::export::{self, TrailExporter};
use ridetrack::sources::CsvSource;
use ridetrack::storage::{LocalStore, LocationStore, StorageStrategy};
use ridetrack::{
    calculate_distance, estimate_eta_minutes, LocationService, SubjectRole, TrackingRequest,
    DEFAULT_ASSUMED_SPEED_KMH,
};

/// CLI of ridetrack - Live location tracking for drivers and passengers
#[cmd_group(commands = [replay, distance, last, export])]
fn main() -> Result<(), String> {}

/// Run a tracking session over a CSV recording
#[subcmd]
fn replay(
    /// CSV file with the recorded positions
    csv_path: String,
    /// Tracked driver/passenger id
    subject: String,
    /// driver or passenger
    role: String,
    /// Configuration file. Default: .ridetrack.yaml, ~/.ridetrack.yaml
    #[opt(long)]
    config: Option<String>,
    /// Replay this many times faster than recorded
    #[opt(long)]
    speedup: Option<f64>,
) -> Result<(), String> {
    init_logging();

    let role = role.parse::<SubjectRole>()?;
    let conf = load(config);

    let csv = File::open(&csv_path)
        .map_err(|e| format!("Failed on open the CSV file: {}", e))?;
    let source = CsvSource::load(Reader::from_reader(csv), Some(conf.fields.clone()))?
        .speedup(speedup.unwrap_or(1.0));

    runtime()?.block_on(run_replay(source, subject, role, conf))
}

async fn run_replay(
    source: CsvSource,
    subject: String,
    role: SubjectRole,
    conf: Configs,
) -> Result<(), String> {
    let total = source.samples().len();
    let replay_for = source.replay_duration();

    let strategy = StorageStrategy {
        store: open_store(&conf.storage).await?,
        keep_history: conf.storage.keep_history,
    };
    let service = LocationService::new(Arc::new(source), strategy).options(conf.position.clone());

    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    let mut request = TrackingRequest::new(&subject, role);
    request
        .options(conf.position.clone())
        .tuning(conf.tuning.clone())
        .on_update(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

    let session = service
        .start_tracking(&request)
        .await
        .ok_or("Tracking could not start, see the log")?;

    // one extra heartbeat after the last sample
    tokio::time::sleep(replay_for + conf.tuning.tick_period()).await;
    session.stop();
    tokio::task::yield_now().await;

    println!(
        "{} {}: {} samples read, {} accepted, {} failed writes",
        role,
        subject,
        total,
        accepted.load(Ordering::Relaxed),
        session.persistence_failures()
    );
    if let Some(last) = session.last_accepted() {
        println!("last position: {:.6},{:.6}", last.latitude(), last.longitude());
    }

    Ok(())
}

/// Distance and naive ETA between two coordinates
#[subcmd]
fn distance(
    /// Origin latitude
    lat1: f64,
    /// Origin longitude
    lng1: f64,
    /// Destination latitude
    lat2: f64,
    /// Destination longitude
    lng2: f64,
    /// Assumed average speed in km/h. Default: 30
    #[opt(long)]
    speed: Option<f64>,
) -> Result<(), String> {
    let km = calculate_distance(lat1, lng1, lat2, lng2);
    let speed = speed.unwrap_or(DEFAULT_ASSUMED_SPEED_KMH);

    match estimate_eta_minutes(km, speed) {
        Some(eta) => println!("{:.3} km, about {} min at {} km/h", km, eta, speed),
        None => println!("{:.3} km", km),
    }

    Ok(())
}

/// Print the last stored position of a subject
#[subcmd]
fn last(
    /// Tracked driver/passenger id
    subject: String,
    /// driver or passenger
    role: String,
    /// Configuration file. Default: .ridetrack.yaml, ~/.ridetrack.yaml
    #[opt(long)]
    config: Option<String>,
) -> Result<(), String> {
    init_logging();

    let role = role.parse::<SubjectRole>()?;
    let conf = load(config);

    runtime()?.block_on(async move {
        let store = open_store(&conf.storage).await?;
        let found = store
            .last_known(role, &subject)
            .await
            .map_err(|e| format!("Failed on read the location: {}", e))?;

        match found {
            Some(r) => {
                let at = r
                    .captured_at
                    .format(&well_known::Rfc3339)
                    .map_err(|e| e.to_string())?;
                let state = if r.online { "online" } else { "offline" };
                println!("{:.6},{:.6} at {} ({})", r.latitude, r.longitude, at, state);
            }
            None => println!("No location stored for {} `{}`", role, subject),
        }

        Ok(())
    })
}

/// Write the recorded trail of a subject as GPX
#[subcmd]
fn export(
    /// Tracked driver/passenger id
    subject: String,
    /// driver or passenger
    role: String,
    /// GPX path file destination
    destination: String,
    /// Configuration file. Default: .ridetrack.yaml, ~/.ridetrack.yaml
    #[opt(long)]
    config: Option<String>,
    /// Longest pause, in minutes, inside one track segment. Default: 5
    #[opt(long)]
    max_gap: Option<u8>,
) -> Result<(), String> {
    init_logging();

    let role = role.parse::<SubjectRole>()?;
    let conf = load(config);

    let history = runtime()?.block_on(async {
        let store = open_store(&conf.storage).await?;
        store
            .history(role, &subject)
            .await
            .map_err(|e| format!("Failed on read the trail: {}", e))
    })?;
    if history.is_empty() {
        return Err(format!(
            "No trail recorded for {} `{}`, is `keep_history` enabled?",
            role, subject
        ));
    }

    let track = TrailExporter::new(&subject, role)
        .max_gap(max_gap.unwrap_or(5))
        .build(&history)?;
    let doc = export::generate(vec![track]);

    let destination = File::create(destination)
        .map_err(|e| format!("Failed on create the destination file: {}", e))?;
    let mut writer = BufWriter::new(destination);
    gpx::write(&doc, &mut writer).map_err(|e| e.to_string())?;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn runtime() -> Result<Runtime, String> {
    Runtime::new().map_err(|e| format!("Failed on start the runtime: {}", e))
}

/// Load the current config
fn load(provided: Option<String>) -> Configs {
    let mut options = vec![];

    if let Some(sprovided) = provided {
        options.push(sprovided);
    }

    options.push(CONFIG_FILE_NAME.to_string());

    if let Some(home) = dirs::home_dir() {
        if let Some(shome) = home.to_str() {
            options.push(format!("{}/{}", shome, CONFIG_FILE_NAME));
        }
    }

    load_configs(&options)
}

async fn open_store(conf: &StorageConfig) -> Result<Arc<dyn LocationStore>, String> {
    match conf.mode {
        StorageMode::Local => {
            let store = match &conf.local_path {
                Some(path) => LocalStore::open(path)
                    .map_err(|e| format!("Failed on open the local store: {}", e))?,
                None => LocalStore::in_memory(),
            };

            Ok(Arc::new(store.history_cap(conf.history_cap)))
        }
        StorageMode::Remote => open_remote(conf).await,
    }
}

#[cfg(feature = "mongo")]
async fn open_remote(conf: &StorageConfig) -> Result<Arc<dyn LocationStore>, String> {
    use bson::Document;
    use mongodb::Client;
    use ridetrack::storage::MongoStore;

    let uri = conf
        .mongo_uri
        .as_ref()
        .ok_or("Remote storage needs `mongo_uri`")?;

    let client = Client::with_uri_str(uri)
        .await
        .map_err(|e| format!("Failed on connect: {}", e))?;
    let db = match &conf.mongo_database {
        Some(name) => client.database(name),
        None => client
            .default_database()
            .ok_or("Default database not provided")?,
    };

    Ok(Arc::new(MongoStore::new(
        db.collection::<Document>(&conf.mongo_collection),
    )))
}

#[cfg(not(feature = "mongo"))]
async fn open_remote(_conf: &StorageConfig) -> Result<Arc<dyn LocationStore>, String> {
    Err("Built without remote storage support".to_string())
}
