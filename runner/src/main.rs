use clap::{App, Arg};
use hashbrown::HashMap;
use radkit::logging;
use std::sync::Arc;
use umirs::config::Settings;
use umirs::events::EventsHandler;
use umirs::net::client::{Client, Timing};
use umirs::net::frame::{CaptureState, RlsType, ServerState, Trajectory};

/// Events sink that narrates everything into the log. Stands in for the
/// upstream events manager when the driver runs on its own.
struct LogEvents {
    log: logging::Logger,
}

impl EventsHandler for LogEvents {
    fn connected(&self) {
        logging::info!(self.log, "radar server connected"; "context" => "events");
    }

    fn trajectories_discovered(&self, trajectories: HashMap<String, Trajectory>) {
        logging::info!(self.log, "trajectories discovered";
                       "context" => "events", "count" => trajectories.len());

        for (name, track) in &trajectories {
            logging::debug!(self.log, "trajectory";
                            "context" => "events",
                            "name" => name.as_str(),
                            "range" => track.range,
                            "azimuth" => track.azimuth,
                            "radial_speed" => track.radial_speed);
        }
    }

    fn capture_target_state(&self, state: CaptureState) {
        logging::info!(self.log, "capture state";
                       "context" => "events",
                       "track_id" => state.track_id,
                       "capture" => state.capture);
    }

    fn server_state_changed(&self, state: Option<ServerState>) {
        match state {
            Some(state) => {
                logging::info!(self.log, "server state";
                               "context" => "events",
                               "rls_type" => state.rls_type.map(RlsType::name).unwrap_or("unknown"),
                               "frequency" => state.eradiation_frequency.unwrap_or(0.0),
                               "eradiation" => state.eradiation_rls,
                               "auto_capture" => state.auto_capture);
            }
            None => {
                logging::debug!(self.log, "server state";
                                "context" => "events", "state" => "disconnected");
            }
        }
    }
}

pub fn main() {
    let matches = App::new("Umirs Driver")
        .version("1.0")
        .about("Runs the Radescan/Umirs radar driver.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the settings file")
                .default_value("umirs.toml"),
        )
        .arg(
            Arg::with_name("log-config")
                .long("log-config")
                .takes_value(true)
                .help("Path to a sloggers TOML config file"),
        )
        .get_matches();

    let log = match matches.value_of("log-config") {
        Some(path) => logging::from_config(path).expect("Error building logger from config"),
        None => logging::init(),
    };

    let settings = Settings::load(matches.value_of("CONFIG_FILE").unwrap(), &log);

    logging::info!(log, "driver starting";
                   "ping_time" => settings.net.ping_time,
                   "server_id" => settings.net.server_id);

    let events: Arc<dyn EventsHandler> = Arc::new(LogEvents {
        log: log.new(logging::o!()),
    });

    let client = Client::new(
        events,
        settings.net.server_id,
        Timing::with_ping_time(settings.net.ping_time),
        &log,
    );
    client.configure(settings.net.host.clone(), settings.net.port);

    client.run();
}
