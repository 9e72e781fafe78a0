extern crate clap;

use std::process::exit;
use std::sync::Arc;

use clap::{AppSettings, Arg, ArgMatches, Command};
use expsession::api::{user_agent, Config, ExpFactory, MemoryStore, SyncService};
use expsession::commands::{parse_viewport, Play, Record, Show, Upload};
use expsession::session::{Result, SessionContext, SessionFacade};
use fern::colors::ColoredLevelConfig;
use log::{error, trace};
use uuid::Uuid;

fn setup_logger(level: log::LevelFilter) -> std::result::Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new();

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{}] {}",
                colors.color(record.level()),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn sync_service(m: &ArgMatches) -> Result<Arc<dyn SyncService>> {
    let mut config = Config::new()?;
    if let Some(host) = m.value_of("host") {
        config.api_host = host.to_owned();
    }
    trace!("using {} ({})", config.api_host, config.location().display());
    Ok(Arc::new(ExpFactory::new(&config)?))
}

fn number_arg(m: &ArgMatches, name: &str) -> u32 {
    match m.value_of(name).map(str::parse::<u32>) {
        Some(Ok(n)) => n,
        Some(Err(err)) => {
            error!("invalid --{}: {}", name, err);
            exit(1);
        }
        None => 0,
    }
}

fn number_value(v: &str) -> std::result::Result<u32, String> {
    v.parse::<u32>()
        .map_err(|_| format!("`{}` is not a non-negative integer", v))
}

fn text_arg(m: &ArgMatches, name: &str) -> String {
    m.value_of(name).unwrap_or_default().to_owned()
}

fn run_record(m: &ArgMatches) -> Result<()> {
    let service: Arc<dyn SyncService> = if m.is_present("offline") {
        Arc::new(MemoryStore::new())
    } else {
        sync_service(m)?
    };

    let session_id = m
        .value_of("session")
        .map(Into::into)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let viewport = m.value_of("viewport").unwrap_or("1024x768");

    let context = SessionContext {
        condition: number_arg(m, "condition"),
        counterbalance: number_arg(m, "counterbalance"),
        assignment_id: text_arg(m, "assignment"),
        worker_id: text_arg(m, "worker"),
        hit_id: text_arg(m, "hit"),
        user_agent: user_agent(),
        viewport: parse_viewport(viewport).unwrap_or_else(|| {
            error!("invalid viewport `{}`, expected WIDTHxHEIGHT", viewport);
            exit(1);
        }),
    };

    let facade = SessionFacade::create(&session_id, service, context)?;
    let mut record = Record::new(
        m.value_of("script").unwrap_or_default().to_owned(),
        m.value_of("output").map(Into::into),
        facade,
    )?;
    record.execute()
}

fn cli() -> Command<'static> {
    let host_arg = Arg::new("host")
        .help("Experiment server, overrides api_host from the config file")
        .long("host")
        .takes_value(true);

    Command::new("ExpSession")
        .setting(AppSettings::DeriveDisplayOrder)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("rec")
                .about("Record a session from a script of trials, answers and events")
                .arg(
                    Arg::new("script")
                        .help("JSON-lines script to replay")
                        .index(1)
                        .required(true),
                )
                .arg(
                    Arg::new("session")
                        .help("Session id, defaults to a new random id")
                        .takes_value(true)
                        .short('s')
                        .long("session"),
                )
                .arg(
                    Arg::new("output")
                        .help("Also save the final record to this file")
                        .takes_value(true)
                        .short('o')
                        .long("output"),
                )
                .arg(
                    Arg::new("viewport")
                        .help("Initial window size as WIDTHxHEIGHT")
                        .takes_value(true)
                        .long("viewport")
                        .default_value("1024x768"),
                )
                .arg(
                    Arg::new("condition")
                        .takes_value(true)
                        .long("condition")
                        .validator(number_value),
                )
                .arg(
                    Arg::new("counterbalance")
                        .takes_value(true)
                        .long("counterbalance")
                        .validator(number_value),
                )
                .arg(Arg::new("worker").takes_value(true).long("worker"))
                .arg(Arg::new("assignment").takes_value(true).long("assignment"))
                .arg(Arg::new("hit").takes_value(true).long("hit"))
                .arg(
                    Arg::new("offline")
                        .help("Keep the record in memory instead of syncing it")
                        .takes_value(false)
                        .long("offline"),
                )
                .arg(host_arg.clone()),
        )
        .subcommand(
            Command::new("show")
                .about("Print the stored record of a session")
                .arg(
                    Arg::new("session")
                        .help("The session id")
                        .index(1)
                        .required(true),
                )
                .arg(host_arg.clone()),
        )
        .subcommand(
            Command::new("play")
                .about("Replay the events of a saved record")
                .arg(
                    Arg::new("file")
                        .help("The record file")
                        .index(1)
                        .required(true),
                )
                .arg(
                    Arg::new("speed")
                        .help("Playback speed factor, 0 prints without waiting")
                        .takes_value(true)
                        .long("speed")
                        .default_value("1"),
                ),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload a saved record to the experiment server")
                .arg(
                    Arg::new("file")
                        .help("The file to be uploaded")
                        .index(1)
                        .required(true),
                )
                .arg(
                    Arg::new("finished")
                        .help("Mark the session as finished")
                        .takes_value(false)
                        .long("finished"),
                )
                .arg(host_arg),
        )
        .arg(
            Arg::new("log-level")
                .help("can be one of [error|warn|info|debug|trace]")
                .short('l')
                .long("log-level")
                .default_value("error")
                .default_missing_value("trace")
                .global(true)
                .takes_value(true),
        )
}

fn main() {
    let m = cli().get_matches();

    let level = match m.value_of("log-level") {
        Some("warn") => log::LevelFilter::Warn,
        Some("info") => log::LevelFilter::Info,
        Some("debug") => log::LevelFilter::Debug,
        Some("trace") => log::LevelFilter::Trace,
        _ => log::LevelFilter::Error,
    };
    if let Err(err) = setup_logger(level) {
        eprintln!("failed to set up logging: {}", err);
    }

    trace!("ExpSession running");

    let result = match m.subcommand() {
        Some(("rec", rec_matches)) => run_record(rec_matches),
        Some(("show", show_matches)) => sync_service(show_matches).and_then(|service| {
            let session = show_matches.value_of("session").unwrap_or_default();
            Show::new(service, session.to_owned()).execute()
        }),
        Some(("play", play_matches)) => {
            let speed = play_matches
                .value_of("speed")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0);
            Play::new(play_matches.value_of("file").unwrap_or_default(), speed)
                .and_then(|play| play.execute())
        }
        Some(("upload", upload_matches)) => sync_service(upload_matches).and_then(|service| {
            Upload::new(
                service,
                upload_matches.value_of("file").unwrap_or_default(),
                upload_matches.is_present("finished"),
            )?
            .execute()
        }),
        _ => unreachable!(),
    };

    if let Err(err) = result {
        error!("{}", err);
        exit(1);
    }
}
