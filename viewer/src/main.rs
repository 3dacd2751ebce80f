use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::{App, Arg, ArgMatches, SubCommand};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use spark_replays::analyzer::Analyzer;
use spark_replays::analyzer::cycle_dump::CycleDumpBuilder;
use spark_replays::analyzer::play_mode_log::PlayModeLoggerBuilder;
use spark_replays::analyzer::survey::{SurveyBuilder, SurveyEvent, SurveyStats};
use spark_replays::logfile::LogReader;
use spark_replays::playback::PlaybackState;

use spark_viewer::{Session, TextTarget, ViewerConfig};

const DEFAULT_CONFIG: &str = "spark_viewer.toml";
/// Update rate of the live and playback loops.
const TICK: Duration = Duration::from_millis(40);

fn load_config(path: Option<&str>) -> anyhow::Result<ViewerConfig> {
    let path = match path {
        Some(path) => Path::new(path),
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => return Ok(ViewerConfig::default()),
    };
    ViewerConfig::load(path).map_err(|e| anyhow!("{e}"))
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    matches
        .value_of(name)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| anyhow!("invalid value {v:?} for {name}: {e}"))
        })
        .transpose()
}

fn run_live(config: ViewerConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let duration = parse_arg::<f32>(matches, "DURATION")?.map(Duration::from_secs_f32);
    let mut session = Session::live(config);
    let mut target = TextTarget::new(std::io::stdout());

    let started = Instant::now();
    let mut last_print = Instant::now();
    let mut last_tick = Instant::now();
    while duration.is_none_or(|d| started.elapsed() < d) {
        let now = Instant::now();
        session.update(now - last_tick)?;
        last_tick = now;
        if now - last_print >= Duration::from_secs(1) {
            session.snapshot().render(&mut target);
            if let Some(e) = target.take_error() {
                return Err(e).context("Failed to write frame");
            }
            last_print = now;
        }
        thread::sleep(TICK);
    }
    Ok(())
}

fn run_play(config: ViewerConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let log = matches.value_of("LOG").context("missing log path")?;
    let speed = parse_arg::<f32>(matches, "SPEED")?.unwrap_or(1.0);
    let max_frames = parse_arg::<usize>(matches, "FRAMES")?;
    let start = parse_arg::<usize>(matches, "START")?;
    let realtime = matches.is_present("REALTIME");

    let mut session = Session::log(config, Path::new(log))?;
    let mut target = TextTarget::new(std::io::stdout());
    {
        let player = session.player_mut().context("not in log mode")?;
        if let Some(start) = start {
            player.seek(start)?;
        }
        player.set_speed(speed);
        player.play()?;
    }

    let mut printed = 0;
    let mut last_frame = None;
    loop {
        let (state, frame) = match session.player() {
            Some(player) => (player.state(), player.frame()),
            None => break,
        };
        if frame != last_frame {
            session.snapshot().render(&mut target);
            if let Some(e) = target.take_error() {
                return Err(e).context("Failed to write frame");
            }
            last_frame = frame;
            printed += 1;
        }
        if state != PlaybackState::Playing || max_frames.is_some_and(|max| printed >= max) {
            break;
        }
        if realtime {
            thread::sleep(TICK);
        }
        session.update(TICK)?;
    }
    Ok(())
}

fn run_survey(matches: &ArgMatches) -> anyhow::Result<()> {
    let log = matches.value_of("LOG").context("missing log path")?;
    let mut reader = LogReader::open(Path::new(log))?;

    let stats = Arc::new(Mutex::new(SurveyStats::new()));
    let (tx, rx) = mpsc::channel();
    let mut analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(
        SurveyBuilder::new(stats.clone()).events(tx).build(),
    )];
    if matches.is_present("PLAY_MODES") {
        analyzers.push(PlayModeLoggerBuilder::new().build());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    while let Some(record) = reader.next_record()? {
        for analyzer in analyzers.iter_mut() {
            analyzer.process(&record);
        }
        for event in rx.try_iter() {
            match event {
                SurveyEvent::Progress(frames) => spinner.set_message(format!("{frames} frames")),
                SurveyEvent::Goal(goal) => spinner.println(format!(
                    "goal for {} at frame {} ({})",
                    goal.side, goal.frame, goal.time
                )),
                SurveyEvent::StepSize { .. } | SurveyEvent::Finished { .. } => {}
            }
        }
    }
    for analyzer in analyzers.iter_mut() {
        analyzer.finish();
    }
    spinner.finish_and_clear();

    let stats = stats.lock().clone();
    let name = |i: usize| stats.team_names[i].as_deref().unwrap_or("-").to_string();
    println!("frames:    {}", stats.total_frames);
    match stats.step_size {
        Some(step) => println!("step size: {step}s"),
        None => println!("step size: unknown"),
    }
    println!("draw data: {}", stats.has_draw_commands);
    println!("malformed: {}", stats.malformed_frames);
    println!(
        "result:    {} {}:{} {}",
        name(0),
        stats.final_score[0],
        stats.final_score[1],
        name(1)
    );
    for goal in stats.goals.goals() {
        println!("goal:      frame {} {} {}", goal.frame, goal.time, goal.side);
    }
    Ok(())
}

fn run_dump(matches: &ArgMatches) -> anyhow::Result<()> {
    let log = matches.value_of("LOG").context("missing log path")?;
    let mut reader = LogReader::open(Path::new(log))?;
    let mut builder = CycleDumpBuilder::new();
    if matches.is_present("GAME_STATE_ONLY") {
        builder = builder.game_state_only();
    }
    let mut dump = builder.build();
    while let Some(record) = reader.next_record()? {
        dump.process(&record);
    }
    dump.finish();
    Ok(())
}

fn log_arg() -> Arg<'static, 'static> {
    Arg::with_name("LOG")
        .help("The log file to read (raw, .gz, .bz2, .tar, .tar.gz, .tar.bz2 or .zip)")
        .required(true)
        .index(1)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let matches = App::new("Spark Viewer")
        .about("Watches SimSpark soccer matches live or from recorded logs")
        .arg(
            Arg::with_name("CONFIG")
                .help("Path to a TOML config file (default: spark_viewer.toml if present)")
                .long("config")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("DUMP_CONFIG")
                .help("Print the default config file and exit")
                .long("dump-config"),
        )
        .subcommand(
            SubCommand::with_name("live")
                .about("Connects to a running simulator")
                .arg(
                    Arg::with_name("HOST")
                        .help("Monitor host")
                        .long("host")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("PORT")
                        .help("Monitor port")
                        .long("port")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("DRAW_PORT")
                        .help("UDP port for drawing commands")
                        .long("draw-port")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("NO_AUTO_CONNECT")
                        .help("Do not reconnect after the connection is lost")
                        .long("no-auto-connect"),
                )
                .arg(
                    Arg::with_name("RECORD")
                        .help("Record the session to a log file")
                        .long("record"),
                )
                .arg(
                    Arg::with_name("LOG_DIR")
                        .help("Directory for recorded logs")
                        .long("log-dir")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("DURATION")
                        .help("Stop after this many seconds")
                        .long("duration")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("play")
                .about("Plays a recorded log, printing one line per frame")
                .arg(log_arg())
                .arg(
                    Arg::with_name("SPEED")
                        .help("Playback speed; negative plays backwards")
                        .long("speed")
                        .takes_value(true)
                        .allow_hyphen_values(true),
                )
                .arg(
                    Arg::with_name("START")
                        .help("Frame to start from")
                        .long("start")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("FRAMES")
                        .help("Stop after printing this many frames")
                        .long("frames")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("REALTIME")
                        .help("Pace playback with the wall clock")
                        .long("realtime"),
                ),
        )
        .subcommand(
            SubCommand::with_name("survey")
                .about("Reports frame count, step size, score and goals of a log")
                .arg(log_arg())
                .arg(
                    Arg::with_name("PLAY_MODES")
                        .help("Also print every play mode change and foul")
                        .long("play-modes"),
                ),
        )
        .subcommand(
            SubCommand::with_name("dump")
                .about("Dumps every cycle of a log as JSON lines")
                .arg(log_arg())
                .arg(
                    Arg::with_name("GAME_STATE_ONLY")
                        .help("Only dump game state fields")
                        .long("game-state-only"),
                ),
        )
        .get_matches();

    if matches.is_present("DUMP_CONFIG") {
        print!("{}", ViewerConfig::generate_default_toml());
        return Ok(());
    }

    match matches.subcommand() {
        ("live", Some(sub)) => {
            let mut config = load_config(sub.value_of("CONFIG"))?;
            config.apply_cli_overrides(sub);
            run_live(config, sub)
        }
        ("play", Some(sub)) => {
            let config = load_config(sub.value_of("CONFIG"))?;
            run_play(config, sub)
        }
        ("survey", Some(sub)) => run_survey(sub),
        ("dump", Some(sub)) => run_dump(sub),
        _ => Err(anyhow!("no command given, see --help")),
    }
}
