mod clock;
mod config;
mod export;
mod pump;
mod stopwatch;
mod storage;
mod ui;

use std::io::BufRead;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::Context;
use clap::Parser;
use timer_core::TimeSource;

use crate::clock::SystemClock;
use crate::config::{AppConfig, Cli};
use crate::export::ExportTarget;
use crate::pump::{AppOp, Pump};
use crate::stopwatch::{CommandResponse, Stopwatch, StopwatchSettings};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::ui::{NullSink, RenderSink, TerminalSink, HELP_TEXT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Toggle,
    Start,
    Stop,
    Lap,
    Reset,
    Export,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Command::Toggle),
            "s" | "start" => Ok(Command::Start),
            "p" | "stop" => Ok(Command::Stop),
            "l" | "lap" => Ok(Command::Lap),
            "r" | "reset" => Ok(Command::Reset),
            "e" | "export" => Ok(Command::Export),
            "status" => Ok(Command::Status),
            "h" | "?" | "help" => Ok(Command::Help),
            "q" | "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("Unknown command '{}', type help for a list", other)),
        }
    }
}

struct App<C, S> {
    stopwatch: Stopwatch<C, S>,
    pump: Pump,
    tick_interval_ms: u64,
    json: bool,
}

impl<C: TimeSource, S: KeyValueStore> App<C, S> {
    fn sync_pump(&mut self) {
        if self.stopwatch.is_running() {
            self.pump.start(self.tick_interval_ms);
        } else {
            self.pump.stop();
        }
    }

    fn respond(&self, response: CommandResponse) {
        if self.json {
            match serde_json::to_string(&response) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("failed to encode response: {}", e),
            }
        }
    }

    fn say(&self, message: String) {
        if self.json {
            self.respond(CommandResponse::message(message));
        } else {
            println!("\r\n{}", message);
        }
    }

    /// Returns false when the loop should end.
    fn handle_command(&mut self, line: &str) -> bool {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(message) => {
                if self.json {
                    self.respond(CommandResponse {
                        success: false,
                        error: Some(message),
                        payload: Default::default(),
                    });
                } else {
                    println!("\r\n{}", message);
                }
                return true;
            }
        };

        let command = match command {
            Command::Toggle if self.stopwatch.is_running() => Command::Stop,
            Command::Toggle => Command::Start,
            other => other,
        };

        let response = match command {
            Command::Start => CommandResponse::from_result(&self.stopwatch.start()),
            Command::Stop => CommandResponse::from_result(&self.stopwatch.stop()),
            Command::Lap => CommandResponse::from_result(&self.stopwatch.lap()),
            Command::Reset => CommandResponse::from_result(&self.stopwatch.reset()),
            Command::Export => {
                let result = self.stopwatch.export_csv();
                if let Ok(exported) = &result {
                    if !self.json {
                        println!("\r\nSaved {}", exported.filename);
                    }
                }
                CommandResponse::from_result(&result)
            }
            Command::Status => {
                if self.json {
                    CommandResponse::from_result(&self.stopwatch.laps().map(|laps| {
                        serde_json::json!({
                            "phase": format!("{:?}", self.stopwatch.phase()),
                            "state": self.stopwatch.state(),
                            "laps": laps,
                        })
                    }))
                } else {
                    self.say(format!("{:?}: {}", self.stopwatch.phase(), self.stopwatch.summary()));
                    return true;
                }
            }
            Command::Help => {
                self.say(HELP_TEXT.to_string());
                return true;
            }
            Command::Quit => return false,
            Command::Toggle => return true,
        };
        self.sync_pump();
        self.respond(response);
        true
    }

    fn run(&mut self, rx: Receiver<AppOp>) {
        self.sync_pump();
        for op in rx {
            match op {
                AppOp::Command(line) => {
                    if !self.handle_command(&line) {
                        break;
                    }
                }
                AppOp::Pump => self.stopwatch.tick(),
                AppOp::Quit => break,
            }
        }
        self.pump.stop();
    }
}

fn init_logging(cli: &Cli) {
    let env = env_logger::Env::default().default_filter_or(cli.log_level.as_str());
    env_logger::Builder::from_env(env).format_timestamp_millis().init();
}

fn run<S: KeyValueStore>(store: S, config: &AppConfig, cli: &Cli) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel();

    let input_tx = tx.clone();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.send(AppOp::Command(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::error!("failed to read input: {}", e);
                    break;
                }
            }
        }
        input_tx.send(AppOp::Quit).ok();
    });

    let settings = StopwatchSettings {
        lap_debounce_ms: config.lap_debounce_ms,
        max_laps: config.max_laps,
        export: ExportTarget {
            dir: config.resolved_export_dir(),
            prefix: config.export_prefix.clone(),
            shape: config.export_shape,
        },
    };
    let sink: Box<dyn RenderSink> =
        if cli.json { Box::new(NullSink) } else { Box::new(TerminalSink::new()) };

    let mut stopwatch = Stopwatch::new(SystemClock, store, settings, sink);
    stopwatch.subscribe(|event| log::debug!("event {}: {:?}", event.name(), event));

    let mut app = App {
        stopwatch,
        pump: Pump::spawn(tx),
        tick_interval_ms: config.tick_interval_ms,
        json: cli.json,
    };
    if !cli.json {
        println!("{}\r\n", HELP_TEXT);
    }
    app.run(rx);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    log::info!("lapwatch PID is {}", std::process::id());

    let config = AppConfig::load(&cli).context("loading configuration")?;
    if cli.no_persist {
        run(MemoryStore::new(), &config, &cli)
    } else {
        let data_dir = config.resolved_data_dir().context("resolving data directory")?;
        log::info!("Session data in {}", data_dir.display());
        run(FileStore::new(data_dir), &config, &cli)
    }
}
