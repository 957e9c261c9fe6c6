use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DEFAULT_INTERVAL_MS: u64 = 10;

/// Messages handled by the main loop.
#[derive(Debug, PartialEq, Eq)]
pub enum AppOp {
    Command(String),
    Pump,
    Quit,
}

enum PumpControl {
    Start(u64),
    Stop,
    Quit,
}

/// Periodic refresh. Only ever sends `AppOp::Pump`; all state changes stay
/// on the main loop.
pub struct Pump {
    control: Sender<PumpControl>,
    running: bool,
    handle: Option<JoinHandle<()>>,
}

impl Pump {
    pub fn spawn(main: Sender<AppOp>) -> Self {
        let (control, rx) = mpsc::channel();
        let handle = thread::spawn(move || pump_thread(rx, main));
        Self { control, running: false, handle: Some(handle) }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self, interval_ms: u64) {
        if !self.running {
            self.running = true;
            self.control.send(PumpControl::Start(interval_ms)).ok();
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.control.send(PumpControl::Stop).ok();
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.control.send(PumpControl::Quit).ok();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("pump thread panicked");
            }
        }
    }
}

fn pump_thread(control: Receiver<PumpControl>, main: Sender<AppOp>) {
    let mut running = false;
    let mut interval_ms = DEFAULT_INTERVAL_MS;

    loop {
        if running {
            thread::sleep(Duration::from_millis(interval_ms));
            if main.send(AppOp::Pump).is_err() {
                break;
            }
        }

        // Non-blocking when running, blocking when stopped
        let msg = if running {
            match control.try_recv() {
                Ok(msg) => Some(msg),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match control.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            }
        };

        match msg {
            Some(PumpControl::Start(ms)) => {
                interval_ms = if ms == 0 { DEFAULT_INTERVAL_MS } else { ms };
                running = true;
            }
            Some(PumpControl::Stop) => running = false,
            Some(PumpControl::Quit) => break,
            None => {}
        }
    }
}
