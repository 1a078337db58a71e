use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{LevelFilter, Log, Metadata, Record};

/// Logger writing every record both to a log file and to the terminal.
#[derive(Clone)]
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
    terminal: Arc<Mutex<io::Stderr>>,
    level: LevelFilter,
}

impl Logger {
    pub fn new(file_path: Option<&Path>, level: LevelFilter) -> io::Result<Self> {
        let file = match file_path {
            Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
            None => None,
        };
        Ok(Logger {
            file,
            terminal: Arc::new(Mutex::new(io::stderr())),
            level,
        })
    }

    /// Install as the global logger. Fails if another logger is already installed.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] {}: {}\n", record.level(), record.target(), record.args());
        // A failing sink must not abort the program under test.
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(line.as_bytes());
            }
        }
        if let Ok(mut terminal) = self.terminal.lock() {
            let _ = terminal.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        if let Ok(mut terminal) = self.terminal.lock() {
            let _ = terminal.flush();
        }
    }
}
