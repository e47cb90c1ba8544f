//! Logger setup: `env_logger` on stderr, optionally teed into a run log file.

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
};

/// Name of the run log written into a batch output folder.
pub const LOG_FILE_NAME: &str = "amplicon_analysis_log.log";

pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Default filter for a `-v` count.
pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Open (truncate) a log file behind a lock so worker lines never
/// interleave.
pub fn open_log_file(path: &Path) -> Result<SharedWriter> {
    let file = File::create(path).with_context(|| format!("Failed to create log file {:?}", path))?;
    let writer: Box<dyn Write + Send> = Box::new(file);
    Ok(Arc::new(Mutex::new(writer)))
}

/// Copies every write to the console and to a shared file.
pub struct TeeWriter {
    console: Box<dyn Write + Send>,
    file: SharedWriter,
}

impl TeeWriter {
    pub fn new(console: Box<dyn Write + Send>, file: SharedWriter) -> Self {
        Self { console, file }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.flush()
    }
}

/// Install the global logger. `RUST_LOG` overrides the `-v` level.
pub fn init(verbose: u8, log_file: Option<SharedWriter>) {
    let level = level_for(verbose);
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    if let Some(file) = log_file {
        builder.target(Target::Pipe(Box::new(TeeWriter::new(
            Box::new(io::stderr()),
            file,
        ))));
    }
    builder.init();
    log::info!("Logging set to {}", level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0), "warn");
        assert_eq!(level_for(1), "info");
        assert_eq!(level_for(2), "debug");
        assert_eq!(level_for(9), "trace");
    }

    #[test]
    fn test_tee_writes_both_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let file = open_log_file(&path).unwrap();

        let mut tee = TeeWriter::new(Box::new(io::sink()), file.clone());
        writeln!(tee, "[INFO] gene rpoB done").unwrap();
        tee.flush().unwrap();
        drop(tee);
        drop(file);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[INFO] gene rpoB done\n");
    }
}
