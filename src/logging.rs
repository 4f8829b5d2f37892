//! Process-wide logging: a size-capped rotating file plus an optional console
//! stream, both formatted and filtered by `env_logger`.

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default filter for the file stream; `RUST_LOG` replaces it.
pub const FILE_FILTER: &str = "info,ureq=warn,ureq_proto=warn,rustls=warn";
pub const CONSOLE_FILTER: &str = "debug";
pub const DEFAULT_MAX_BYTES: u64 = 4096;

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Rotating log file; `None` logs to the console only.
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    /// Adds a debug-level console stream next to the file.
    pub verbose: bool,
}

impl LogConfig {
    pub fn daemon(file: PathBuf, max_bytes: u64, verbose: bool) -> Self {
        LogConfig {
            file: Some(file),
            max_bytes,
            verbose,
        }
    }

    /// Console at info, for one-shot commands.
    pub fn console() -> Self {
        LogConfig {
            file: None,
            max_bytes: DEFAULT_MAX_BYTES,
            verbose: false,
        }
    }

    /// Install the global logger. Call once.
    pub fn init(&self) -> Result<(), String> {
        let file = match &self.file {
            Some(path) => {
                let writer = RotatingFile::open(path, self.max_bytes)
                    .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
                Some(file_logger(writer))
            }
            None => None,
        };
        let console = match (&file, self.verbose) {
            (None, _) => Some(console_logger("info")),
            (Some(_), true) => Some(console_logger(CONSOLE_FILTER)),
            (Some(_), false) => None,
        };

        let logger = DaemonLogger { file, console };
        let max_level = logger.max_level();
        log::set_boxed_logger(Box::new(logger)).map_err(|e| format!("logger already installed: {}", e))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

fn file_logger(writer: RotatingFile) -> env_logger::Logger {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(FILE_FILTER))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .build()
}

fn console_logger(filter: &str) -> env_logger::Logger {
    env_logger::Builder::new()
        .parse_filters(filter)
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .target(env_logger::Target::Stderr)
        .build()
}

/// Fans each record out to the file and console streams.
struct DaemonLogger {
    file: Option<env_logger::Logger>,
    console: Option<env_logger::Logger>,
}

impl DaemonLogger {
    fn streams(&self) -> impl Iterator<Item = &env_logger::Logger> {
        self.file.iter().chain(self.console.iter())
    }

    fn max_level(&self) -> LevelFilter {
        self.streams().map(|l| l.filter()).max().unwrap_or(LevelFilter::Off)
    }
}

impl Log for DaemonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.streams().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        for stream in self.streams() {
            if stream.matches(record) {
                stream.log(record);
            }
        }
    }

    fn flush(&self) {
        for stream in self.streams() {
            stream.flush();
        }
    }
}

/// Log file that moves itself to `<name>.1` once it would grow past
/// `max_bytes`, keeping a single backup.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(RotatingFile {
            path: path.to_path_buf(),
            max_bytes,
            file,
            written,
        })
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        self.file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
