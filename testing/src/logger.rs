//! Logger that accumulates formatted records in a vector buffer, so that tests can take them
//! out and assert on them.
//!
//! # Examples
//!
//! Initializing more than once is a no-op, so every test can call [`LoggerBuilder::init`].
//! ```
//! # use testing::logger;
//! # fn main() -> anyhow::Result<()> {
//! logger::LoggerBuilder::default()
//!     .level(log::LevelFilter::Info)
//!     .init()?;
//! log::info!("started");
//! log::debug!("not recorded");
//! assert_eq!(logger::clear()?, vec![String::from("[INFO]  started")]);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use log::LevelFilter;

lazy_static::lazy_static! {
    static ref LOG_BUFFER: Arc<RwLock<Vec<String>>> = Arc::new(RwLock::new(Vec::new()));
    static ref BUFFER_INITIALIZED: Arc<RwLock<bool>> = Arc::new(RwLock::new(false));
}

/// Builds the buffering logger.
pub struct LoggerBuilder {
    level: LevelFilter,
    target: Option<String>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self {
            level: LevelFilter::Warn,
            target: None,
        }
    }
}

impl LoggerBuilder {
    /// Sets the level filter.
    #[must_use]
    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Records only messages whose target starts with `target`, e.g., a crate name.
    #[must_use]
    pub fn target<S: Into<String>>(mut self, target: S) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Installs the logger, unless already installed.
    ///
    /// # Errors
    ///
    /// Fails if another logger has been installed.
    pub fn init(self) -> anyhow::Result<()> {
        let mut initialized = BUFFER_INITIALIZED
            .write()
            .map_err(|err| anyhow!("{:?}", err))?;
        if !*initialized {
            let buffer = Arc::clone(&LOG_BUFFER);
            let mut dispatch = fern::Dispatch::new()
                .level(self.level)
                .chain(fern::Output::call(move |record| {
                    if let Ok(mut buffer) = buffer.write() {
                        buffer.push(format!(
                            "{:7} {}",
                            format!("[{}]", record.level()),
                            record.args()
                        ));
                    }
                }));
            if let Some(target) = self.target {
                dispatch = dispatch.filter(move |metadata| metadata.target().starts_with(&target));
            }
            dispatch.apply()?;
            *initialized = true;
        }
        Ok(())
    }
}

/// Clears the buffer and returns its contents.
///
/// # Errors
///
/// Fails if the buffer lock is poisoned.
pub fn clear() -> anyhow::Result<Vec<String>> {
    let mut buffer = LOG_BUFFER.write().map_err(|err| anyhow!("{:?}", err))?;
    Ok(buffer.drain(..).collect())
}
