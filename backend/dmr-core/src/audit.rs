// src/audit.rs

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

enum Target {
    Disabled,
    File { path: PathBuf, writer: BufWriter<File> },
    Memory(Vec<String>),
}

/// Plain-text debug log (DebugLogs.txt) written only when a run is in debug mode.
/// Write failures are logged and otherwise ignored so they never abort a report.
pub struct DebugLog {
    target: Target,
}

impl DebugLog {
    pub fn disabled() -> Self {
        DebugLog {
            target: Target::Disabled,
        }
    }

    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        debug!("Debug log opened at {}", path.display());
        Ok(DebugLog {
            target: Target::File {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
            },
        })
    }

    /// Collects sections in memory; used by tests and by callers that post-process the log.
    pub fn in_memory() -> Self {
        DebugLog {
            target: Target::Memory(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.target, Target::Disabled)
    }

    pub fn write_section(&mut self, title: &str, body: &str) {
        let block = format!("\n{}\n{}\n{}\n", title, "=".repeat(title.len()), body);
        match &mut self.target {
            Target::Disabled => {}
            Target::Memory(sections) => sections.push(block),
            Target::File { path, writer } => {
                if let Err(e) = writer.write_all(block.as_bytes()) {
                    warn!("Failed writing debug log {}: {}", path.display(), e);
                }
            }
        }
    }

    pub fn captured(&self) -> &[String] {
        match &self.target {
            Target::Memory(sections) => sections,
            _ => &[],
        }
    }

    pub fn flush(&mut self) {
        if let Target::File { path, writer } = &mut self.target {
            if let Err(e) = writer.flush() {
                warn!("Failed flushing debug log {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for DebugLog {
    fn drop(&mut self) {
        self.flush();
    }
}
