use std::fs::{File, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

/// Timestamped enrichment log kept next to the dataset.
///
/// Write failures are reported through tracing and otherwise ignored.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: Utf8PathBuf,
}

impl RunLog {
    /// Truncates any previous log and writes the opening line.
    pub fn start(path: &Utf8Path, message: &str) -> Self {
        if let Err(err) = File::create(path.as_std_path()) {
            tracing::warn!(path = %path, error = %err, "unable to create run log");
        }
        let log = Self {
            path: path.to_path_buf(),
        };
        log.line(message);
        log
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn line(&self, message: &str) {
        tracing::info!("{message}");
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .and_then(|mut file| writeln!(file, "[{stamp}] {message}"));
        if let Err(err) = result {
            tracing::warn!(path = %self.path, error = %err, "unable to append to run log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_timestamped() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("run.log")).unwrap();
        let log = RunLog::start(&path, "start");
        log.line("second");
        let content = std::fs::read_to_string(path.as_std_path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('[') && lines[0].ends_with("] start"));
        assert_eq!(&lines[1][21..], " second");
    }
}
