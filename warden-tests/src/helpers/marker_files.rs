//! Process execution verification using marker files

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Helper for verifying what spawned services did, via marker files
#[derive(Clone)]
pub struct MarkerFileHelper {
    base_dir: PathBuf,
}

impl MarkerFileHelper {
    /// Create a new marker file helper with the given base directory
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Get the path to a marker file
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.marker", name))
    }

    /// Shell snippet appending one line to a marker file
    pub fn append_line_script(&self, name: &str) -> String {
        format!("echo run >> {}", self.marker_path(name).display())
    }

    /// Shell snippet touching a marker file
    pub fn touch_script(&self, name: &str) -> String {
        format!("touch {}", self.marker_path(name).display())
    }

    /// Check if a marker file exists
    pub fn marker_exists(&self, name: &str) -> bool {
        self.marker_path(name).exists()
    }

    /// Wait for a marker file to appear
    pub async fn wait_for_marker(&self, name: &str, timeout: Duration) -> bool {
        let marker_path = self.marker_path(name);
        let start = Instant::now();

        while start.elapsed() < timeout {
            if marker_path.exists() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }

    /// Wait for a marker file to have content and return it
    pub async fn wait_for_marker_content(&self, name: &str, timeout: Duration) -> Option<String> {
        let marker_path = self.marker_path(name);
        let start = Instant::now();

        while start.elapsed() < timeout {
            if let Ok(content) = std::fs::read_to_string(&marker_path)
                && !content.is_empty()
            {
                return Some(content);
            }
            sleep(Duration::from_millis(50)).await;
        }

        None
    }

    /// Count the number of lines in a marker file (how many times a service ran)
    pub fn count_marker_lines(&self, name: &str) -> usize {
        std::fs::read_to_string(self.marker_path(name))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Lines of a marker file, empty if it does not exist
    pub fn read_lines(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.marker_path(name))
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Wait until the marker file has at least the specified number of lines
    pub async fn wait_for_marker_lines(
        &self,
        name: &str,
        expected_lines: usize,
        timeout: Duration,
    ) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.count_marker_lines(name) >= expected_lines {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }
}
