//! Temp-dir staging environment

use cli_lib::{Orchestrator, Settings};
use snapshot::SnapshotProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::FakeProvider;

/// A config file, queue directory and state directory under one temp dir
pub struct StagingFixture {
    pub dir: TempDir,
    pub provider: Arc<FakeProvider>,
    config_path: PathBuf,
}

impl StagingFixture {
    /// Fixture with volumes `C:` and `D:` and the given extra `[settings]` lines
    pub fn new(extra_settings: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("queues")).unwrap();

        let config = format!(
            r#"
[settings]
state_dir = "state"
max_parallel_volumes = 2
{extra}

[rsync]
conf_path = '{root}/etc/rsyncd.conf'

[volumes."C:"]
output_to_file = '{root}/queues/C.txt'
log_to_file = '{root}/logs/C'

[volumes."D:"]
output_to_file = '{root}/queues/D.txt'
"#,
            extra = extra_settings,
            root = dir.path().display()
        );

        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, config).unwrap();

        Self {
            dir,
            provider: Arc::new(FakeProvider::new()),
            config_path,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn settings(&self) -> Settings {
        Settings::load(&self.config_path).unwrap()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let provider: Arc<dyn SnapshotProvider> = self.provider.clone();
        Orchestrator::new(Arc::new(self.settings()), provider)
    }

    /// Append journal lines for a volume letter (`C`, `D`)
    pub fn journal(&self, letter: &str, lines: &[&str]) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.queue_path(letter, "txt"))
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    pub fn queue_path(&self, letter: &str, ext: &str) -> PathBuf {
        self.root().join("queues").join(format!("{}.{}", letter, ext))
    }

    pub fn filter_path(&self, letter: &str) -> PathBuf {
        self.root().join("queues").join(letter)
    }

    pub fn filter(&self, letter: &str) -> String {
        std::fs::read_to_string(self.filter_path(letter)).unwrap()
    }

    pub fn rsyncd_conf(&self) -> String {
        std::fs::read_to_string(self.root().join("etc/rsyncd.conf")).unwrap()
    }
}
