use std::path::PathBuf;

pub trait AppPaths: Send + Sync {
    fn work_dir(&self) -> PathBuf;
    fn config_dir(&self) -> PathBuf;
    fn bin_dir(&self) -> Option<PathBuf>;
}

pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn work_dir(&self) -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("relayget").join("work"))
            .unwrap_or_else(|| std::env::temp_dir().join("relayget"))
    }

    fn config_dir(&self) -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("relayget"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("relayget").join("bin"))
    }
}

/// Paths rooted at a single directory, for containers and tests.
pub struct RootedPaths {
    pub root: PathBuf,
}

impl AppPaths for RootedPaths {
    fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        Some(self.root.join("bin"))
    }
}
