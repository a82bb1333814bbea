use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir().join("settings.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn job_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("jobs")
    }

    pub fn job_log_path(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir().join(format!("{job_id}.jsonl"))
    }

    pub fn default_download_dir(&self) -> PathBuf {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(parent) = exe_path.parent() {
                return parent.join("downloads");
            }
        }
        self.base_dir.join("downloads")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn ffmpeg_dir(&self) -> PathBuf {
        self.tools_dir().join("ffmpeg")
    }

    pub fn ffmpeg_bin_path(&self) -> PathBuf {
        with_exe_suffix(self.ffmpeg_dir().join("ffmpeg"))
    }

    pub fn ytdlp_bin_path(&self) -> PathBuf {
        with_exe_suffix(self.tools_dir().join("yt-dlp").join("yt-dlp"))
    }

    /// Bundled ffmpeg when installed, otherwise whatever `ffmpeg` is on PATH.
    pub fn ffmpeg_cmd(&self) -> PathBuf {
        let path = self.ffmpeg_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffmpeg")
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.job_logs_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }

    /// Per-user data directory, used when no base dir is given explicitly.
    pub fn default_base_dir() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("MUDL_BASE_DIR") {
            if !dir.is_empty() {
                return Some(PathBuf::from(dir));
            }
        }
        if cfg!(windows) {
            std::env::var_os("APPDATA").map(|d| Path::new(&d).join("mudl"))
        } else if cfg!(target_os = "macos") {
            std::env::var_os("HOME")
                .map(|h| Path::new(&h).join("Library/Application Support/mudl"))
        } else if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
            Some(Path::new(&xdg).join("mudl"))
        } else {
            std::env::var_os("HOME").map(|h| Path::new(&h).join(".local/share/mudl"))
        }
    }
}

fn with_exe_suffix(mut path: PathBuf) -> PathBuf {
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}
