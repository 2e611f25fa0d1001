use std::path::PathBuf;

const APP_DIR: &str = "shoutrip";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/shoutrip/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(not(unix))]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }
    #[cfg(not(unix))]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// Where recordings land when neither the config nor the command line
/// names a destination.
pub fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn log_file() -> PathBuf {
    data_dir().join("shoutrip.log")
}
