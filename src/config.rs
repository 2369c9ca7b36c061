use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Snapcal";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    "info,snapcal=debug".to_string()
}

/// Get the application data directory
/// ~/Snapcal/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Snapcal")
}

/// Get the models directory (ONNX classifier weights + labels)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the food classifier model directory (mobilenet-v2)
pub fn classifier_model_dir() -> PathBuf {
    models_dir().join("mobilenet-v2")
}

/// Path of the analysis-result cache database
pub fn cache_db_path() -> PathBuf {
    app_data_dir().join("analysis_cache.db")
}
