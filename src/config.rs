/// Application-level constants
pub const APP_NAME: &str = "MammoDetect";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var overriding the inference/history service base URL.
pub const API_URL_ENV: &str = "MAMMODETECT_API_URL";

/// Default base URL when the env var is unset (local Flask dev server).
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Base URL of the inference/history service, trailing slash stripped.
pub fn api_base_url() -> String {
    std::env::var(API_URL_ENV)
        .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info,mammodetect_core=debug".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_api_url_is_local() {
        assert_eq!(DEFAULT_API_URL, "http://localhost:5000");
    }

    #[test]
    fn api_base_url_falls_back_to_default() {
        if std::env::var(API_URL_ENV).is_err() {
            assert_eq!(api_base_url(), DEFAULT_API_URL);
        }
    }

    #[test]
    fn default_filter_enables_crate_debug() {
        let filter = default_log_filter();
        assert!(filter.starts_with("info,"));
        assert!(filter.ends_with("=debug"));
    }

    #[test]
    fn app_name_is_mammodetect() {
        assert_eq!(APP_NAME, "MammoDetect");
    }
}
