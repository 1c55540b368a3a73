//! Hostname detection for stack records.

use std::env;
use tracing::warn;

/// Value used when no hostname can be determined.
pub const FALLBACK_HOSTNAME: &str = "localhost";

/// Resolve the hostname reported on stack records.
///
/// Tries the `HOSTNAME` environment variable, then the system hostname,
/// then falls back to [`FALLBACK_HOSTNAME`].
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    #[cfg(unix)]
    {
        match nix::unistd::gethostname() {
            Ok(hostname) => {
                if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                    return hostname.to_string();
                }
            }
            Err(e) => warn!("failed to get system hostname: {}", e),
        }
    }

    warn!("could not determine hostname, using '{}'", FALLBACK_HOSTNAME);
    FALLBACK_HOSTNAME.to_string()
}
