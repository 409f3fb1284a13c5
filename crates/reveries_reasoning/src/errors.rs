//! Classification of external-service failures.
//!
//! Network-class errors (timeouts, refused/reset connections, DNS) get a
//! retry-after-pause in the monologue loop; protocol-class errors (malformed
//! replies) do not.

/// Whether an error looks like a transient network failure.
pub fn is_network_error(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(req_err) = cause.downcast_ref::<reqwest::Error>() {
            if req_err.is_timeout() || req_err.is_connect() || req_err.is_request() {
                return true;
            }
        }
    }
    let text = format!("{:#}", err).to_lowercase();
    ["timed out", "timeout", "connection refused", "connection reset", "dns", "fetch failed", "network"]
        .iter()
        .any(|marker| text.contains(marker))
}
