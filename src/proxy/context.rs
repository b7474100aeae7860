use std::time::Instant;

/// Per-request state carried between proxy phases.
pub struct ProxyContext {
    pub client_ip: String,
    pub fingerprint: Option<String>,
    /// Set once the request passes every security stage.
    pub admitted: bool,
    pub started: Instant,
}

impl ProxyContext {
    pub fn new() -> Self {
        Self {
            client_ip: String::new(),
            fingerprint: None,
            admitted: false,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ProxyContext {
    fn default() -> Self {
        Self::new()
    }
}
