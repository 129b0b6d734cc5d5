//! Bus configuration

use std::time::Duration;

/// Default pending-frame queue bound
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Default transport receive timeout; bounds how long `stop()` may take
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Bus configuration options
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Transport selector, e.g. "inproc" or "udp://239.255.76.67:7667"
    pub transport_url: String,

    /// Maximum frames held between transport and dispatch
    pub queue_size: usize,

    /// How long one transport receive may block
    pub receive_timeout: Duration,

    /// Name of the internally owned dispatch thread
    pub thread_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport_url: String::new(),
            queue_size: DEFAULT_QUEUE_SIZE,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            thread_name: "zcm-dispatch".to_string(),
        }
    }
}

impl BusConfig {
    /// Create a config for a transport selector
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            transport_url: url.into(),
            ..Default::default()
        }
    }

    /// Set the transport selector
    pub fn transport(mut self, url: impl Into<String>) -> Self {
        self.transport_url = url.into();
        self
    }

    /// Set the queue bound (minimum 1)
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the dispatch thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();

        assert!(config.transport_url.is_empty());
        assert_eq!(config.queue_size, DEFAULT_QUEUE_SIZE);
        assert_eq!(config.receive_timeout, DEFAULT_RECEIVE_TIMEOUT);
        assert_eq!(config.thread_name, "zcm-dispatch");
    }

    #[test]
    fn test_with_url() {
        let config = BusConfig::with_url("inproc://test");
        assert_eq!(config.transport_url, "inproc://test");
        assert_eq!(config.queue_size, DEFAULT_QUEUE_SIZE);
    }

    #[test]
    fn test_builder_queue_size_clamped() {
        let config = BusConfig::default().queue_size(0);
        assert_eq!(config.queue_size, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = BusConfig::default()
            .transport("ipc")
            .queue_size(8)
            .receive_timeout(Duration::from_millis(5))
            .thread_name("bus");

        assert_eq!(config.transport_url, "ipc");
        assert_eq!(config.queue_size, 8);
        assert_eq!(config.receive_timeout, Duration::from_millis(5));
        assert_eq!(config.thread_name, "bus");
    }
}
