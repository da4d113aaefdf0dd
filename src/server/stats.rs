use std::{
    fmt,
    time::{Duration, Instant},
};

/// Request counter and start time of the current run.
///
/// Both are reset by every successful [`start`](crate::Server::start).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    requests: u64,
    started: Option<Instant>,
}

impl Statistics {
    pub(crate) fn restart(&mut self) {
        self.requests = 0;
        self.started = Some(Instant::now());
    }

    #[inline]
    pub(crate) fn record_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    /// Requests seen since the last start.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// When the server last started; `None` if it never did.
    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    /// Time since the last start.
    pub fn uptime(&self) -> Duration {
        self.started.map(|at| at.elapsed()).unwrap_or_default()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.uptime().as_secs();
        writeln!(f, "Server statistics")?;
        writeln!(f, "  requests: {}", self.requests)?;
        write!(
            f,
            "  uptime:   {}h {:02}m {:02}s",
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_resets_the_window() {
        let mut stats = Statistics::default();
        assert_eq!(stats.started(), None);
        assert_eq!(stats.uptime(), Duration::ZERO);

        stats.restart();
        stats.record_request();
        stats.record_request();
        assert_eq!(stats.requests(), 2);
        let first = stats.started().unwrap();

        stats.restart();
        assert_eq!(stats.requests(), 0);
        assert!(stats.started().unwrap() >= first);
    }

    #[test]
    fn display() {
        let mut stats = Statistics::default();
        stats.restart();
        stats.record_request();

        let text = stats.to_string();
        assert!(text.contains("requests: 1"), "{text}");
        assert!(text.contains("uptime:   0h 00m 00s"), "{text}");
    }
}
