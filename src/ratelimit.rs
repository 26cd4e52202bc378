use rand::Rng;
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

/// Minimum spacing between requests to the same domain, with random jitter.
///
/// Not a token bucket: there is no burst allowance, only a floor on the gap
/// since the previous request. The first request to a domain never waits.
/// The map has no locking; callers use one limiter from a single thread.
#[derive(Debug)]
pub struct DomainRateLimiter {
    min_interval: Duration,
    jitter: Duration,
    last_request: HashMap<String, Instant>,
}

impl DomainRateLimiter {
    pub fn new(min_interval: Duration, jitter: Duration) -> Self {
        Self {
            min_interval,
            jitter,
            last_request: HashMap::new(),
        }
    }

    /// Block until the domain of `url` may be hit again, then record the hit.
    pub fn wait(&mut self, url: &str) {
        let domain = domain_key(url);

        if let Some(last) = self.last_request.get(&domain) {
            let spread = rand::thread_rng().gen_range(0.0..=1.0);
            let target = self.min_interval + self.jitter.mul_f64(spread);
            let elapsed = last.elapsed();
            if elapsed < target {
                let pause = target - elapsed;
                tracing::debug!(
                    domain = %domain,
                    pause_ms = pause.as_millis() as u64,
                    "Rate limiting"
                );
                thread::sleep(pause);
            }
        }

        self.last_request.insert(domain, Instant::now());
    }
}

impl Default for DomainRateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(1200), Duration::from_millis(400))
    }
}

/// Host plus explicit port, lowercased. Unparseable input is its own key.
fn domain_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_lowercase();
            match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            }
        }
        Err(_) => url.trim().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_to_domain_does_not_block() {
        let mut limiter = DomainRateLimiter::new(Duration::from_secs(5), Duration::ZERO);
        let start = Instant::now();
        limiter.wait("https://acme.gupy.io/jobs/1");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_second_request_waits_min_interval() {
        let interval = Duration::from_millis(80);
        let mut limiter = DomainRateLimiter::new(interval, Duration::from_millis(20));
        limiter.wait("https://acme.gupy.io/jobs/1");
        let start = Instant::now();
        limiter.wait("https://acme.gupy.io/jobs/2");
        assert!(start.elapsed() >= interval);
    }

    #[test]
    fn test_domains_are_tracked_independently() {
        let mut limiter = DomainRateLimiter::new(Duration::from_secs(5), Duration::ZERO);
        limiter.wait("https://acme.gupy.io/jobs/1");
        let start = Instant::now();
        limiter.wait("https://www.linkedin.com/jobs/view/1");
        limiter.wait("https://r.jina.ai/https://acme.gupy.io/jobs/1");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_domain_key_includes_port() {
        assert_eq!(domain_key("http://LOCALHOST:8080/x"), "localhost:8080");
        assert_eq!(domain_key("https://acme.gupy.io/jobs/1"), "acme.gupy.io");
    }
}
