// HTTP transport backed by attohttpc
// Certificate verification stays on; redirects are never followed

use super::traits::{HttpResponse, Transport, TransportError};
use attohttpc::header::{CONTENT_TYPE, USER_AGENT};
use std::io;
use std::time::Duration;

const USER_AGENT_VALUE: &str = concat!("lastfm-relay/", env!("CARGO_PKG_VERSION"));
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpTransport {
    connect_timeout: Duration,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Self {
        Self {
            connect_timeout,
            timeout,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(15))
    }
}

impl Transport for HttpTransport {
    fn post_form(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let response = attohttpc::post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .follow_redirects(false)
            .text(body.to_string())
            .send()
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = match response.text() {
            Ok(text) => text,
            Err(e) => {
                log::debug!("Failed to read response body (HTTP {}): {}", status, e);
                String::new()
            }
        };

        Ok(HttpResponse { status, body })
    }

    fn probe(&self, url: &str) -> bool {
        attohttpc::head(url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .follow_redirects(false)
            .send()
            .is_ok()
    }
}

/// Map an attohttpc failure onto the offline taxonomy
fn classify(error: attohttpc::Error) -> TransportError {
    match error.kind() {
        attohttpc::ErrorKind::Io(io_error) => match io_error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => TransportError::Connect(io_error.to_string()),
            _ if io_error.to_string().contains("lookup") => {
                TransportError::Resolve(io_error.to_string())
            }
            _ => TransportError::Other(io_error.to_string()),
        },
        _ => TransportError::Other(error.to_string()),
    }
}
