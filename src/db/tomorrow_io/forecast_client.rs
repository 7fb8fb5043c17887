use std::time::Duration;

use crate::error::ImportError;

/// Anything that can return the raw forecast body for a request URL.
pub trait ForecastSource {
    fn fetch(&self, url: &str) -> Result<String, ImportError>;
}

/// Blocking HTTP client for the Tomorrow.io API.
/// See https://docs.tomorrow.io/reference/weather-forecast
pub struct TomorrowIoClient {
    client: reqwest::blocking::Client,
}

impl TomorrowIoClient {
    pub fn new(timeout: Duration) -> Result<TomorrowIoClient, ImportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(TomorrowIoClient { client })
    }
}

impl ForecastSource for TomorrowIoClient {
    /// Any transport error or non-2xx status is a failure.  The body is
    /// returned byte for byte, whatever charset the response announces.
    fn fetch(&self, url: &str) -> Result<String, ImportError> {
        let to_error = |e: reqwest::Error| ImportError::Fetch {
            url: redact_apikey(url),
            source: Box::new(e),
        };
        let body = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(to_error)?;
        decode_body(url, body.to_vec())
    }
}

/// The payload is stored as text, so a body that is not UTF-8 is rejected
/// rather than patched with replacement characters.
pub fn decode_body(url: &str, body: Vec<u8>) -> Result<String, ImportError> {
    String::from_utf8(body).map_err(|e| ImportError::Fetch {
        url: redact_apikey(url),
        source: Box::new(e),
    })
}

/// Hide the value of the `apikey` query parameter so urls can be logged.
pub fn redact_apikey(url: &str) -> String {
    match url.find("apikey=") {
        Some(i) => {
            let start = i + "apikey=".len();
            let end = url[start..]
                .find('&')
                .map(|j| start + j)
                .unwrap_or(url.len());
            if start == end {
                url.to_string()
            } else {
                format!("{}***{}", &url[..start], &url[end..])
            }
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn redact_key_at_end() {
        assert_eq!(
            redact_apikey("https://api.tomorrow.io/v4/weather/forecast?location=52.1,4.3&apikey=secret"),
            "https://api.tomorrow.io/v4/weather/forecast?location=52.1,4.3&apikey=***"
        );
    }

    #[test]
    fn redact_key_in_the_middle() {
        assert_eq!(
            redact_apikey("http://host/forecast?apikey=secret&location=1,2"),
            "http://host/forecast?apikey=***&location=1,2"
        );
    }

    #[test]
    fn redact_nothing_to_hide() {
        assert_eq!(redact_apikey("http://host/forecast?apikey="), "http://host/forecast?apikey=");
        assert_eq!(redact_apikey("http://host/forecast"), "http://host/forecast");
    }

    /// Serve one raw HTTP response on a local port, return the base url.
    fn serve_once(response: Vec<u8>) -> Result<String, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let mut request = Vec::new();
                while let Ok(n) = stream.read(&mut buf) {
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = stream.write_all(&response);
            }
        });
        Ok(format!("http://{}", addr))
    }

    fn response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            content_type,
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn decode_body_keeps_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let body = "{\"n\":\"é\"}".as_bytes().to_vec();
        let text = decode_body("http://host/forecast?apikey=secret", body.clone())?;
        assert_eq!(text.as_bytes(), body.as_slice());
        Ok(())
    }

    #[test]
    fn decode_body_rejects_invalid_utf8() {
        let res = decode_body("http://host/forecast?apikey=secret", b"{\"n\":\"\xE9\"}".to_vec());
        match res {
            Err(ImportError::Fetch { url, .. }) => assert_eq!(url, "http://host/forecast?apikey=***"),
            other => panic!("expected a fetch error, got {:?}", other),
        }
    }

    #[test]
    fn fetch_returns_body_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        let body = "{\"n\":\"é\"}".as_bytes();
        // a wrong charset must not change the stored bytes
        let base = serve_once(response("200 OK", "application/json; charset=iso-8859-1", body))?;
        let client = TomorrowIoClient::new(Duration::from_secs(5))?;
        let text = client.fetch(&format!("{}/forecast?apikey=secret", base))?;
        assert_eq!(text.as_bytes(), body);
        Ok(())
    }

    #[test]
    fn fetch_rejects_invalid_utf8_body() -> Result<(), Box<dyn std::error::Error>> {
        let base = serve_once(response("200 OK", "application/json", b"{\"n\":\"\xE9\"}"))?;
        let client = TomorrowIoClient::new(Duration::from_secs(5))?;
        let res = client.fetch(&format!("{}/forecast?apikey=secret", base));
        assert!(matches!(res, Err(ImportError::Fetch { .. })));
        Ok(())
    }

    #[test]
    fn fetch_fails_on_error_status() -> Result<(), Box<dyn std::error::Error>> {
        let base = serve_once(response("401 Unauthorized", "application/json", b"{}"))?;
        let client = TomorrowIoClient::new(Duration::from_secs(5))?;
        let res = client.fetch(&format!("{}/forecast?apikey=", base));
        assert!(matches!(res, Err(ImportError::Fetch { .. })));
        Ok(())
    }

    #[ignore]
    #[test]
    fn fetch_unreachable_host() -> Result<(), Box<dyn std::error::Error>> {
        let client = TomorrowIoClient::new(Duration::from_secs(2))?;
        let res = client.fetch("http://127.0.0.1:9/forecast?apikey=secret");
        match res {
            Err(ImportError::Fetch { url, .. }) => assert!(url.ends_with("apikey=***")),
            other => panic!("expected a fetch error, got {:?}", other),
        }
        Ok(())
    }
}
