//! HTTP CONNECT proxy tunnel.
//!
//! The dial runs blocking on its own thread: resolve the proxy,
//! exchange the CONNECT request and response, then hand the raw socket
//! back to the async side. Failures surface through the channel's
//! inactive callback with a `Curl failed` prefix, the historical text
//! embedders already match on.

use std::{
    io::{Read, Write},
    net::TcpStream,
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::{
    config::ProxyOptions,
    error::{ChannelError, Result},
};

const DIAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Dial `target` (a `host:port` string) through the proxy, blocking.
///
/// Returns a connected socket whose byte stream is the tunneled TCP
/// connection.
pub fn dial_blocking(proxy: &ProxyOptions, target: &str) -> Result<TcpStream> {
    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let stream = connect_with_timeout(&proxy_addr)?;
    stream
        .set_read_timeout(Some(DIAL_TIMEOUT))
        .and_then(|()| stream.set_write_timeout(Some(DIAL_TIMEOUT)))
        .map_err(|e| curl_failed("socket timeout setup", &e))?;

    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Connection: keep-alive\r\n"
    );
    if let Some(user) = &proxy.user {
        let identity = match &proxy.domain {
            Some(domain) => format!("{domain}\\{user}"),
            None => user.clone(),
        };
        let credentials =
            format!("{identity}:{}", proxy.password.as_deref().unwrap_or_default());
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials.as_bytes())
        ));
    }
    request.push_str("\r\n");

    let mut stream = stream;
    stream
        .write_all(request.as_bytes())
        .map_err(|e| curl_failed("proxy CONNECT write", &e))?;

    // Read until the end of the response headers.
    let mut response = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() > 8192 {
            return Err(ChannelError::SystemFailure {
                errno: None,
                text: "Curl failed: proxy response headers too large".to_string(),
            });
        }
        let n = stream.read(&mut byte).map_err(|e| curl_failed("proxy CONNECT read", &e))?;
        if n == 0 {
            return Err(ChannelError::SystemFailure {
                errno: None,
                text: "Curl failed: proxy closed during CONNECT".to_string(),
            });
        }
        response.push(byte[0]);
    }

    let status_line = response.split(|&b| b == b'\r').next().unwrap_or_default();
    let ok = status_line.windows(4).any(|w| w == b" 200");
    if !ok {
        return Err(ChannelError::SystemFailure {
            errno: None,
            text: format!(
                "Curl failed: proxy refused CONNECT: {}",
                String::from_utf8_lossy(status_line)
            ),
        });
    }

    stream.set_read_timeout(None).and_then(|()| stream.set_write_timeout(None)).map_err(
        |e| curl_failed("socket timeout reset", &e),
    )?;
    Ok(stream)
}

fn connect_with_timeout(addr: &str) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let mut last = None;
    let addrs = addr
        .to_socket_addrs()
        .map_err(|e| curl_failed("proxy resolve", &e))?;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, DIAL_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    let text = last.map_or_else(
        || "no addresses resolved".to_string(),
        |e| e.to_string(),
    );
    Err(ChannelError::SystemFailure {
        errno: None,
        text: format!("Curl failed: proxy connect: {text}"),
    })
}

fn curl_failed(context: &str, err: &std::io::Error) -> ChannelError {
    ChannelError::SystemFailure {
        errno: err.raw_os_error(),
        text: format!("Curl failed: {context}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_credentials_encode_as_expected() {
        assert_eq!(BASE64.encode(b"user:pass"), "dXNlcjpwYXNz");
        assert_eq!(BASE64.encode(b"CORP\\md:s3cret"), "Q09SUFxtZDpzM2NyZXQ=");
    }

    #[test]
    fn unreachable_proxy_reports_curl_failed() {
        let proxy = ProxyOptions {
            // Port 1 on loopback refuses immediately.
            host: "127.0.0.1".to_string(),
            port: 1,
            user: None,
            password: None,
            domain: None,
        };
        let err = dial_blocking(&proxy, "example.com:14002").unwrap_err();
        let ChannelError::SystemFailure { text, .. } = err else {
            unreachable!("proxy dial errors are system failures");
        };
        assert!(text.starts_with("Curl failed"), "{text}");
    }
}
