//! Anonymizing proxy plumbing
//!
//! Builds HTTP clients that route every request through the configured SOCKS
//! proxy and talks to the Tor control port to request a circuit reload
//! before a harvest run.

use crate::config::ProxyConfig;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds an HTTP client for target traffic
///
/// # Arguments
///
/// * `proxy` - Proxy settings; no proxy is configured when the address is unset
/// * `user_agent` - Browser-like user agent
/// * `timeout` - Whole-request timeout
/// * `redirects` - Redirect policy (`Policy::none()` for fingerprinting)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy address or TLS backend failure
pub fn build_client(
    proxy: &ProxyConfig,
    user_agent: &str,
    timeout: Duration,
    redirects: Policy,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .redirect(redirects)
        .danger_accept_invalid_certs(true)
        .gzip(true)
        .brotli(true);

    if let Some(address) = &proxy.address {
        builder = builder.proxy(reqwest::Proxy::all(address.as_str())?);
    }

    builder.build()
}

/// Proxy address in the form Chromium's `--proxy-server` accepts
///
/// Chromium resolves hostnames through SOCKS5 proxies by itself and does not
/// know the `socks5h` scheme.
pub fn browser_proxy_arg(address: &str) -> String {
    match address.strip_prefix("socks5h://") {
        Some(rest) => format!("socks5://{}", rest),
        None => address.to_string(),
    }
}

/// Asks Tor to reload through its control port
///
/// Never fails the caller: every problem is logged and reported as `false`.
///
/// # Returns
///
/// `true` if Tor acknowledged both the authentication and the reload signal
pub async fn signal_reload(proxy: &ProxyConfig) -> bool {
    let Some(password) = proxy.control_password.as_deref() else {
        tracing::debug!("No control password configured, skipping proxy reload");
        return false;
    };

    let address = format!("{}:{}", proxy.control_host, proxy.control_port);
    match tokio::time::timeout(CONTROL_TIMEOUT, reload_via(&address, password)).await {
        Ok(Ok(())) => {
            tracing::info!("Proxy reload requested via {}", address);
            true
        }
        Ok(Err(e)) => {
            tracing::warn!("Proxy reload via {} failed: {}", address, e);
            false
        }
        Err(_) => {
            tracing::warn!("Proxy reload via {} timed out", address);
            false
        }
    }
}

async fn reload_via(address: &str, password: &str) -> std::io::Result<()> {
    let stream = TcpStream::connect(address).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let escaped = password.replace('\\', "\\\\").replace('"', "\\\"");
    write_half
        .write_all(format!("AUTHENTICATE \"{}\"\r\n", escaped).as_bytes())
        .await?;
    expect_ok(&mut reader, "AUTHENTICATE").await?;

    write_half.write_all(b"SIGNAL RELOAD\r\n").await?;
    expect_ok(&mut reader, "SIGNAL RELOAD").await?;

    let _ = write_half.write_all(b"QUIT\r\n").await;
    Ok(())
}

async fn expect_ok<R>(reader: &mut R, command: &str) -> std::io::Result<()>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    if line.trim_end().starts_with("250") {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} rejected: {}", command, line.trim_end()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn fake_control_port(auth_reply: &'static str) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut received = Vec::new();

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                let reply = if line.starts_with("AUTHENTICATE") {
                    auth_reply
                } else {
                    "250 OK\r\n"
                };
                received.push(line);
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
            received
        });

        (port, handle)
    }

    fn proxy_config(port: u16, password: Option<&str>) -> ProxyConfig {
        ProxyConfig {
            control_port: port,
            control_password: password.map(str::to_string),
            ..ProxyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reload_success() {
        let (port, handle) = fake_control_port("250 OK\r\n").await;
        assert!(signal_reload(&proxy_config(port, Some("s3cret"))).await);

        let received = handle.await.unwrap();
        assert_eq!(received[0], "AUTHENTICATE \"s3cret\"");
        assert_eq!(received[1], "SIGNAL RELOAD");
    }

    #[tokio::test]
    async fn test_reload_bad_password() {
        let (port, handle) = fake_control_port("515 Authentication failed\r\n").await;
        assert!(!signal_reload(&proxy_config(port, Some("wrong"))).await);

        let received = handle.await.unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_without_password_is_skipped() {
        assert!(!signal_reload(&proxy_config(9, None)).await);
    }

    #[tokio::test]
    async fn test_reload_unreachable_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!signal_reload(&proxy_config(port, Some("pw"))).await);
    }

    #[test]
    fn test_browser_proxy_arg() {
        assert_eq!(
            browser_proxy_arg("socks5h://127.0.0.1:9050"),
            "socks5://127.0.0.1:9050"
        );
        assert_eq!(browser_proxy_arg("http://10.0.0.1:8080"), "http://10.0.0.1:8080");
    }

    #[test]
    fn test_build_client_with_and_without_proxy() {
        let ua = crate::config::DEFAULT_USER_AGENT;
        let timeout = Duration::from_secs(5);

        assert!(build_client(&ProxyConfig::default(), ua, timeout, Policy::none()).is_ok());

        let direct = ProxyConfig {
            address: None,
            ..ProxyConfig::default()
        };
        assert!(build_client(&direct, ua, timeout, Policy::default()).is_ok());
    }
}
