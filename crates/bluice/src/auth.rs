// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session credential lookup against the beamline authentication server.
//!
//! The login servlet takes an HTTP Basic credential and returns the session
//! id in a response header (or, on older servers, in a cookie).

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, AUTHORIZATION, SET_COOKIE};

use crate::error::{Error, Result};

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "SMBSessionID";

/// Application name sent to the login servlet.
pub const APP_NAME: &str = "BluIce";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `Basic <base64(user:secret)>`
pub fn basic_credential(user: &str, secret: &str) -> String {
    let raw = format!("{}:{}", user, secret);
    format!("Basic {}", general_purpose::STANDARD.encode(raw.as_bytes()))
}

/// Pull the session id out of a login response.
pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let prefix = format!("{}=", SESSION_HEADER);
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookie| cookie.split(';'))
        .map(str::trim)
        .find_map(|part| part.strip_prefix(prefix.as_str()))
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Log `user` in at `server` (`host:port`) and return the session id.
pub fn fetch_session_id(server: &str, user: &str, secret: &str) -> Result<String> {
    let url = format!(
        "http://{}/gateway/servlet/APPLOGIN?userid={}&AppName={}",
        server, user, APP_NAME
    );
    log::debug!("[auth] requesting session for '{}' from {}", user, server);

    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .no_proxy()
        .build()
        .map_err(|e| Error::Authentication(format!("cannot build HTTP client: {}", e)))?;

    let response = client
        .get(&url)
        .header(AUTHORIZATION, basic_credential(user, secret))
        .send()
        .map_err(|e| {
            Error::Authentication(format!(
                "request to authentication server '{}' failed: {}",
                server, e
            ))
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Authentication(format!(
            "authentication server '{}' rejected user '{}' with HTTP {}",
            server, user, status
        )));
    }

    let session = extract_session_id(response.headers()).ok_or_else(|| {
        Error::Authentication(format!(
            "authentication server '{}' returned no session id for user '{}'",
            server, user
        ))
    })?;
    log::info!("[auth] obtained session for '{}' from {}", user, server);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_basic_credential() {
        assert_eq!(basic_credential("user", "secret"), "Basic dXNlcjpzZWNyZXQ=");
    }

    #[test]
    fn test_session_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("ABC123"));
        assert_eq!(extract_session_id(&headers).as_deref(), Some("ABC123"));
    }

    #[test]
    fn test_session_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("JSESSIONID=zz; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("SMBSessionID=XYZ789; Path=/gateway"),
        );
        assert_eq!(extract_session_id(&headers).as_deref(), Some("XYZ789"));
    }

    #[test]
    fn test_no_session() {
        assert!(extract_session_id(&HeaderMap::new()).is_none());
    }

    fn one_shot_server(response: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                request.push_str(&line);
            }
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (addr, handle)
    }

    #[test]
    fn test_fetch_session_id() {
        let (addr, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\nSMBSessionID: S3SS10N\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let session = fetch_session_id(&addr, "user", "secret").unwrap();
        assert_eq!(session, "S3SS10N");

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /gateway/servlet/APPLOGIN?userid=user&AppName=BluIce"));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: basic dxnlcjpzzwnyzxq="));
    }

    #[test]
    fn test_fetch_rejected() {
        let (addr, server) = one_shot_server(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let err = fetch_session_id(&addr, "user", "wrong").unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        server.join().unwrap();
    }
}
