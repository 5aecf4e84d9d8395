//! Fixed responses produced by the proxy itself.
//!
//! Error responses can be overridden per proxy; the backend override wins over the
//! frontend one, which wins over the built-in text below.

use bytes::Bytes;
use serde::Deserialize;

/// Error responses the proxy may synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum HttpErr {
    #[serde(rename = "400")]
    BadRequest,
    #[serde(rename = "403")]
    Forbidden,
    #[serde(rename = "408")]
    RequestTimeout,
    #[serde(rename = "500")]
    ServerError,
    #[serde(rename = "502")]
    BadGateway,
    #[serde(rename = "503")]
    Unavailable,
    #[serde(rename = "504")]
    GatewayTimeout,
}

impl HttpErr {
    pub const ALL: [HttpErr; 7] = [
        HttpErr::BadRequest,
        HttpErr::Forbidden,
        HttpErr::RequestTimeout,
        HttpErr::ServerError,
        HttpErr::BadGateway,
        HttpErr::Unavailable,
        HttpErr::GatewayTimeout,
    ];

    pub const fn code(self) -> u16 {
        match self {
            HttpErr::BadRequest => 400,
            HttpErr::Forbidden => 403,
            HttpErr::RequestTimeout => 408,
            HttpErr::ServerError => 500,
            HttpErr::BadGateway => 502,
            HttpErr::Unavailable => 503,
            HttpErr::GatewayTimeout => 504,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }

    /// Returns the built-in response text.
    pub const fn default_message(self) -> &'static [u8] {
        match self {
            HttpErr::BadRequest => concat!(
                "HTTP/1.0 400 Bad request\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>400 Bad request</h1>\nYour browser sent an invalid request.\n</body></html>\n",
            )
            .as_bytes(),
            HttpErr::Forbidden => concat!(
                "HTTP/1.0 403 Forbidden\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>403 Forbidden</h1>\nRequest forbidden by administrative rules.\n</body></html>\n",
            )
            .as_bytes(),
            HttpErr::RequestTimeout => concat!(
                "HTTP/1.0 408 Request Time-out\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>408 Request Time-out</h1>\nYour browser didn't send a complete request in time.\n</body></html>\n",
            )
            .as_bytes(),
            HttpErr::ServerError => concat!(
                "HTTP/1.0 500 Server Error\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>500 Server Error</h1>\nAn internal server error occured.\n</body></html>\n",
            )
            .as_bytes(),
            HttpErr::BadGateway => concat!(
                "HTTP/1.0 502 Bad Gateway\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>502 Bad Gateway</h1>\nThe server returned an invalid or incomplete response.\n</body></html>\n",
            )
            .as_bytes(),
            HttpErr::Unavailable => concat!(
                "HTTP/1.0 503 Service Unavailable\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>503 Service Unavailable</h1>\nNo server is available to handle this request.\n</body></html>\n",
            )
            .as_bytes(),
            HttpErr::GatewayTimeout => concat!(
                "HTTP/1.0 504 Gateway Time-out\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "Content-Type: text/html\r\n",
                "\r\n",
                "<html><body><h1>504 Gateway Time-out</h1>\nThe server didn't respond in time.\n</body></html>\n",
            )
            .as_bytes(),
        }
    }
}

/// Monitor reply for a healthy service.
pub const HTTP_200: &[u8] = concat!(
    "HTTP/1.0 200 OK\r\n",
    "Cache-Control: no-cache\r\n",
    "Connection: close\r\n",
    "Content-Type: text/html\r\n",
    "\r\n",
    "<html><body><h1>200 OK</h1>\nservice ready.\n</body></html>\n",
)
.as_bytes();

/// Returns the head of a redirect reply, up to and including `Location: `.
pub fn redirect_prefix(code: u16) -> Option<&'static [u8]> {
    let prefix: &'static str = match code {
        301 => "HTTP/1.0 301 Moved Permanently\r\nCache-Control: no-cache\r\nConnection: close\r\nLocation: ",
        302 => "HTTP/1.0 302 Found\r\nCache-Control: no-cache\r\nConnection: close\r\nLocation: ",
        303 => "HTTP/1.0 303 See Other\r\nCache-Control: no-cache\r\nConnection: close\r\nLocation: ",
        _ => return None,
    };
    Some(prefix.as_bytes())
}

/// Builds the authentication challenge for `realm`.
pub fn unauthorized(realm: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.0 401 Unauthorized\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         Content-Type: text/html\r\n\
         WWW-Authenticate: Basic realm=\"{realm}\"\r\n\
         \r\n\
         <html><body><h1>401 Unauthorized</h1>\nYou need a valid user and password to access this content.\n</body></html>\n"
    ))
}

/// Per-proxy error response overrides.
#[derive(Debug, Clone, Default)]
pub struct ErrorMessages {
    overrides: [Option<Bytes>; 7],
}

impl ErrorMessages {
    pub fn set(&mut self, err: HttpErr, message: Bytes) {
        self.overrides[err.slot()] = Some(message);
    }

    pub fn get(&self, err: HttpErr) -> Option<&Bytes> {
        self.overrides[err.slot()].as_ref()
    }
}

/// Selects the response text for `err`: backend override, frontend override, built-in.
pub fn error_message(be: &ErrorMessages, fe: &ErrorMessages, err: HttpErr) -> Bytes {
    be.get(err).or_else(|| fe.get(err)).cloned().unwrap_or_else(|| Bytes::from_static(err.default_message()))
}
