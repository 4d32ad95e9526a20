//! `FileFetcher` over libcurl.
//!
//! Each request runs on a blocking thread. Body chunks reach the async side
//! through a bounded channel; dropping the stream closes the channel, which
//! makes the write callback abort the transfer.

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::str;
use std::time::Duration;
use tokio::sync::mpsc;

use super::headers::ResponseHead;
use super::{ByteStream, FetchResponse, FileFetcher};
use crate::error::{NetworkError, NetworkErrorKind};
use crate::model::FileSize;

/// Chunks buffered between the curl thread and the consumer.
const CHANNEL_DEPTH: usize = 16;

/// libcurl knobs applied to every request.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when the rate stays below `low_speed_limit` bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Per-transfer receive cap in bytes/s.
    pub max_recv_speed: Option<u64>,
    pub user_agent: String,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            max_recv_speed: None,
            user_agent: concat!("batchdl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurlFetcher {
    opts: CurlOptions,
}

impl CurlFetcher {
    pub fn new(opts: CurlOptions) -> Self {
        Self { opts }
    }
}

enum Msg {
    Start {
        start_offset: u64,
        total_size: Option<u64>,
    },
    Data(Vec<u8>),
    Done,
    Failed(NetworkError),
}

/// Only http(s) addresses are fetched.
fn check_address(address: &str) -> Result<url::Url, NetworkError> {
    let url = url::Url::parse(address).map_err(|e| {
        NetworkError::new(
            NetworkErrorKind::UnsupportedAddress,
            format!("invalid address {address}: {e}"),
        )
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(NetworkError::new(
            NetworkErrorKind::UnsupportedAddress,
            format!("unsupported scheme: {other}"),
        )),
    }
}

fn classify_curl_error(e: &curl::Error) -> NetworkError {
    let kind = if e.is_operation_timedout() {
        NetworkErrorKind::Timeout
    } else if e.is_unsupported_protocol() || e.is_url_malformed() {
        NetworkErrorKind::UnsupportedAddress
    } else if e.is_peer_failed_verification() || e.is_too_many_redirects() {
        NetworkErrorKind::PermanentResource
    } else {
        NetworkErrorKind::ConnectionLost
    };
    NetworkError::new(kind, e.to_string())
}

fn configure(easy: &mut curl::easy::Easy, url: &str, opts: &CurlOptions) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.useragent(&opts.user_agent)?;
    easy.connect_timeout(opts.connect_timeout)?;
    easy.low_speed_limit(opts.low_speed_limit)?;
    easy.low_speed_time(opts.low_speed_time)?;
    if let Some(speed) = opts.max_recv_speed {
        easy.max_recv_speed(speed)?;
    }
    Ok(())
}

/// HEAD request. Servers that refuse HEAD leave the size unresolved.
fn run_probe(url: &str, opts: &CurlOptions) -> Result<FileSize, NetworkError> {
    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, opts).map_err(|e| classify_curl_error(&e))?;
    easy.nobody(true).map_err(|e| classify_curl_error(&e))?;

    let head = RefCell::new(ResponseHead::default());
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    head.borrow_mut().push_line(s);
                }
                true
            })
            .map_err(|e| classify_curl_error(&e))?;
        transfer.perform().map_err(|e| classify_curl_error(&e))?;
    }

    let code = easy.response_code().map_err(|e| classify_curl_error(&e))?;
    match code {
        200..=299 => Ok(head.into_inner().content_length.into()),
        405 | 501 => Ok(FileSize::Unknown),
        _ => Err(NetworkError::from_http_status(code as u16).unwrap_or_else(|| {
            NetworkError::new(NetworkErrorKind::PermanentResource, format!("HTTP {code}"))
        })),
    }
}

/// First message of a fetch, derived from the response head.
fn start_message(head: &ResponseHead, offset: Option<u64>) -> Result<Msg, NetworkError> {
    let status = head.status.unwrap_or(0);
    if let Some(e) = NetworkError::from_http_status(status as u16) {
        return Err(e);
    }
    let start_offset = if status == 206 {
        head.content_range
            .map(|(start, _)| start)
            .unwrap_or_else(|| offset.unwrap_or(0))
    } else {
        0
    };
    Ok(Msg::Start {
        start_offset,
        total_size: head.total_size(),
    })
}

fn run_fetch(
    url: &str,
    offset: Option<u64>,
    opts: &CurlOptions,
    tx: &mpsc::Sender<Msg>,
) -> Result<(), NetworkError> {
    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, opts).map_err(|e| classify_curl_error(&e))?;
    if let Some(off) = offset.filter(|&o| o > 0) {
        easy.range(&format!("{off}-"))
            .map_err(|e| classify_curl_error(&e))?;
    }

    let head = RefCell::new(ResponseHead::default());
    let started = Cell::new(false);
    let failure: RefCell<Option<NetworkError>> = RefCell::new(None);

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    head.borrow_mut().push_line(s);
                }
                true
            })
            .map_err(|e| classify_curl_error(&e))?;
        transfer
            .write_function(|data| {
                if !started.get() {
                    started.set(true);
                    match start_message(&head.borrow(), offset) {
                        Ok(msg) => {
                            if tx.blocking_send(msg).is_err() {
                                return Ok(0);
                            }
                        }
                        Err(e) => {
                            *failure.borrow_mut() = Some(e);
                            return Ok(0);
                        }
                    }
                }
                if tx.blocking_send(Msg::Data(data.to_vec())).is_err() {
                    // consumer went away
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(|e| classify_curl_error(&e))?;
        transfer.perform()
    };

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    match result {
        Err(e) if e.is_write_error() && tx.is_closed() => return Ok(()),
        Err(e) => return Err(classify_curl_error(&e)),
        Ok(()) => {}
    }
    if !started.get() {
        // Empty body: the head still decides success.
        let msg = start_message(&head.borrow(), offset)?;
        if tx.blocking_send(msg).is_err() {
            return Ok(());
        }
    }
    let _ = tx.blocking_send(Msg::Done);
    Ok(())
}

struct ChannelStream {
    rx: mpsc::Receiver<Msg>,
    done: bool,
}

#[async_trait]
impl ByteStream for ChannelStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, NetworkError> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Msg::Data(data)) => Ok(Some(data)),
            Some(Msg::Done) => {
                self.done = true;
                Ok(None)
            }
            Some(Msg::Failed(e)) => {
                self.done = true;
                Err(e)
            }
            Some(Msg::Start { .. }) | None => {
                self.done = true;
                Err(NetworkError::new(
                    NetworkErrorKind::ConnectionLost,
                    "transfer ended without completing",
                ))
            }
        }
    }
}

#[async_trait]
impl FileFetcher for CurlFetcher {
    async fn probe_size(&self, address: &str) -> Result<FileSize, NetworkError> {
        let url = check_address(address)?;
        let opts = self.opts.clone();
        tokio::task::spawn_blocking(move || run_probe(url.as_str(), &opts))
            .await
            .map_err(|e| {
                NetworkError::new(NetworkErrorKind::ConnectionLost, format!("probe task: {e}"))
            })?
    }

    async fn fetch(&self, address: &str, offset: Option<u64>) -> Result<FetchResponse, NetworkError> {
        let url = check_address(address)?;
        let opts = self.opts.clone();
        let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_fetch(url.as_str(), offset, &opts, &tx) {
                tracing::debug!(url = %url, error = %e, "fetch failed");
                let _ = tx.blocking_send(Msg::Failed(e));
            }
        });
        match rx.recv().await {
            Some(Msg::Start {
                start_offset,
                total_size,
            }) => Ok(FetchResponse {
                start_offset,
                total_size,
                stream: Box::new(ChannelStream { rx, done: false }),
            }),
            Some(Msg::Failed(e)) => Err(e),
            Some(Msg::Data(_)) | Some(Msg::Done) | None => Err(NetworkError::new(
                NetworkErrorKind::ConnectionLost,
                "transfer ended before a response arrived",
            )),
        }
    }
}
