//! Network port: size probes and (range) fetches that yield a chunk stream.

mod curl_fetcher;
mod headers;

pub use curl_fetcher::{CurlFetcher, CurlOptions};

use async_trait::async_trait;

use crate::error::NetworkError;
use crate::model::FileSize;

/// Body of a fetch, pulled one chunk at a time.
#[async_trait]
pub trait ByteStream: Send {
    /// Next chunk of the body, or `None` once the body is complete.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, NetworkError>;
}

/// Response to a fetch.
pub struct FetchResponse {
    /// Offset of the first byte of `stream` within the resource. Zero when the
    /// server ignored the requested range.
    pub start_offset: u64,
    /// Full resource size, when the response carries it.
    pub total_size: Option<u64>,
    pub stream: Box<dyn ByteStream>,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("start_offset", &self.start_offset)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Resolve the size of the resource without fetching the body.
    async fn probe_size(&self, address: &str) -> Result<FileSize, NetworkError>;

    /// Fetch the resource, from `offset` when given.
    async fn fetch(&self, address: &str, offset: Option<u64>) -> Result<FetchResponse, NetworkError>;
}
