use amber_model::{AmberError, ContentHash, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use url::Url;

/// Chunked blob bytes. Chunk sizing is transport-defined.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Transport for content blobs. The HTTP implementation is the production
/// path; tests substitute an in-memory store.
#[async_trait]
pub trait BlobRemote: Send + Sync {
    async fn open(&self, hash: ContentHash) -> Result<ByteStream>;
}

/// Streams `<blob_url>/blobs/<hex-hash>` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBlobRemote {
    base: Url,
    http: reqwest::Client,
}

impl HttpBlobRemote {
    pub fn new(base: Url, http: reqwest::Client) -> Self {
        Self { base, http }
    }

    fn blob_url(&self, hash: ContentHash) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AmberError::invalid_config(format!(
                    "blob url {} cannot carry paths",
                    self.base
                ))
            })?
            .pop_if_empty()
            .push("blobs")
            .push(&hash.to_string());
        Ok(url)
    }
}

#[async_trait]
impl BlobRemote for HttpBlobRemote {
    async fn open(&self, hash: ContentHash) -> Result<ByteStream> {
        let url = self.blob_url(hash)?;
        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            AmberError::network(format!("fetch {url}: {e}"))
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AmberError::not_found(format!("blob {hash} not found")));
        }
        if !response.status().is_success() {
            return Err(AmberError::network(format!(
                "fetch {url}: HTTP {}",
                response.status()
            )));
        }
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(|e| {
                AmberError::network(format!("blob stream interrupted: {e}"))
            })
        });
        Ok(stream.boxed())
    }
}
