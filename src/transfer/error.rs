//! Error types for file transfers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring one portal file.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout { url: String },

    /// Non-2xx response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus { url: String, status: u16 },

    /// File system error while writing the download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The portal answered with a small HTML document instead of a file.
    #[error("Received HTML instead of file, might be error page ({size} bytes from {url})")]
    ErrorPage { url: String, size: u64 },

    /// The body is too small to be a real export.
    #[error("File too small ({size} bytes), likely error page")]
    TooSmall { size: u64 },

    /// A statement link carries no form parameters to replay.
    #[error("No download parameters")]
    MissingParams { filename: String },
}

impl TransferError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest failure, separating timeouts from other network errors.
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn error_page(url: impl Into<String>, size: u64) -> Self {
        Self::ErrorPage {
            url: url.into(),
            size,
        }
    }

    #[must_use]
    pub fn too_small(size: u64) -> Self {
        Self::TooSmall { size }
    }

    pub fn missing_params(filename: impl Into<String>) -> Self {
        Self::MissingParams {
            filename: filename.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingParams { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = TransferError::http_status("https://portal/x", 503);
        assert_eq!(err.to_string(), "HTTP 503 downloading https://portal/x");

        let err = TransferError::too_small(42);
        assert!(err.to_string().contains("42 bytes"));
    }

    #[test]
    fn test_missing_params_is_terminal() {
        let err = TransferError::missing_params("STM_1.xls");
        assert_eq!(err.to_string(), "No download parameters");
        assert!(!err.is_retryable());
        assert!(TransferError::timeout("u").is_retryable());
        assert!(TransferError::error_page("u", 10).is_retryable());
    }
}
