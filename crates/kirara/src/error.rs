use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

use crate::hls::DownloadStage;

#[derive(Error, Debug)]
pub enum KiraraError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error("Range response length mismatch: expected {expected} bytes, got {actual}")]
    RangeLengthMismatch { expected: u64, actual: u64 },

    #[error("No playable segments found")]
    NoSegments,

    #[error("Invalid IV: {0}")]
    InvalidIv(String),

    #[error("Invalid AES-128 key: {0:?}")]
    InvalidAes128Key(Vec<u8>),

    #[error("Ciphertext length {0} is not a multiple of the AES block size")]
    InvalidCiphertextLength(usize),

    #[error("Pkcs7 unpad error")]
    UnpadError(#[from] UnpadError),

    #[error("Mux error: {0}")]
    MuxError(String),

    #[error(transparent)]
    MissingExecutable(#[from] which::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Task {index} ({url}) failed: {source}")]
    TaskFailed {
        index: usize,
        url: String,
        #[source]
        source: Box<KiraraError>,
    },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: DownloadStage,
        #[source]
        source: Box<KiraraError>,
    },
}

/// Coarse classification of [KiraraError], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Parse,
    Crypto,
    Mux,
    Io,
    Cancelled,
}

impl KiraraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HttpError(_) | Self::RequestError(_) | Self::RangeLengthMismatch { .. } => {
                ErrorKind::Network
            }
            Self::NoSegments
            | Self::InvalidIv(_)
            | Self::UrlParseError(_)
            | Self::HexDecodeError(_) => ErrorKind::Parse,
            Self::InvalidAes128Key(_) | Self::InvalidCiphertextLength(_) | Self::UnpadError(_) => {
                ErrorKind::Crypto
            }
            Self::MuxError(_) | Self::MissingExecutable(_) => ErrorKind::Mux,
            Self::IOError(_) | Self::JoinError(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Stage { source, .. } | Self::TaskFailed { source, .. } => source.kind(),
        }
    }

    pub(crate) fn at(self, stage: DownloadStage) -> Self {
        match self {
            // keep the innermost stage
            Self::Stage { .. } => self,
            _ => Self::Stage {
                stage,
                source: Box::new(self),
            },
        }
    }

    pub fn stage(&self) -> Option<DownloadStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

pub type KiraraResult<T> = Result<T, KiraraError>;
