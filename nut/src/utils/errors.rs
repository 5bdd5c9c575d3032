use std::io;

#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

pub type Result<T, E = NutError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum NutError {
    #[error("Unexpected end of data")]
    EndOfData,

    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("CRC mismatch. Calculated {calculated:#010X}, Read {read:#010X}")]
    CrcMismatch { calculated: u32, read: u32 },

    #[error("Timestamp regression on stream {stream}: {pts} < {last}")]
    OutOfOrderTimestamp { stream: usize, last: i64, pts: i64 },

    #[error("Timestamp rescaling overflow")]
    ArithmeticOverflow,

    #[error("I/O failure: {0}")]
    IoFailure(#[source] io::Error),

    #[error("Operation not allowed while {0}")]
    InvalidState(&'static str),
}

impl NutError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEncoding(msg.into())
    }

    /// Errors the reader can skip over by resynchronising on the next startcode.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EndOfData | Self::MalformedEncoding(_) | Self::CrcMismatch { .. }
        )
    }

    /// Reinterprets running out of bytes inside a length-delimited structure.
    pub fn within(self, structure: &str) -> Self {
        match self {
            Self::EndOfData => Self::MalformedEncoding(format!("truncated {structure}")),
            other => other,
        }
    }
}

impl From<io::Error> for NutError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::EndOfData,
            _ => Self::IoFailure(err),
        }
    }
}
