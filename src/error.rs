//! Custom error types for the access engine
use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// Null or malformed request, out-of-range key code, or no bound process.
    InvalidParameter,
    /// Module, export, process, or page-table entry lookup failure.
    NotFound(String),
    /// Malformed DOS/PE header encountered while parsing a module image.
    InvalidImageFormat(String),
    /// The physical mapping for a write could not be established.
    InsufficientResources,
    /// A single physical access exceeded one page.
    BufferTooLarge,
    /// Unrecognized operation code on the control interface.
    InvalidDeviceRequest(u32),
    ProfileError(String),
    IoError(std::io::Error),
    SerdeJsonError(serde_json::Error),
    RegexError(regex::Error),
    CsvError(csv::Error),
    CsvIntoInnerError(csv::IntoInnerError<csv::Writer<Vec<u8>>>),
    FromUtf8Error(std::string::FromUtf8Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::InvalidParameter => write!(f, "Invalid parameter"),
            EngineError::NotFound(what) => write!(f, "Not found: {}", what),
            EngineError::InvalidImageFormat(msg) => write!(f, "Invalid image format: {}", msg),
            EngineError::InsufficientResources => write!(f, "Insufficient resources"),
            EngineError::BufferTooLarge => write!(f, "Buffer exceeds one physical page"),
            EngineError::InvalidDeviceRequest(code) => {
                write!(f, "Invalid device request: 0x{:x}", code)
            }
            EngineError::ProfileError(msg) => write!(f, "Profile error: {}", msg),
            EngineError::IoError(e) => write!(f, "IO error: {}", e),
            EngineError::SerdeJsonError(e) => write!(f, "JSON error: {}", e),
            EngineError::RegexError(e) => write!(f, "Regex error: {}", e),
            EngineError::CsvError(e) => write!(f, "CSV error: {}", e),
            EngineError::CsvIntoInnerError(e) => write!(f, "CSV into_inner error: {}", e),
            EngineError::FromUtf8Error(e) => write!(f, "UTF-8 conversion error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::IoError(error)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::SerdeJsonError(error)
    }
}

impl From<regex::Error> for EngineError {
    fn from(error: regex::Error) -> Self {
        EngineError::RegexError(error)
    }
}

impl From<csv::Error> for EngineError {
    fn from(error: csv::Error) -> Self {
        EngineError::CsvError(error)
    }
}

impl From<csv::IntoInnerError<csv::Writer<Vec<u8>>>> for EngineError {
    fn from(error: csv::IntoInnerError<csv::Writer<Vec<u8>>>) -> Self {
        EngineError::CsvIntoInnerError(error)
    }
}

impl From<std::string::FromUtf8Error> for EngineError {
    fn from(error: std::string::FromUtf8Error) -> Self {
        EngineError::FromUtf8Error(error)
    }
}
