use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sysfs read failed: {path}: {source}")]
    SysfsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("sysfs write failed: {path}: {source}")]
    SysfsWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Permission denied writing to {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("{what} not found: {}", path.display())]
    NotFound { what: String, path: PathBuf },

    #[error("parse error for {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("{0}")]
    Validation(String),

    #[error("operation timed out after {}s: {operation}", after.as_secs_f32())]
    Timeout { operation: String, after: Duration },

    #[error("{program} command not found")]
    CommandNotFound { program: String },

    #[error("{program} failed: {detail}")]
    CommandFailed { program: String, detail: String },

    #[error("bus service {service} unavailable: {detail}")]
    BusServiceUnavailable { service: String, detail: String },

    #[error("bus rejected {member}: {detail}")]
    BusRejected { member: String, detail: String },

    #[error("unexpected reply for {member}: {detail}")]
    BadReply { member: String, detail: String },

    #[error("{surface} unavailable: {reason}")]
    SurfaceUnavailable { surface: &'static str, reason: String },

    #[error("failed to {operation} power profile: {source}")]
    ProfileOperation {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("error {operation} GPU mode: {source}")]
    GpuOperation {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::ProfileOperation { source, .. } | Error::GpuOperation { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
