use std::{borrow::Cow, fmt};
use thiserror::Error;
use tokio::time::Duration;

use crate::api::v1beta1::Severity;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    /// The GlanceAPI itself is malformed; nothing changes until the spec does.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("InputMissing: {0}")]
    InputMissing(String),

    #[error("RenderError: {0}")]
    RenderError(String),

    #[error("ApplyConflict: {0}")]
    ApplyConflict(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("ConfigError: {0}")]
    ConfigError(String),

    #[error("MetricsError: {0}")]
    MetricsError(#[source] prometheus::Error),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        let label = match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror",
            StdError::KubeError(_) => "kubeerror",
            StdError::MetadataMissing(_) => "metadatamissing",
            StdError::InvalidArgument(_) => "invalidargument",
            StdError::InputMissing(_) => "inputmissing",
            StdError::RenderError(_) => "rendererror",
            StdError::ApplyConflict(_) => "applyconflict",
            StdError::Timeout(_) => "timeout",
            StdError::Cancelled => "cancelled",
            StdError::ConfigError(_) => "configerror",
            StdError::MetricsError(_) => "metricserror",
        };
        label.to_string()
    }

    /// Condition reason reported for a step that failed with this error.
    ///
    /// API server rejections keep the reason the server reported, e.g. `Invalid`.
    pub fn reason(&self) -> Cow<'static, str> {
        match self {
            StdError::KubeError(kube::Error::Api(resp)) if !resp.reason.is_empty() => {
                Cow::Owned(resp.reason.clone())
            }
            StdError::InvalidArgument(_) => Cow::Borrowed("Fatal"),
            StdError::InputMissing(_) => Cow::Borrowed("InputMissing"),
            StdError::RenderError(_) => Cow::Borrowed("RenderError"),
            StdError::ApplyConflict(_) => Cow::Borrowed("ApplyConflict"),
            _ => Cow::Borrowed("Error"),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StdError::InputMissing(_) | StdError::RenderError(_) => Severity::Warning,
            StdError::ApplyConflict(_) => Severity::Info,
            _ => Severity::Error,
        }
    }
}

impl From<kube::Error> for StdError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ref api_err) if api_err.code == 409 => {
                StdError::ApplyConflict(api_err.message.clone())
            }
            e => StdError::KubeError(e),
        }
    }
}

impl From<minijinja::Error> for StdError {
    fn from(error: minijinja::Error) -> Self {
        StdError::RenderError(error.to_string())
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    /// The underlying cause, regardless of requeue wrapping.
    pub fn cause(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.cause(),
            StdError::KubeError(kube::Error::Api(api_err)) if api_err.code == 404
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause(), StdError::Cancelled)
    }

    pub fn reason(&self) -> Cow<'static, str> {
        self.cause().reason()
    }

    pub fn severity(&self) -> Severity {
        self.cause().severity()
    }
}

impl From<StdError> for Error {
    fn from(error: StdError) -> Self {
        Error::StdError(error)
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::StdError(error.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
