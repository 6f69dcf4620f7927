use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid task: {message}"))]
    Validation { message: String },

    #[snafu(display("Task broker unavailable"))]
    BrokerUnavailable {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    MigrationError {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("No handler registered for task type {task_type}"))]
    UnknownTaskType { task_type: String },

    #[snafu(display("Task payload could not be (de)serialized"))]
    Serialization {
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Handler failed"))]
    Handler {
        #[snafu(source(from(eyre::Report, |r: eyre::Report| r.into())))]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[snafu(display("Handler for {task_type} exceeded its {timeout_ms}ms deadline"))]
    DeadlineExceeded { task_type: String, timeout_ms: u64 },

    #[snafu(display("Delivery not found: {id}"))]
    DeliveryNotFound { id: i64 },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(eyre::Report, |r: eyre::Report| Some(r.into()))))]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::BrokerUnavailable { source }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationError { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialization { source }
    }
}

impl From<eyre::Report> for Error {
    fn from(source: eyre::Report) -> Self {
        Self::Handler {
            source: source.into(),
        }
    }
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn handler(source: impl Into<eyre::Report>) -> Self {
        Self::Handler {
            source: source.into().into(),
        }
    }

    pub fn unknown_task_type(task_type: impl Into<String>) -> Self {
        Self::UnknownTaskType {
            task_type: task_type.into(),
        }
    }

    /// Whether a failed delivery should consume retry budget and be
    /// rescheduled, or go straight to the dead state.
    ///
    /// Validation and serialization failures are permanent: redelivering the
    /// same bytes will fail the same way. An unknown task type is a
    /// configuration mismatch, not a transient fault.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. } | Self::Serialization { .. } | Self::UnknownTaskType { .. }
        )
    }
}
