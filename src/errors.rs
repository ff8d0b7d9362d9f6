use thiserror::Error;

/// Why an outbox payload or broker envelope could not be turned into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown event type '{0}'")]
    UnknownType(String),

    #[error("Malformed '{type_name}' payload: {source}")]
    Malformed {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload is null")]
    Null,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker rejected message: {0}")]
    Broker(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("Commit failed: {0}")]
    Commit(String),
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Failed to connect to database: {0}")]
    Connect(String),

    #[error("LISTEN on channel '{channel}' failed: {message}")]
    Listen { channel: String, message: String },

    #[error("Notification connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search index returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    SearchIndex(#[from] SearchIndexError),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A handler is already registered for '{0}'")]
    DuplicateHandler(&'static str),
}

#[derive(Debug, Error)]
pub enum TailerError {
    #[error("Outbox tailer requires a non-empty connection string")]
    MissingConnectionString,

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Catch-up read failed: {0}")]
    CatchUp(String),
}
