use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    MarshalError(#[from] webrtc::util::Error),
    #[error(transparent)]
    TransportError(#[from] TransportError),
    #[error(transparent)]
    ProducerError(#[from] ProducerError),
    #[error(transparent)]
    ConsumerError(#[from] ConsumerError),
    #[error(transparent)]
    RequestError(#[from] RequestError),
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProducerError {
    pub kind: ProducerErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConsumerError {
    pub kind: ConsumerErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportErrorKind {
    #[error("malformed rtcp packet error")]
    MalformedRtcpPacketError,
    #[error("transport closed error")]
    TransportClosedError,
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerErrorKind {
    #[error("duplicated producer id error")]
    DuplicateIdError,
    #[error("producer not found error")]
    NotFoundError,
    #[error("ssrc already in use error")]
    SsrcAlreadyInUseError,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerErrorKind {
    #[error("duplicated consumer id error")]
    DuplicateIdError,
    #[error("consumer not found error")]
    NotFoundError,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestErrorKind {
    #[error("missing field error")]
    MissingFieldError,
    #[error("invalid field error")]
    InvalidFieldError,
}

impl Error {
    pub fn new_transport(message: String, kind: TransportErrorKind) -> Error {
        Error::TransportError(TransportError { kind, message })
    }

    pub fn new_producer(message: String, kind: ProducerErrorKind) -> Error {
        Error::ProducerError(ProducerError { kind, message })
    }

    pub fn new_consumer(message: String, kind: ConsumerErrorKind) -> Error {
        Error::ConsumerError(ConsumerError { kind, message })
    }

    pub fn new_request(message: String, kind: RequestErrorKind) -> Error {
        Error::RequestError(RequestError { kind, message })
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("relaymesh::TransportError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("relaymesh::ProducerError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("relaymesh::ConsumerError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("relaymesh::RequestError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}
