use sigrelay_common::{ClientId, Envelope};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Outbound messages a connection task can buffer before sends start failing.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocate the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why an outbound message could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The connection task is gone.
    Closed,
    /// The connection's outbound queue is full.
    Full,
    /// The envelope could not be serialized.
    Encode,
}

/// Non-owning handle to a live connection.
///
/// The socket belongs to the connection task; the handle only holds the
/// sending half of that task's outbound queue.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    id: ConnId,
    tx: mpsc::Sender<String>,
}

impl ConnHandle {
    /// Create a handle and the receiving end its connection task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        (
            Self {
                id: ConnId::next(),
                tx,
            },
            rx,
        )
    }

    /// Identity of the underlying connection.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// `true` while the connection task is still receiving.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue one text message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is gone and
    /// [`SendError::Full`] if its queue is saturated.
    pub fn send(&self, text: String) -> Result<(), SendError> {
        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Encode `envelope` and queue it.
    ///
    /// # Errors
    ///
    /// As [`ConnHandle::send`], plus [`SendError::Encode`] if encoding fails.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), SendError> {
        let text = envelope.encode().map_err(|_| SendError::Encode)?;
        self.send(text)
    }
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct Session {
    handle: ConnHandle,
    client_id: Option<ClientId>,
}

impl Session {
    /// Start an unregistered session over `handle`.
    #[must_use]
    pub fn new(handle: ConnHandle) -> Self {
        Self {
            handle,
            client_id: None,
        }
    }

    /// Handle of this session's connection.
    #[must_use]
    pub fn handle(&self) -> &ConnHandle {
        &self.handle
    }

    /// Identifier this session registered under, if any.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Bind `client_id`, returning the previously bound identifier.
    pub(crate) fn bind(&mut self, client_id: ClientId) -> Option<ClientId> {
        self.client_id.replace(client_id)
    }
}
