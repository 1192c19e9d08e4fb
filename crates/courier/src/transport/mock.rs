//! In-memory transport for driving exchanges from tests.

use super::{exchange, Exchange, ExchangeIo, RequestHead, Transport, DEFAULT_CHANNEL_CAPACITY};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Hands every opened exchange to the test instead of the network.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    opened: mpsc::UnboundedSender<(RequestHead, ExchangeIo)>,
    heads: Arc<Mutex<Vec<RequestHead>>>,
}

/// Test side of a [`ScriptedTransport`].
pub(crate) struct Script {
    opened: mpsc::UnboundedReceiver<(RequestHead, ExchangeIo)>,
    heads: Arc<Mutex<Vec<RequestHead>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let heads = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                opened: tx,
                heads: heads.clone(),
            },
            Script { opened: rx, heads },
        )
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, head: RequestHead) -> Exchange {
        let (exchange, io) = exchange(DEFAULT_CHANNEL_CAPACITY);
        self.heads.lock().push(head.clone());
        let _ = self.opened.send((head, io));
        exchange
    }
}

impl Script {
    /// Wait for the next exchange the sender opens.
    pub(crate) async fn next_exchange(&mut self) -> (RequestHead, ExchangeIo) {
        self.opened.recv().await.expect("transport dropped")
    }

    /// Number of exchanges opened so far.
    pub(crate) fn open_count(&self) -> usize {
        self.heads.lock().len()
    }
}
