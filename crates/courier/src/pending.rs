//! Single-resolution results for in-flight requests.

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::{RequestHead, ResponseHead};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Mid-flight notifications. Informational only; they never affect the
/// outcome.
#[derive(Clone, Debug)]
pub enum Progress {
    /// The transport exchange was opened with this head.
    RequestOpened(RequestHead),
    /// The response head arrived.
    ResponseStarted(ResponseHead),
}

/// Create a connected producer/consumer pair.
pub fn deferred() -> (Deferred, PendingResult) {
    let (result_tx, result_rx) = oneshot::channel();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    (
        Deferred {
            result: Some(result_tx),
            progress: progress_tx,
        },
        PendingResult {
            result: result_rx,
            progress: progress_rx,
        },
    )
}

/// Producer side: settles exactly once.
///
/// Dropping an unsettled `Deferred` rejects the pending result.
#[derive(Debug)]
pub struct Deferred {
    result: Option<oneshot::Sender<Result<Response>>>,
    progress: mpsc::UnboundedSender<Progress>,
}

impl Deferred {
    /// Resolve with a response. Returns false if already settled.
    pub fn resolve(&mut self, response: Response) -> bool {
        self.settle(Ok(response))
    }

    /// Reject with an error. Returns false if already settled.
    pub fn reject(&mut self, err: Error) -> bool {
        self.settle(Err(err))
    }

    /// Settle with either outcome. Returns false if already settled.
    pub fn settle(&mut self, outcome: Result<Response>) -> bool {
        match self.result.take() {
            // A dropped consumer is not an error for the producer.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Send a progress notification; ignored after settling.
    pub fn notify(&self, progress: Progress) {
        if self.result.is_some() {
            let _ = self.progress.send(progress);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.result.is_none()
    }
}

/// Consumer side: a future resolving to the response or the error.
#[derive(Debug)]
pub struct PendingResult {
    result: oneshot::Receiver<Result<Response>>,
    progress: mpsc::UnboundedReceiver<Progress>,
}

impl PendingResult {
    /// A result that is already rejected.
    pub fn rejected(err: Error) -> Self {
        let (mut deferred, pending) = deferred();
        deferred.reject(err);
        pending
    }

    /// Next progress notification, or `None` once no more can arrive.
    pub async fn progress(&mut self) -> Option<Progress> {
        self.progress.recv().await
    }

    /// Next progress notification if one is already queued.
    pub fn try_progress(&mut self) -> Option<Progress> {
        self.progress.try_recv().ok()
    }
}

impl Future for PendingResult {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(Error::transport_msg(
                    io::ErrorKind::BrokenPipe,
                    "exchange ended without a result",
                ))
            })
        })
    }
}
