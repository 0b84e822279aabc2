//! The work queue every mode, narration, light and volume change goes
//! through. One consumer drains it, so handlers never run concurrently and
//! changes land in the order they were queued.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::{
    error::{Result, SpecBoxError},
    signal::{Control, Notification},
};

/// Messages the device queue holds before producers start failing.
pub const WORK_QUEUE_DEPTH: usize = 10;

/// Runs one queued message at a time on the consumer.
#[async_trait]
pub trait WorkHandler<M: Send + 'static>: Send {
    async fn handle(&mut self, message: M) -> Result<()>;
}

/// Create a queue holding at most `depth` messages. Producers wait at most
/// `send_timeout` for room before giving up.
pub fn channel<M>(depth: usize, send_timeout: Duration) -> (DispatchHandle<M>, Dispatcher<M>) {
    let (sender, receiver) = mpsc::channel(depth.max(1));
    let in_flight = Arc::new(AtomicUsize::new(0));
    (
        DispatchHandle {
            sender,
            in_flight: in_flight.clone(),
            send_timeout,
        },
        Dispatcher {
            receiver,
            in_flight,
        },
    )
}

/// Producer side of the work queue.
#[derive(Debug)]
pub struct DispatchHandle<M> {
    sender: mpsc::Sender<M>,
    /// Queued plus currently being handled
    in_flight: Arc<AtomicUsize>,
    send_timeout: Duration,
}

impl<M> Clone for DispatchHandle<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            in_flight: self.in_flight.clone(),
            send_timeout: self.send_timeout,
        }
    }
}

impl<M: Debug> DispatchHandle<M> {
    /// Queue `message`. Returns false, with nothing queued, if the queue
    /// stays full for the send timeout or the consumer is gone.
    pub async fn dispatch(&self, message: M) -> bool {
        match self.send(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping work item: {}", e);
                false
            }
        }
    }

    /// Like `dispatch`, but reports why nothing was queued.
    pub async fn send(&self, message: M) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.sender.send_timeout(message, self.send_timeout).await;
        let error = match result {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(message)) => {
                debug!("Timed out queueing {:?}", message);
                SpecBoxError::QueueFull
            }
            Err(SendTimeoutError::Closed(message)) => {
                debug!("Consumer gone, not queueing {:?}", message);
                SpecBoxError::ChannelClosed
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Err(error)
    }

    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once every queued message has been handled.
    pub async fn wait_idle(&self, poll: Duration) {
        while self.pending() > 0 {
            debug!("Waiting on {} queued work items", self.pending());
            tokio::time::sleep(poll).await;
        }
    }
}

/// Consumer side of the work queue.
#[derive(Debug)]
pub struct Dispatcher<M> {
    receiver: mpsc::Receiver<M>,
    in_flight: Arc<AtomicUsize>,
}

impl<M: Debug + Send + 'static> Dispatcher<M> {
    /// Handle messages in FIFO order until Abort is posted or every
    /// producer is gone. Messages already queued when Abort arrives are
    /// still handled. The handler is handed back afterwards.
    pub async fn run<H: WorkHandler<M>>(mut self, mut handler: H, control: Arc<Notification<Control>>) -> H {
        info!("Work dispatcher started");
        loop {
            let message = tokio::select! {
                biased;
                message = self.receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                signal = control.wait() => {
                    if signal == Control::Abort {
                        break;
                    }
                    continue;
                }
            };

            debug!("Handling {:?}", message);
            if let Err(e) = handler.handle(message).await {
                error!("Work item failed: {}", e);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        info!("Work dispatcher stopped");
        handler
    }
}
