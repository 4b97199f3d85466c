//! Execution streams
//!
//! A stream is a dedicated thread running enqueued operations strictly in
//! submission order, so a copy-in, kernel, copy-out sequence never reorders.

use crate::{Error, Result};
use crossbeam::channel::{unbounded, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

type Operation = Box<dyn FnOnce() + Send + 'static>;

pub struct Stream {
    device_id: usize,
    label: String,
    sender: Option<Sender<Operation>>,
    handle: Option<JoinHandle<()>>,
}

impl Stream {
    /// Spawn a stream thread for `device_id`
    pub fn spawn(device_id: usize, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let (sender, receiver) = unbounded::<Operation>();

        let thread_label = label.clone();
        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                while let Ok(operation) = receiver.recv() {
                    operation();
                }
                trace!(stream = %thread_label, "Stream drained");
            })
            .map_err(|e| Error::stream(device_id, format!("failed to spawn {}: {}", label, e)))?;

        debug!(device_id, stream = %label, "Created stream");

        Ok(Self {
            device_id,
            label,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue an operation behind everything already submitted
    pub fn enqueue<F>(&self, operation: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::stream(self.device_id, "stream is shut down"))?;
        sender
            .send(Box::new(operation))
            .map_err(|_| Error::stream(self.device_id, format!("{} has stopped", self.label)))
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Closing the channel lets the thread finish queued work and exit
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
