/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/


//! Per-client state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::config_manager::ConfigManager;
use crate::engine::PipelineEngine;
use crate::model::{Notifications, StreamMessage};
use crate::operation::PendingOperations;
use crate::registry::ProgramInfo;
use crate::session::Session;
use crate::status::{EngineContext, Status};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A program loaded on a device, as bound to a client.
#[derive(Debug)]
pub struct BoundProgram {
    device_id: u32,
    p4_name: String,
    info: Arc<ProgramInfo>,
}

impl BoundProgram {
    pub fn new(engine: &dyn PipelineEngine, device_id: u32, p4_name: &str) -> Result<BoundProgram, Status> {
        let info = engine.program(device_id, p4_name)
            .context(format!("Program {} not found on device {}", p4_name, device_id))?;
        Ok(BoundProgram { device_id, p4_name: p4_name.to_string(), info })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn p4_name(&self) -> &str {
        &self.p4_name
    }

    pub fn info(&self) -> &Arc<ProgramInfo> {
        &self.info
    }
}

/// What the server sends on a client's stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Message(StreamMessage),
    /// Ends the stream with this status.
    Close(Status),
}

struct StreamInner {
    sender: UnboundedSender<Outbound>,
    valid: AtomicBool,
}

/// The sending side of a client's stream.  Once invalidated, sends are
/// silently dropped.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<StreamInner>,
}

impl StreamHandle {
    pub fn channel() -> (StreamHandle, UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded();
        let inner = Arc::new(StreamInner { sender, valid: AtomicBool::new(true) });
        (StreamHandle { inner }, receiver)
    }

    /// Queues `message`.  Returns false if the stream is no longer valid.
    pub fn send(&self, message: StreamMessage) -> bool {
        self.is_valid() && self.inner.sender.unbounded_send(Outbound::Message(message)).is_ok()
    }

    /// Ends the stream with `status` and invalidates it.
    pub fn close(&self, status: Status) {
        if self.inner.valid.swap(false, Ordering::SeqCst) {
            let _ = self.inner.sender.unbounded_send(Outbound::Close(status));
        }
    }

    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle").field("valid", &self.is_valid()).finish()
    }
}

/// A client's stream and the notifications it asked for.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub device_id: u32,
    pub notifications: Notifications,
    pub stream: StreamHandle,
}

/// A client.  A connection without a subscription is *independent*: it
/// exists only for the duration of the call that created it.
#[derive(Debug)]
pub struct Connection {
    client_id: u32,
    session: Session,
    subscription: OnceLock<Subscription>,
    bound: Mutex<Option<Arc<BoundProgram>>>,
    config: Mutex<ConfigManager>,
    pending: PendingOperations,
}

impl Connection {
    pub fn new(client_id: u32, session: Session, subscription: Option<Subscription>) -> Connection {
        let cell = OnceLock::new();
        if let Some(subscription) = subscription {
            let _ = cell.set(subscription);
        }
        Connection {
            client_id,
            session,
            subscription: cell,
            bound: Mutex::new(None),
            config: Mutex::new(ConfigManager::new()),
            pending: PendingOperations::default(),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.get()
    }

    pub fn is_independent(&self) -> bool {
        self.subscription.get().is_none()
    }

    /// Turns an independent connection into a subscribed one.  Fails if the
    /// connection is already subscribed.
    pub(crate) fn promote(&self, subscription: Subscription) -> Result<(), Status> {
        self.subscription.set(subscription)
            .map_err(|_| Status::already_exists(format!("Client {} is already subscribed", self.client_id)))?;
        debug!(client = self.client_id, "promoted to subscribed connection");
        Ok(())
    }

    pub fn notifications(&self) -> Notifications {
        self.subscription().map(|s| s.notifications).unwrap_or_default()
    }

    /// Sends `message` on the client's stream, if it has a valid one.
    pub fn send(&self, message: StreamMessage) -> bool {
        self.subscription().map_or(false, |s| s.stream.send(message))
    }

    pub fn bound_program(&self) -> Option<Arc<BoundProgram>> {
        lock(&self.bound).clone()
    }

    pub(crate) fn set_bound_program(&self, program: Option<Arc<BoundProgram>>) {
        *lock(&self.bound) = program;
    }

    pub fn config_manager(&self) -> MutexGuard<'_, ConfigManager> {
        lock(&self.config)
    }

    pub fn pending(&self) -> &PendingOperations {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::model::WarmInitEvent;

    #[test]
    fn invalid_stream_drops_messages() {
        let (handle, mut receiver) = StreamHandle::channel();
        assert!(handle.send(StreamMessage::WarmInit(WarmInitEvent::Started)));
        handle.invalidate();
        assert!(!handle.send(StreamMessage::WarmInit(WarmInitEvent::Finished)));
        drop(handle);

        let received: Vec<Outbound> = futures::executor::block_on(async {
            let mut all = Vec::new();
            while let Some(message) = receiver.next().await {
                all.push(message);
            }
            all
        });
        assert_eq!(received, vec![Outbound::Message(StreamMessage::WarmInit(WarmInitEvent::Started))]);
    }

    #[test]
    fn close_is_sent_once() {
        let (handle, mut receiver) = StreamHandle::channel();
        handle.close(Status::cancelled("program removed"));
        handle.close(Status::cancelled("again"));
        assert!(!handle.is_valid());
        assert_eq!(receiver.try_next().unwrap(), Some(Outbound::Close(Status::cancelled("program removed"))));
        drop(handle);
        assert_eq!(receiver.try_next().unwrap(), None);
    }
}
