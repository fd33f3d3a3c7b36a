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


//! The StreamChannel RPC: a client's subscription and the notifications sent
//! back on it.  The stream also tells the server the client is alive; the
//! client's connection is removed when its stream ends.

use std::sync::Arc;

use futures::channel::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::connection::{Outbound, StreamHandle, Subscription};
use crate::connections::ConnectionRegistry;
use crate::model::{StreamMessage, StreamMessageRequest, StreamRequest, Subscribe};
use crate::server::BfRtServer;
use crate::status::Status;

/// The server side of one client stream.  Dropping it disconnects the
/// client that subscribed on it.
pub struct StreamChannel {
    registry: Arc<ConnectionRegistry>,
    stream: StreamHandle,
    client_id: Option<u32>,
}

impl BfRtServer {
    /// Opens a stream.  Messages for the client arrive on the returned
    /// receiver.
    pub fn stream_channel(&self) -> (StreamChannel, UnboundedReceiver<Outbound>) {
        let (stream, receiver) = StreamHandle::channel();
        let channel = StreamChannel { registry: self.registry().clone(), stream, client_id: None };
        (channel, receiver)
    }
}

impl StreamChannel {
    /// The client subscribed on this stream, if any.
    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    /// False once the server closed the stream.
    pub fn is_open(&self) -> bool {
        self.stream.is_valid()
    }

    /// Handles one message from the client.  A failed subscription closes
    /// the stream; other errors leave it open.
    pub fn handle(&mut self, request: StreamMessageRequest) -> Result<(), Status> {
        match (request.update, self.client_id) {
            (Some(StreamRequest::Subscribe(subscribe)), None) => {
                let result = self.subscribe(request.client_id, subscribe);
                if let Err(e) = &result {
                    self.stream.close(e.clone());
                }
                result
            }
            (Some(StreamRequest::Subscribe(_)), Some(subscribed)) => {
                warn!("Client {} is already subscribed with this channel. Please stop sending subscribe msgs",
                      subscribed);
                Ok(())
            }
            (Some(StreamRequest::DigestAck { digest_id, list_id }), Some(_)) => {
                debug!(client = request.client_id, digest_id, list_id, "digest ack");
                Err(Status::unimplemented("Digest ack is not yet implemented"))
            }
            (update, None) => {
                warn!("ignoring {:?} from client {} before it subscribed", update, request.client_id);
                Ok(())
            }
            (None, Some(_)) => Ok(()),
        }
    }

    fn subscribe(&mut self, client_id: u32, subscribe: Subscribe) -> Result<(), Status> {
        let _guard = self.registry.try_read()?;
        let subscription = Subscription {
            device_id: subscribe.device_id,
            notifications: subscribe.notifications,
            stream: self.stream.clone(),
        };
        let connection = self.registry.add_connection(client_id, Some(subscription))?;
        self.client_id = Some(client_id);
        connection.send(StreamMessage::Subscribe { subscribe, status: Status::ok() });
        info!(client = client_id, device = subscribe.device_id, "client subscribed");
        Ok(())
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if let Some(client_id) = self.client_id {
            self.registry.cleanup_connection(client_id);
            info!(client = client_id, "client closed connection");
        }
    }
}
