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


//! The `BfRuntime` gRPC service, on top of [`BfRtServer`].

use std::sync::Arc;
use std::time::Instant;

use bfrt::model::{
    ReadRequest,
    SetForwardingPipelineConfigRequest,
    StreamMessageRequest,
    WriteRequest,
};
use bfrt::{BfRtServer, Deadline, Outbound, Status};
use futures_util::{FutureExt, SinkExt, StreamExt, TryFutureExt, TryStreamExt};
use grpcio::{
    DuplexSink,
    RequestStream,
    RpcContext,
    RpcStatus,
    ServerStreamingSink,
    UnarySink,
    WriteFlags,
};
use proto::bfruntime as pb;
use proto::bfruntime_grpc::BfRuntime;
use tracing::{debug, error, warn};

use crate::convert::{FromProto, ToProto, rpc_status};

#[derive(Clone)]
pub struct BfRuntimeService {
    server: Arc<BfRtServer>,
}

impl BfRuntimeService {
    pub fn new(server: Arc<BfRtServer>) -> BfRuntimeService {
        BfRuntimeService { server }
    }
}

fn unary_fail<T>(ctx: &RpcContext, sink: UnarySink<T>, status: RpcStatus) {
    let f = sink.fail(status)
        .map_err(|e| error!("failed to send error: {:?}", e))
        .map(|_| ());
    ctx.spawn(f);
}

fn unary_success<T>(ctx: &RpcContext, sink: UnarySink<T>, reply: T) {
    let f = sink
        .success(reply)
        .map_err(|e: grpcio::Error| error!("write failed: {:?}", e))
        .map(|_| ());
    ctx.spawn(f);
}

fn unary_reply<T>(ctx: &RpcContext, sink: UnarySink<T>, reply: Result<T, Status>) {
    match reply {
        Ok(reply) => unary_success(ctx, sink, reply),
        Err(status) => unary_fail(ctx, sink, rpc_status(&status)),
    }
}

/// Sends `reply`, then ends the stream with `status`.
fn server_streaming_reply<T: Send + 'static>(ctx: &RpcContext, mut sink: ServerStreamingSink<T>,
                                             reply: Vec<T>, status: Result<(), Status>) {
    let f = async move {
        for msg in reply {
            sink.send((msg, WriteFlags::default())).await?;
        }
        match status {
            Ok(()) => sink.close().await,
            Err(status) => sink.fail(rpc_status(&status)).await,
        }
    }
    .map_err(|e: grpcio::Error| error!("failed to stream response: {:?}", e))
    .map(|_| ());
    ctx.spawn(f);
}

/// The deadline a client attached to this call as metadata.
fn call_deadline(ctx: &RpcContext) -> Deadline {
    Deadline::from_metadata(Instant::now(), ctx.request_headers().iter())
}

impl BfRuntime for BfRuntimeService {
    fn write(&mut self, ctx: RpcContext, req: pb::WriteRequest, sink: UnarySink<pb::WriteResponse>) {
        let deadline = call_deadline(&ctx);
        let reply = WriteRequest::from_proto(&req)
            .and_then(|request| self.server.write(&request, deadline))
            .map(|()| pb::WriteResponse::new());
        unary_reply(&ctx, sink, reply);
    }

    fn read(&mut self, ctx: RpcContext, req: pb::ReadRequest, sink: ServerStreamingSink<pb::ReadResponse>) {
        let deadline = call_deadline(&ctx);
        let outcome = ReadRequest::from_proto(&req).and_then(|request| self.server.read(&request, deadline));
        match outcome {
            Ok(outcome) => server_streaming_reply(&ctx, sink, vec![outcome.response.to_proto()], outcome.status),
            Err(status) => server_streaming_reply(&ctx, sink, Vec::new(), Err(status)),
        }
    }

    fn set_forwarding_pipeline_config(&mut self, ctx: RpcContext, req: pb::SetForwardingPipelineConfigRequest,
                                      sink: UnarySink<pb::SetForwardingPipelineConfigResponse>) {
        let reply = SetForwardingPipelineConfigRequest::from_proto(&req)
            .and_then(|request| self.server.set_forwarding_pipeline_config(&request))
            .map(|()| pb::SetForwardingPipelineConfigResponse::new());
        unary_reply(&ctx, sink, reply);
    }

    fn get_forwarding_pipeline_config(&mut self, ctx: RpcContext, req: pb::GetForwardingPipelineConfigRequest,
                                      sink: UnarySink<pb::GetForwardingPipelineConfigResponse>) {
        let reply = self.server.get_forwarding_pipeline_config(req.client_id, req.device_id)
            .map(|response| response.to_proto());
        unary_reply(&ctx, sink, reply);
    }

    fn stream_channel(&mut self, ctx: RpcContext, mut stream: RequestStream<pb::StreamMessageRequest>,
                      mut sink: DuplexSink<pb::StreamMessageResponse>) {
        let (mut channel, mut outbound) = self.server.stream_channel();

        // Messages for the client, until the server closes the stream or the
        // client's connection goes away.
        let send = async move {
            while let Some(message) = outbound.next().await {
                match message {
                    Outbound::Message(message) => sink.send((message.to_proto(), WriteFlags::default())).await?,
                    Outbound::Close(status) => return sink.fail(rpc_status(&status)).await,
                }
            }
            sink.close().await
        }
        .map_err(|e: grpcio::Error| debug!("stream_channel send ended: {:?}", e))
        .map(|_| ());
        ctx.spawn(send);

        // Requests from the client.  The channel, and with it the client's
        // connection, is dropped when the client ends its side.
        let receive = async move {
            while let Some(request) = stream.try_next().await? {
                let result = StreamMessageRequest::from_proto(&request)
                    .and_then(|request| channel.handle(request));
                if let Err(status) = result {
                    warn!(client_id = request.client_id, "stream request failed: {}", status);
                }
            }
            Ok(())
        }
        .map_err(|e: grpcio::Error| debug!("stream_channel receive ended: {:?}", e))
        .map(|_| ());
        ctx.spawn(receive);
    }
}
