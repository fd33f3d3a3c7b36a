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


//! `bfrt` is the runtime behind a BF Runtime server.  It keeps track of
//! connected clients and their sessions, applies Write and Read requests to a
//! pipeline engine, drives pipeline reconfiguration through warm init, and
//! delivers notifications to subscribed clients.
//!
//! The runtime does not depend on any RPC framework: the `bfrtd` daemon
//! converts gRPC messages to and from the types in [`model`] and calls into a
//! [`BfRtServer`].

pub mod config_manager;
pub mod connection;
pub mod connections;
pub mod deadline;
pub mod device_config;
pub mod engine;
pub mod error_reporter;
pub mod memory;
pub mod model;
pub mod operation;
pub mod read;
pub mod registry;
pub mod server;
pub mod session;
pub mod status;
pub mod stream;
pub mod write;

pub use connection::Outbound;
pub use deadline::Deadline;
pub use engine::PipelineEngine;
pub use memory::MemoryEngine;
pub use read::ReadOutcome;
pub use registry::ProgramInfo;
pub use server::{BfRtServer, ServerConfig};
pub use status::{Code, EngineError, Status};
pub use stream::StreamChannel;
