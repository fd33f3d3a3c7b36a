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


use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::engine::{PipelineEngine, SessionHandle};
use crate::status::{EngineContext, Status};

/// A pipeline-engine session: the context in which a client's table
/// operations are batched or run as a transaction.
///
/// The engine session is destroyed when the `Session` is dropped.
pub struct Session {
    engine: Arc<dyn PipelineEngine>,
    handle: SessionHandle,
}

impl Session {
    pub fn new(engine: Arc<dyn PipelineEngine>) -> Result<Session, Status> {
        let handle = engine.session_create().context("Failed to create session")?;
        debug!(session = handle.0, "created session");
        Ok(Session { engine, handle })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn begin_transaction(&self, atomic: bool) -> Result<(), Status> {
        self.engine.begin_transaction(self.handle, atomic).context("Failed to begin transaction")
    }

    pub fn commit_transaction(&self, hw_synchronous: bool) -> Result<(), Status> {
        self.engine.commit_transaction(self.handle, hw_synchronous).context("Failed to commit transaction")
    }

    pub fn abort_transaction(&self) -> Result<(), Status> {
        self.engine.abort_transaction(self.handle).context("Failed to abort transaction")
    }

    pub fn begin_batch(&self) -> Result<(), Status> {
        self.engine.begin_batch(self.handle).context("Failed to begin batch")
    }

    pub fn flush_batch(&self) -> Result<(), Status> {
        self.engine.flush_batch(self.handle).context("Failed to flush batch")
    }

    pub fn end_batch(&self, hw_synchronous: bool) -> Result<(), Status> {
        self.engine.end_batch(self.handle, hw_synchronous).context("Failed to end batch")
    }

    pub fn complete_operations(&self) -> Result<(), Status> {
        self.engine.complete_operations(self.handle).context("Failed to complete operations")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        match self.engine.session_destroy(self.handle) {
            Ok(()) => debug!(session = self.handle.0, "destroyed session"),
            Err(e) => error!(session = self.handle.0, "failed to destroy session ({})", e),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Session").field(&self.handle.0).finish()
    }
}
