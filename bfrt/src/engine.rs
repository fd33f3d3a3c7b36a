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


//! The interface to the pipeline engine: the component that stores table
//! entries and programs them into the forwarding pipeline.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::device_config::DeviceProfile;
use crate::model::{
    AttributeKind,
    AttributeValue,
    DevInitMode,
    TableData,
    TableFlags,
    TableKey,
    Target,
};
use crate::operation::OperationToken;
use crate::registry::{ProgramInfo, TableInfo};
use crate::status::EngineError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Identifies an engine session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u32);

/// Asynchronous table operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CounterSync,
    RegisterSync,
    HitStateUpdate,
}

/// Passed to the engine with an asynchronous operation.  The engine calls
/// [`Completion::complete`] exactly once, from any thread, when the operation
/// finishes.
pub struct Completion {
    token: OperationToken,
    notify: Box<dyn FnOnce(OperationToken) + Send>,
}

impl Completion {
    pub fn new<F>(token: OperationToken, notify: F) -> Completion
        where F: FnOnce(OperationToken) + Send + 'static
    {
        Completion { token, notify: Box::new(notify) }
    }

    pub fn token(&self) -> OperationToken {
        self.token
    }

    pub fn complete(self) {
        (self.notify)(self.token)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("token", &self.token).finish()
    }
}

/// Called when an entry of an idle-timeout table in notify mode ages out.
pub type IdleTimeoutCallback = Arc<dyn Fn(Target, TableKey) + Send + Sync>;

/// Called when a port goes up or down.  The key identifies the port in the
/// port table.
pub type PortStatusCallback = Arc<dyn Fn(TableKey, bool) + Send + Sync>;

/// A notification callback installed along with a table attribute.
#[derive(Clone)]
pub enum Notifier {
    IdleTimeout(IdleTimeoutCallback),
    PortStatus(PortStatusCallback),
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notifier::IdleTimeout(_) => write!(f, "Notifier::IdleTimeout"),
            Notifier::PortStatus(_) => write!(f, "Notifier::PortStatus"),
        }
    }
}

/// Operations the runtime needs from the pipeline engine.
///
/// Table primitives take the session they run in, so that the engine can
/// batch them or roll them back with the session's transaction.
pub trait PipelineEngine: Send + Sync {
    fn session_create(&self) -> EngineResult<SessionHandle>;
    fn session_destroy(&self, session: SessionHandle) -> EngineResult<()>;

    fn begin_transaction(&self, session: SessionHandle, atomic: bool) -> EngineResult<()>;
    fn commit_transaction(&self, session: SessionHandle, hw_synchronous: bool) -> EngineResult<()>;
    fn abort_transaction(&self, session: SessionHandle) -> EngineResult<()>;
    fn begin_batch(&self, session: SessionHandle) -> EngineResult<()>;
    fn flush_batch(&self, session: SessionHandle) -> EngineResult<()>;
    fn end_batch(&self, session: SessionHandle, hw_synchronous: bool) -> EngineResult<()>;
    /// Blocks until every operation queued in `session` reached the hardware.
    fn complete_operations(&self, session: SessionHandle) -> EngineResult<()>;

    /// Names of the programs currently loaded on `device_id`.
    fn program_names(&self, device_id: u32) -> EngineResult<Vec<String>>;
    fn program(&self, device_id: u32, p4_name: &str) -> EngineResult<Arc<ProgramInfo>>;
    /// Paths of the device's fixed-function bf-rt json files.
    fn fixed_file_paths(&self, device_id: u32) -> EngineResult<Vec<PathBuf>>;
    fn warm_init_begin(&self, device_id: u32, mode: DevInitMode) -> EngineResult<()>;
    /// Loads `profile` onto the device, replacing every program on it.
    fn device_add(&self, device_id: u32, profile: &DeviceProfile) -> EngineResult<()>;
    fn warm_init_end(&self, device_id: u32) -> EngineResult<()>;

    fn entry_add(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey, data: &TableData) -> EngineResult<()>;
    fn entry_mod(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey, data: &TableData, reset_ttl: bool) -> EngineResult<()>;
    /// Adds data to (or, with `delete`, removes data from) an existing entry.
    fn entry_mod_inc(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                     key: &TableKey, data: &TableData, delete: bool) -> EngineResult<()>;
    fn entry_del(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey) -> EngineResult<()>;
    fn table_clear(&self, session: SessionHandle, target: &Target, table: &TableInfo) -> EngineResult<()>;
    fn default_entry_set(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                         data: &TableData) -> EngineResult<()>;
    fn default_entry_reset(&self, session: SessionHandle, target: &Target, table: &TableInfo) -> EngineResult<()>;

    fn default_entry_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                         flags: &TableFlags) -> EngineResult<TableData>;
    fn entry_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey, flags: &TableFlags) -> EngineResult<TableData>;
    fn entry_get_by_handle(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                           handle: u32, flags: &TableFlags) -> EngineResult<(TableKey, TableData)>;
    fn entry_handle_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                        key: &TableKey) -> EngineResult<u32>;
    /// Fails with [`EngineError::ObjectNotFound`] if the table is empty.
    fn entry_get_first(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                       flags: &TableFlags) -> EngineResult<(TableKey, TableData)>;
    /// Up to `n` entries following `after`.
    fn entry_get_next_n(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                        after: &TableKey, n: u32, flags: &TableFlags)
                        -> EngineResult<Vec<(TableKey, TableData)>>;
    /// Fails with [`EngineError::NotSupported`] for tables without a usage count.
    fn usage_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 flags: &TableFlags) -> EngineResult<u32>;

    fn attribute_set(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                     value: &AttributeValue, notifier: Option<Notifier>) -> EngineResult<()>;
    fn attribute_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                     kind: AttributeKind) -> EngineResult<AttributeValue>;

    /// Starts an asynchronous operation.  On success the engine owns
    /// `completion`; on failure it must not call it.
    fn operation_execute(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                         kind: OperationKind, completion: Completion) -> EngineResult<()>;
}
