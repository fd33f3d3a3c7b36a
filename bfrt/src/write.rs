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


//! The Write RPC.

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::connections::ConnectionRegistry;
use crate::deadline::Deadline;
use crate::error_reporter::{ErrorReporter, WRITE_ERROR_MESSAGE};
use crate::model::{
    Atomicity,
    AttributeValue,
    Entity,
    EntrySelector,
    IdleTableMode,
    TableAttribute,
    TableData,
    TableEntry,
    TableKey,
    TableOperation,
    Target,
    Update,
    UpdateType,
    WriteRequest,
};
use crate::operation::{NotifyCookie, OperationToken, PendingOperation, WaitOutcome};
use crate::registry::ProgramInfo;
use crate::server::BfRtServer;
use crate::session::Session;
use crate::status::{EngineContext, Status};

impl BfRtServer {
    /// Applies the updates of `request` in order.  Per-update failures are
    /// reported in the aggregate status; failures to set up the call fail it
    /// as a whole.
    pub fn write(&self, request: &WriteRequest, deadline: Deadline) -> Result<(), Status> {
        let call = self.begin_call(request.client_id)?;
        let program = call.program(&request.target, &request.p4_name)?;
        if deadline.is_exceeded() {
            return Err(Status::deadline_exceeded("Write RPC request timed out"));
        }
        let rollback = match request.atomicity {
            Atomicity::ContinueOnError => false,
            Atomicity::RollbackOnError => true,
            Atomicity::DataplaneAtomic => return Err(Status::unimplemented("DATAPLANE_ATOMIC isn't implemented")),
        };

        let session = call.connection.session();
        if rollback {
            session.begin_transaction(true)?;
        } else {
            session.begin_batch()?;
        }

        let mut writer = TableWriter {
            registry: self.registry(),
            connection: &call.connection,
            session,
            program: &program,
            target: request.target,
            pending: Vec::new(),
        };
        let mut reporter = ErrorReporter::new(WRITE_ERROR_MESSAGE);
        let mut aborted = false;
        for (index, update) in request.updates.iter().enumerate() {
            if deadline.is_exceeded() {
                warn!(client = request.client_id, "Write RPC request timed out before update {}", index);
                if rollback {
                    session.abort_transaction()?;
                } else {
                    session.flush_batch()?;
                    session.end_batch(true)?;
                }
                session.complete_operations()?;
                return Err(Status::deadline_exceeded("Write RPC request timed out"));
            }
            let result = writer.write_update(update);
            let failed = result.is_err();
            reporter.push(result);
            if rollback && failed {
                session.abort_transaction()?;
                aborted = true;
                break;
            }
        }

        if rollback {
            if !aborted {
                session.commit_transaction(true)?;
            }
        } else {
            session.flush_batch()?;
            session.end_batch(true)?;
        }
        session.complete_operations()?;
        writer.wait_for_operations(self.config().operation_timeout, deadline);
        reporter.status()
    }
}

/// Applies the updates of one Write call.
struct TableWriter<'a> {
    registry: &'a ConnectionRegistry,
    connection: &'a Connection,
    session: &'a Session,
    program: &'a ProgramInfo,
    target: Target,
    /// Operations issued by this call, in issue order.
    pending: Vec<PendingOperation>,
}

fn key_and_data<'e>(key: Option<&'e TableKey>, data: Option<&'e TableData>)
                    -> Result<(&'e TableKey, &'e TableData), Status> {
    let key = key.ok_or_else(|| Status::invalid_argument("Table key cannot be empty"))?;
    let data = data.ok_or_else(|| Status::invalid_argument("Table data cannot be empty"))?;
    Ok((key, data))
}

impl TableWriter<'_> {
    fn write_update(&mut self, update: &Update) -> Result<(), Status> {
        match &update.entity {
            Some(Entity::TableEntry(entry)) => self.write_entry(update.kind, entry),
            Some(Entity::TableAttribute(attribute)) => self.write_attribute(update.kind, attribute),
            Some(Entity::TableOperation(operation)) => self.write_operation(operation),
            Some(Entity::TableUsage(_)) => Err(Status::unimplemented("Write operation not available on TableUsage")),
            Some(Entity::ObjectId(_)) => Err(Status::unimplemented("Write operation not available on ObjectId")),
            Some(Entity::Handle(_)) => Err(Status::unimplemented("Write operation not available on Handle")),
            // An empty DELETE is taken as a delete of an empty table entry.
            None if update.kind == UpdateType::Delete => self.write_entry(update.kind, &TableEntry::default()),
            None => Err(Status::unimplemented("Invalid update.")),
        }
    }

    fn write_entry(&mut self, kind: UpdateType, entry: &TableEntry) -> Result<(), Status> {
        let table = self.program.table(entry.table_id)?;
        debug!(table = %table.name, ?kind, "write entry");
        if let Some(EntrySelector::Handle(_)) = entry.selector {
            return Err(Status::unimplemented("Writing an entry by handle is not supported"));
        }
        let key = entry.key();
        if entry.is_default_entry && key.is_some() {
            return Err(Status::invalid_argument("Non-empty key for default entry"));
        }
        if let Some(key) = key {
            table.check_key(key)?;
        }
        let data = entry.data.as_ref();
        if let Some(data) = data {
            table.check_data(data)?;
        }

        let engine = self.registry.engine();
        let session = self.session.handle();
        let target = &self.target;
        match (kind, entry.is_default_entry) {
            (UpdateType::Unspecified, _) => Err(Status::invalid_argument("Unspecified update type")),
            (UpdateType::Insert, true) => Err(Status::unimplemented(
                "INSERT of default entry is not supported. Please use MODIFY instead")),
            (UpdateType::Insert, false) => {
                let (key, data) = key_and_data(key, data)?;
                engine.entry_add(session, target, table, key, data)
                    .context(format!("Table Add failed table: {}", table.name))
            }
            (UpdateType::Modify, true) => {
                let data = data.ok_or_else(|| Status::invalid_argument("Table data cannot be empty"))?;
                engine.default_entry_set(session, target, table, data)
                    .context(format!("Table Default entry set failed table: {}", table.name))
            }
            (UpdateType::Modify, false) => {
                let (key, data) = key_and_data(key, data)?;
                engine.entry_mod(session, target, table, key, data, entry.flags.reset_ttl)
                    .context(format!("Table Entry modify failed table: {}", table.name))
            }
            (UpdateType::ModifyInc, _) => {
                let (key, data) = key_and_data(key, data)?;
                engine.entry_mod_inc(session, target, table, key, data, entry.flags.mod_del)
                    .context(format!("Table Entry modify incremental failed table: {}", table.name))
            }
            (UpdateType::Delete, true) => engine.default_entry_reset(session, target, table)
                .context(format!("Table Default Entry reset failed table: {}", table.name)),
            (UpdateType::Delete, false) => match key {
                Some(key) => engine.entry_del(session, target, table, key)
                    .context(format!("Table Entry delete failed table: {}", table.name)),
                None => engine.table_clear(session, target, table)
                    .context(format!("Table Entry delete all failed table: {}", table.name)),
            },
        }
    }

    fn write_attribute(&mut self, kind: UpdateType, attribute: &TableAttribute) -> Result<(), Status> {
        if kind == UpdateType::Delete {
            return Err(Status::invalid_argument("Table attributes cannot be deleted"));
        }
        let table = self.program.table(attribute.table_id)?;
        let value = attribute.value.as_ref()
            .ok_or_else(|| Status::invalid_argument("Invalid Attribute Type."))?;
        if !table.supports_attribute(value.kind()) {
            return Err(Status::unimplemented(format!(
                "Attribute {} is not supported by table {}", value.kind().schema_name(), table.name)));
        }

        let client_id = self.connection.client_id();
        let cookie = NotifyCookie { device_id: self.target.device_id, client_id };
        let notifier = match value {
            AttributeValue::IdleTable(idle) if idle.mode == IdleTableMode::Notify => {
                if !self.connection.notifications().idle_timeout {
                    return Err(Status::invalid_argument(format!(
                        "idletimeout notifications are not enabled for client {}", client_id)));
                }
                Some(self.registry.idle_timeout_notifier(cookie, table.id))
            }
            AttributeValue::PortStatusChange { .. } => {
                if !self.connection.notifications().port_status {
                    return Err(Status::invalid_argument(format!(
                        "Port status change notifications are not enabled for client {}", client_id)));
                }
                Some(self.registry.port_status_notifier(cookie, table.id))
            }
            _ => None,
        };
        self.registry.engine().attribute_set(self.session.handle(), &self.target, table, value, notifier)
            .context(format!("Failed to set attribute {} on table {}", value.kind().schema_name(), table.name))
    }

    /// Issues an asynchronous operation.  Its completion is awaited in
    /// [`TableWriter::wait_for_operations`].
    fn write_operation(&mut self, operation: &TableOperation) -> Result<(), Status> {
        let table = self.program.table(operation.table_id)?;
        let kind = table.operation_kind(&operation.operation).ok_or_else(|| Status::unimplemented(format!(
            "Operation {} is not supported by table {}", operation.operation, table.name)))?;
        let token = OperationToken { client_id: self.connection.client_id(), table_id: table.id };
        let pending = self.connection.pending().register(token);
        self.registry.engine()
            .operation_execute(self.session.handle(), &self.target, table, kind, self.registry.completion(token))
            .context(format!("Operation execute failed table: {}", table.name))?;
        debug!(table = %table.name, ?kind, "issued operation");
        self.pending.push(pending);
        Ok(())
    }

    /// Waits for every operation issued by this call.  A wait is bounded by
    /// `timeout` and by the client's deadline.  An operation that does not
    /// complete in time is logged and otherwise ignored.
    fn wait_for_operations(&mut self, timeout: std::time::Duration, deadline: Deadline) {
        for operation in self.pending.drain(..) {
            let wait = deadline.remaining().map_or(timeout, |left| left.min(timeout));
            if operation.wait(wait) == WaitOutcome::TimedOut {
                warn!(client = operation.token().client_id,
                      "Timed out waiting for completion of operation for table {}", operation.token().table_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::memory::MemoryEngine;
    use crate::registry::ProgramInfo;
    use crate::server::ServerConfig;

    const BFRT: &str = r#"{"tables": [
        {"name": "pipe.Ingress.fwd", "id": 1, "table_type": "MatchAction_Direct", "size": 4,
         "supported_operations": ["UpdateHitState"]}
    ]}"#;

    fn hit_state_update() -> WriteRequest {
        WriteRequest {
            target: Target::device(0),
            client_id: 1,
            updates: vec![Update {
                kind: UpdateType::Modify,
                entity: Some(Entity::TableOperation(TableOperation { table_id: 1, operation: "UpdateHitState".into() })),
            }],
            atomicity: Atomicity::ContinueOnError,
            p4_name: "fwd".into(),
        }
    }

    fn server(timeout: Duration) -> (Arc<MemoryEngine>, BfRtServer) {
        let engine = Arc::new(MemoryEngine::new());
        engine.add_device(0, Vec::new());
        engine.load_program(0, ProgramInfo::from_json("fwd", BFRT.as_bytes(), "fwd/bf-rt.json".into(), vec![]).unwrap())
            .unwrap();
        let server = BfRtServer::new(engine.clone(), ServerConfig { operation_timeout: timeout });
        (engine, server)
    }

    #[test]
    #[traced_test]
    fn slow_operations_are_logged_not_failed() {
        let (engine, server) = server(Duration::from_millis(50));
        engine.hold_operations(true);
        assert_eq!(server.write(&hit_state_update(), Deadline::none()), Ok(()));
        assert!(logs_contain("Timed out waiting for completion of operation for table 1"));

        // The client is gone by the time the operation completes.
        assert_eq!(engine.release_held_operations(), 1);
        assert!(logs_contain("dropping completion"));
    }

    #[test]
    fn completed_operations_end_the_wait() {
        let (engine, server) = server(Duration::from_secs(30));
        let start = std::time::Instant::now();
        server.write(&hit_state_update(), Deadline::none()).unwrap();
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(engine.calls("operation_execute"), 1);
    }
}
