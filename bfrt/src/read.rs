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


//! The Read RPC.

use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::engine::PipelineEngine;
use crate::error_reporter::{ErrorReporter, READ_ERROR_MESSAGE};
use crate::model::{
    Entity,
    EntrySelector,
    HandleId,
    ObjectId,
    ReadRequest,
    ReadResponse,
    TableAttribute,
    TableData,
    TableEntry,
    TableKey,
    TableUsage,
    Target,
};
use crate::registry::{ProgramInfo, TableInfo};
use crate::session::Session;
use crate::status::{EngineContext, EngineError, Status};

/// The result of a Read: the entities read, even if some could not be, and
/// the aggregate status of the requested entities.
#[derive(Debug, PartialEq)]
pub struct ReadOutcome {
    pub response: ReadResponse,
    pub status: Result<(), Status>,
}

impl crate::server::BfRtServer {
    /// Reads the entities of `request`.  Fails as a whole only if the call
    /// cannot be set up or asks for something that cannot be read at all.
    pub fn read(&self, request: &ReadRequest, deadline: Deadline) -> Result<ReadOutcome, Status> {
        let call = self.begin_call(request.client_id)?;
        let program = call.program(&request.target, &request.p4_name)?;
        let session = call.connection.session();
        let reader = TableReader {
            engine: self.engine().as_ref(),
            session,
            program: &program,
            target: request.target,
        };

        let mut response = ReadResponse::default();
        let mut reporter = ErrorReporter::new(READ_ERROR_MESSAGE);
        for (index, entity) in request.entities.iter().enumerate() {
            if deadline.is_exceeded() {
                warn!(client = request.client_id, "Read RPC request timed out before entity {}", index);
                return Ok(ReadOutcome {
                    response,
                    status: Err(Status::deadline_exceeded("Read RPC request timed out")),
                });
            }
            let result = match entity {
                Entity::TableEntry(entry) => reader.read_entry(entry, &mut response.entities),
                Entity::TableUsage(usage) => reader.read_usage(usage, &mut response.entities),
                Entity::TableAttribute(attribute) => reader.read_attribute(attribute, &mut response.entities),
                Entity::TableOperation(_) => {
                    return Err(Status::unimplemented("Read operation not available on TableOperation"))
                }
                Entity::ObjectId(object) => reader.read_id(object, &mut response.entities),
                Entity::Handle(handle) => reader.read_handle(handle, &mut response.entities),
            };
            reporter.push(result);
        }
        session.complete_operations()?;
        Ok(ReadOutcome { response, status: reporter.status() })
    }
}

struct TableReader<'a> {
    engine: &'a dyn PipelineEngine,
    session: &'a Session,
    program: &'a ProgramInfo,
    target: Target,
}

/// Keeps the data fields a request asked for; all of them if it named none.
fn select_fields(mut data: TableData, requested: Option<&TableData>) -> TableData {
    if let Some(requested) = requested.filter(|r| !r.fields.is_empty()) {
        data.fields.retain(|f| requested.fields.iter().any(|r| r.field_id == f.field_id));
    }
    data
}

impl TableReader<'_> {
    fn read_entry(&self, entry: &TableEntry, out: &mut Vec<Entity>) -> Result<(), Status> {
        let table = self.program.table(entry.table_id)?;
        if entry.key().is_some() || entry.handle().is_some() {
            return self.read_one(table, entry, out);
        }
        if entry.is_default_entry {
            return self.read_default_entry(table, entry, out);
        }
        let all = self.read_all(table, entry, out);
        // Default entry errors do not fail a wildcard read.
        if let Err(e) = self.read_default_entry(table, entry, out) {
            debug!(table = %table.name, "ignoring default entry read error ({})", e);
        }
        all
    }

    fn response_entry(&self, table: &TableInfo, request: &TableEntry, key: TableKey, data: TableData) -> Entity {
        let data = if request.flags.key_only { None } else { Some(select_fields(data, request.data.as_ref())) };
        Entity::TableEntry(TableEntry {
            table_id: table.id,
            selector: Some(EntrySelector::Key(key)),
            data,
            flags: request.flags,
            ..Default::default()
        })
    }

    fn read_one(&self, table: &TableInfo, entry: &TableEntry, out: &mut Vec<Entity>) -> Result<(), Status> {
        let session = self.session.handle();
        let (key, data) = match &entry.selector {
            Some(EntrySelector::Handle(handle)) => self.engine
                .entry_get_by_handle(session, &self.target, table, *handle, &entry.flags)
                .context(format!("Entry not found in table:{}", table.name))?,
            Some(EntrySelector::Key(key)) => {
                table.check_key(key)?;
                let data = self.engine.entry_get(session, &self.target, table, key, &entry.flags)
                    .context(format!("Entry not found in table:{}", table.name))?;
                (key.clone(), data)
            }
            None => return Err(Status::invalid_argument("Table key cannot be empty")),
        };
        out.push(self.response_entry(table, entry, key, data));
        Ok(())
    }

    fn read_default_entry(&self, table: &TableInfo, entry: &TableEntry, out: &mut Vec<Entity>) -> Result<(), Status> {
        if !table.kind.has_default_entry() {
            return Ok(());
        }
        let data = match self.engine.default_entry_get(self.session.handle(), &self.target, table, &entry.flags) {
            Ok(data) => data,
            Err(EngineError::ObjectNotFound) => return Ok(()),
            Err(e) => return Err(e).context(format!("Error getting default entry of table:{}", table.name)),
        };
        out.push(Entity::TableEntry(TableEntry {
            table_id: table.id,
            data: Some(select_fields(data, entry.data.as_ref())),
            is_default_entry: true,
            flags: entry.flags,
            ..Default::default()
        }));
        Ok(())
    }

    /// Reads every entry of `table`: the first one, then as many more as the
    /// table's usage says it holds.
    fn read_all(&self, table: &TableInfo, entry: &TableEntry, out: &mut Vec<Entity>) -> Result<(), Status> {
        let session = self.session.handle();
        let flags = &entry.flags;
        let action_id = entry.data.as_ref().map_or(0, |d| d.action_id);
        let wanted = |data: &TableData| action_id == 0 || data.action_id == action_id;

        let (first_key, first_data) = match self.engine.entry_get_first(session, &self.target, table, flags) {
            Ok(first) => first,
            Err(EngineError::ObjectNotFound) => return Ok(()),
            Err(e) => return Err(e).context(format!("Error getting first entry of table:{}", table.name)),
        };
        if wanted(&first_data) {
            out.push(self.response_entry(table, entry, first_key.clone(), first_data));
        }

        let usage = match self.engine.usage_get(session, &self.target, table, flags) {
            Ok(usage) => usage,
            // Fully populated tables (counters, registers) have no usage.
            Err(EngineError::NotSupported) => table.size,
            Err(e) => return Err(e).context(format!("Unable to get usage table:{}", table.name)),
        };
        if usage == 0 {
            return Err(Status::unknown(format!("Unable to get usage table:{}: unexpected", table.name)));
        }
        if usage == 1 {
            return Ok(());
        }

        let rest = self.engine.entry_get_next_n(session, &self.target, table, &first_key, usage - 1, flags)
            .context(format!("Get last {} entries failed table:{}", usage - 1, table.name))?;
        for (key, data) in rest.into_iter().filter(|(_, data)| wanted(data)) {
            out.push(self.response_entry(table, entry, key, data));
        }
        Ok(())
    }

    fn read_usage(&self, usage: &TableUsage, out: &mut Vec<Entity>) -> Result<(), Status> {
        let table = self.program.table(usage.table_id)?;
        let count = self.engine.usage_get(self.session.handle(), &self.target, table, &usage.flags)
            .context("Unable to get usage")?;
        out.push(Entity::TableUsage(TableUsage { table_id: table.id, usage: count, flags: usage.flags }));
        Ok(())
    }

    fn read_attribute(&self, attribute: &TableAttribute, out: &mut Vec<Entity>) -> Result<(), Status> {
        let table = self.program.table(attribute.table_id)?;
        let kind = attribute.value.as_ref().map(|v| v.kind())
            .ok_or_else(|| Status::invalid_argument("Invalid Attribute Type."))?;
        if !table.supports_attribute(kind) {
            return Err(Status::unimplemented(format!(
                "Attribute {} is not supported by table {}", kind.schema_name(), table.name)));
        }
        let value = self.engine.attribute_get(self.session.handle(), &self.target, table, kind)
            .context(format!("Failed to get attribute {} of table {}", kind.schema_name(), table.name))?;
        out.push(Entity::TableAttribute(TableAttribute { table_id: table.id, value: Some(value) }));
        Ok(())
    }

    fn read_id(&self, object: &ObjectId, out: &mut Vec<Entity>) -> Result<(), Status> {
        let id = self.program.object_id(&object.name)?;
        out.push(Entity::ObjectId(ObjectId { name: object.name.clone(), id }));
        Ok(())
    }

    fn read_handle(&self, request: &HandleId, out: &mut Vec<Entity>) -> Result<(), Status> {
        let key = match &request.selector {
            Some(EntrySelector::Key(key)) if !key.is_empty() => key,
            _ => return Err(Status::invalid_argument("Invalid key is mandatory for get handle operation.")),
        };
        let table = self.program.table(request.table_id)?;
        table.check_key(key)?;
        let handle = self.engine.entry_handle_get(self.session.handle(), &self.target, table, key)
            .context(format!("Entry not found in table:{}", table.name))?;
        out.push(Entity::Handle(HandleId { table_id: table.id, selector: Some(EntrySelector::Handle(handle)) }));
        Ok(())
    }
}
