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


//! A pipeline engine that keeps tables in memory.
//!
//! It backs the daemon when no hardware is attached, and the tests.  Besides
//! implementing [`PipelineEngine`], it counts the calls made to it, can hold
//! asynchronous operations until told to complete them, and can simulate
//! entries aging out and ports changing state.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, trace};

use crate::connection::lock;
use crate::device_config::DeviceProfile;
use crate::engine::{
    Completion,
    EngineResult,
    Notifier,
    OperationKind,
    PipelineEngine,
    SessionHandle,
};
use crate::model::{
    AttributeKind,
    AttributeValue,
    DataValue,
    DevInitMode,
    IdleTableMode,
    TableData,
    TableFlags,
    TableKey,
    Target,
};
use crate::registry::{PipelineProfile, ProgramInfo, TableInfo};
use crate::status::EngineError;

#[derive(Clone)]
struct StoredEntry {
    data: TableData,
    handle: u32,
    /// Set when the entry aged out, cleared when its TTL is reset.
    aged: bool,
}

#[derive(Clone, Default)]
struct TableState {
    entries: BTreeMap<TableKey, StoredEntry>,
    handles: HashMap<u32, TableKey>,
    next_handle: u32,
    default_entry: Option<TableData>,
    attributes: BTreeMap<AttributeKind, AttributeValue>,
    notifiers: BTreeMap<AttributeKind, Notifier>,
}

impl TableState {
    fn clear(&mut self) {
        self.entries.clear();
        self.handles.clear();
    }

    fn entry(&self, key: &TableKey) -> EngineResult<&StoredEntry> {
        self.entries.get(&key.canonical()).ok_or(EngineError::ObjectNotFound)
    }

    fn entry_mut(&mut self, key: &TableKey) -> EngineResult<&mut StoredEntry> {
        self.entries.get_mut(&key.canonical()).ok_or(EngineError::ObjectNotFound)
    }
}

struct LoadedProgram {
    info: Arc<ProgramInfo>,
    tables: HashMap<u32, TableState>,
}

impl LoadedProgram {
    fn new(info: ProgramInfo) -> LoadedProgram {
        LoadedProgram { info: Arc::new(info), tables: HashMap::new() }
    }
}

#[derive(Default)]
struct Device {
    fixed_paths: Vec<PathBuf>,
    programs: BTreeMap<String, LoadedProgram>,
    warm_init: Option<DevInitMode>,
}

type TableRef = (u32, String, u32);

enum SessionMode {
    Idle,
    Batch,
    /// Table states as they were before the transaction first wrote them.
    Transaction(HashMap<TableRef, TableState>),
}

#[derive(Default)]
struct State {
    devices: BTreeMap<u32, Device>,
    sessions: BTreeMap<u32, SessionMode>,
    next_session: u32,
    hold_operations: bool,
    held: Vec<Completion>,
}

#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

fn session_mode(state: &mut State, session: SessionHandle) -> EngineResult<&mut SessionMode> {
    state.sessions.get_mut(&session.0).ok_or(EngineError::SessionNotFound)
}

fn program_mut<'s>(devices: &'s mut BTreeMap<u32, Device>, target: &Target, table: &TableInfo)
                   -> EngineResult<&'s mut LoadedProgram> {
    let program = devices.get_mut(&target.device_id).ok_or(EngineError::ObjectNotFound)?
        .programs.get_mut(&table.program).ok_or(EngineError::ObjectNotFound)?;
    if !program.info.has_table(table.id) {
        return Err(EngineError::TableNotFound);
    }
    Ok(program)
}

/// The state of `table` for a write in `session`, saved first if the
/// session is in a transaction.
fn table_for_write<'s>(state: &'s mut State, session: SessionHandle, target: &Target, table: &TableInfo)
                       -> EngineResult<&'s mut TableState> {
    let State { sessions, devices, .. } = state;
    let mode = sessions.get_mut(&session.0).ok_or(EngineError::SessionNotFound)?;
    let current = program_mut(devices, target, table)?.tables.entry(table.id).or_default();
    if let SessionMode::Transaction(saved) = mode {
        saved.entry((target.device_id, table.program.clone(), table.id)).or_insert_with(|| current.clone());
    }
    Ok(current)
}

/// Merges `update` into `data` (or, with `delete`, removes its members).
/// Only integer array fields can be modified incrementally.
fn merge_inc(data: &mut TableData, update: &TableData, delete: bool) -> EngineResult<()> {
    for field in &update.fields {
        let members = match &field.value {
            DataValue::IntArr(members) => members,
            _ => return Err(EngineError::InvalidArg),
        };
        let existing = data.fields.iter_mut().find(|f| f.field_id == field.field_id);
        match (existing.map(|f| &mut f.value), delete) {
            (Some(DataValue::IntArr(current)), true) => current.retain(|m| !members.contains(m)),
            (Some(DataValue::IntArr(current)), false) => {
                for m in members {
                    if !current.contains(m) {
                        current.push(*m);
                    }
                }
            }
            (None, true) => return Err(EngineError::ObjectNotFound),
            (None, false) => data.fields.push(field.clone()),
            (Some(_), _) => return Err(EngineError::InvalidArg),
        }
    }
    Ok(())
}

impl MemoryEngine {
    pub fn new() -> MemoryEngine {
        MemoryEngine::default()
    }

    fn record(&self, name: &'static str) {
        trace!(operation = name, "engine call");
        *lock(&self.calls).entry(name).or_default() += 1;
    }

    /// How many times the engine operation `name` was called.
    pub fn calls(&self, name: &str) -> usize {
        lock(&self.calls).get(name).copied().unwrap_or(0)
    }

    pub fn add_device(&self, device_id: u32, fixed_paths: Vec<PathBuf>) {
        lock(&self.state).devices.insert(device_id, Device { fixed_paths, ..Default::default() });
    }

    /// Loads `program` onto `device_id` next to the programs already there.
    pub fn load_program(&self, device_id: u32, program: ProgramInfo) -> EngineResult<()> {
        let mut state = lock(&self.state);
        let device = state.devices.get_mut(&device_id).ok_or(EngineError::ObjectNotFound)?;
        device.programs.insert(program.name().to_string(), LoadedProgram::new(program));
        Ok(())
    }

    pub fn remove_program(&self, device_id: u32, p4_name: &str) -> EngineResult<()> {
        let mut state = lock(&self.state);
        let device = state.devices.get_mut(&device_id).ok_or(EngineError::ObjectNotFound)?;
        device.programs.remove(p4_name).map(|_| ()).ok_or(EngineError::ObjectNotFound)
    }

    /// While set, asynchronous operations are not completed until
    /// [`MemoryEngine::release_held_operations`].
    pub fn hold_operations(&self, hold: bool) {
        lock(&self.state).hold_operations = hold;
    }

    /// Completes the held operations.  Returns how many there were.
    pub fn release_held_operations(&self) -> usize {
        let held = std::mem::take(&mut lock(&self.state).held);
        let count = held.len();
        for completion in held {
            completion.complete();
        }
        count
    }

    fn notifier(&self, device_id: u32, p4_name: &str, table_id: u32, kind: AttributeKind) -> EngineResult<Option<Notifier>> {
        let state = lock(&self.state);
        let program = state.devices.get(&device_id).ok_or(EngineError::ObjectNotFound)?
            .programs.get(p4_name).ok_or(EngineError::ObjectNotFound)?;
        Ok(program.tables.get(&table_id).and_then(|t| t.notifiers.get(&kind)).cloned())
    }

    /// Marks an entry as aged out, notifying the client that enabled idle
    /// timeout notifications on its table.
    pub fn age_entry(&self, device_id: u32, p4_name: &str, table_id: u32, key: &TableKey) -> EngineResult<()> {
        {
            let mut state = lock(&self.state);
            let entry = state.devices.get_mut(&device_id).ok_or(EngineError::ObjectNotFound)?
                .programs.get_mut(p4_name).ok_or(EngineError::ObjectNotFound)?
                .tables.get_mut(&table_id).ok_or(EngineError::ObjectNotFound)?
                .entry_mut(key)?;
            if entry.aged {
                return Ok(());
            }
            entry.aged = true;
        }
        if let Some(Notifier::IdleTimeout(callback)) = self.notifier(device_id, p4_name, table_id, AttributeKind::IdleTable)? {
            callback(Target::device(device_id), key.canonical());
        }
        Ok(())
    }

    /// Reports a port going up or down to the client that enabled port
    /// status notifications on the port table.
    pub fn set_port_status(&self, device_id: u32, p4_name: &str, table_id: u32, port: &TableKey, up: bool)
                           -> EngineResult<()> {
        match self.notifier(device_id, p4_name, table_id, AttributeKind::PortStatusChange)? {
            Some(Notifier::PortStatus(callback)) => {
                callback(port.clone(), up);
                Ok(())
            }
            _ => Err(EngineError::NotReady),
        }
    }

    fn read<R, F>(&self, session: SessionHandle, target: &Target, table: &TableInfo, f: F) -> EngineResult<R>
        where F: FnOnce(&TableState) -> EngineResult<R>
    {
        let mut state = lock(&self.state);
        session_mode(&mut state, session)?;
        let program = program_mut(&mut state.devices, target, table)?;
        let empty = TableState::default();
        f(program.tables.get(&table.id).unwrap_or(&empty))
    }

    fn write<R, F>(&self, session: SessionHandle, target: &Target, table: &TableInfo, f: F) -> EngineResult<R>
        where F: FnOnce(&mut TableState) -> EngineResult<R>
    {
        let mut state = lock(&self.state);
        f(table_for_write(&mut state, session, target, table)?)
    }

    fn set_mode(&self, session: SessionHandle, from_idle: bool, mode: SessionMode) -> EngineResult<()> {
        let mut state = lock(&self.state);
        let current = session_mode(&mut state, session)?;
        match (&*current, from_idle) {
            (SessionMode::Idle, true) => {}
            (SessionMode::Idle, false) => return Err(EngineError::InvalidArg),
            (_, true) => return Err(EngineError::InUse),
            (_, false) => {}
        }
        *current = mode;
        Ok(())
    }
}

impl PipelineEngine for MemoryEngine {
    fn session_create(&self) -> EngineResult<SessionHandle> {
        self.record("session_create");
        let mut state = lock(&self.state);
        state.next_session += 1;
        let handle = state.next_session;
        state.sessions.insert(handle, SessionMode::Idle);
        Ok(SessionHandle(handle))
    }

    fn session_destroy(&self, session: SessionHandle) -> EngineResult<()> {
        self.record("session_destroy");
        lock(&self.state).sessions.remove(&session.0).map(|_| ()).ok_or(EngineError::SessionNotFound)
    }

    fn begin_transaction(&self, session: SessionHandle, _atomic: bool) -> EngineResult<()> {
        self.record("begin_transaction");
        self.set_mode(session, true, SessionMode::Transaction(HashMap::new()))
    }

    fn commit_transaction(&self, session: SessionHandle, _hw_synchronous: bool) -> EngineResult<()> {
        self.record("commit_transaction");
        let mut state = lock(&self.state);
        let mode = session_mode(&mut state, session)?;
        if !matches!(mode, SessionMode::Transaction(_)) {
            return Err(EngineError::InvalidArg);
        }
        *mode = SessionMode::Idle;
        Ok(())
    }

    fn abort_transaction(&self, session: SessionHandle) -> EngineResult<()> {
        self.record("abort_transaction");
        let mut state = lock(&self.state);
        let saved = match std::mem::replace(session_mode(&mut state, session)?, SessionMode::Idle) {
            SessionMode::Transaction(saved) => saved,
            other => {
                *session_mode(&mut state, session)? = other;
                return Err(EngineError::InvalidArg);
            }
        };
        for ((device_id, p4_name, table_id), table) in saved {
            let program = state.devices.get_mut(&device_id).and_then(|d| d.programs.get_mut(&p4_name));
            if let Some(program) = program {
                program.tables.insert(table_id, table);
            }
        }
        debug!(session = session.0, "rolled back transaction");
        Ok(())
    }

    fn begin_batch(&self, session: SessionHandle) -> EngineResult<()> {
        self.record("begin_batch");
        self.set_mode(session, true, SessionMode::Batch)
    }

    fn flush_batch(&self, session: SessionHandle) -> EngineResult<()> {
        self.record("flush_batch");
        match session_mode(&mut lock(&self.state), session)? {
            SessionMode::Batch => Ok(()),
            _ => Err(EngineError::InvalidArg),
        }
    }

    fn end_batch(&self, session: SessionHandle, _hw_synchronous: bool) -> EngineResult<()> {
        self.record("end_batch");
        let mut state = lock(&self.state);
        let mode = session_mode(&mut state, session)?;
        if !matches!(mode, SessionMode::Batch) {
            return Err(EngineError::InvalidArg);
        }
        *mode = SessionMode::Idle;
        Ok(())
    }

    fn complete_operations(&self, session: SessionHandle) -> EngineResult<()> {
        self.record("complete_operations");
        session_mode(&mut lock(&self.state), session).map(|_| ())
    }

    fn program_names(&self, device_id: u32) -> EngineResult<Vec<String>> {
        let state = lock(&self.state);
        let device = state.devices.get(&device_id).ok_or(EngineError::ObjectNotFound)?;
        Ok(device.programs.keys().cloned().collect())
    }

    fn program(&self, device_id: u32, p4_name: &str) -> EngineResult<Arc<ProgramInfo>> {
        let state = lock(&self.state);
        let device = state.devices.get(&device_id).ok_or(EngineError::ObjectNotFound)?;
        device.programs.get(p4_name).map(|p| p.info.clone()).ok_or(EngineError::ObjectNotFound)
    }

    fn fixed_file_paths(&self, device_id: u32) -> EngineResult<Vec<PathBuf>> {
        let state = lock(&self.state);
        state.devices.get(&device_id).map(|d| d.fixed_paths.clone()).ok_or(EngineError::ObjectNotFound)
    }

    fn warm_init_begin(&self, device_id: u32, mode: DevInitMode) -> EngineResult<()> {
        self.record("warm_init_begin");
        let mut state = lock(&self.state);
        let device = state.devices.get_mut(&device_id).ok_or(EngineError::ObjectNotFound)?;
        device.warm_init = Some(mode);
        Ok(())
    }

    fn device_add(&self, device_id: u32, profile: &DeviceProfile) -> EngineResult<()> {
        self.record("device_add");
        let mut programs = BTreeMap::new();
        for config in &profile.programs {
            let json = fs::read(&config.bfrt_path).map_err(|e| {
                error!("cannot read {} ({})", config.bfrt_path.display(), e);
                EngineError::Io
            })?;
            let pipelines = config.pipelines.iter().map(|p| PipelineProfile {
                name: p.profile_name.clone(),
                context_path: p.context_path.clone(),
                binary_path: p.binary_path.clone(),
                pipe_scope: p.pipe_scope.clone(),
            }).collect();
            let info = ProgramInfo::from_json(&config.name, &json, config.bfrt_path.clone(), pipelines)
                .map_err(|e| {
                    error!("cannot load program {} ({})", config.name, e);
                    EngineError::InvalidArg
                })?;
            for pipeline in info.pipelines() {
                debug!(device_id, program = %config.name, profile = %pipeline.name,
                       "pipe mask {:#x}", pipeline.pipe_mask());
            }
            programs.insert(config.name.clone(), LoadedProgram::new(info));
        }
        let mut state = lock(&self.state);
        let device = state.devices.get_mut(&device_id).ok_or(EngineError::ObjectNotFound)?;
        device.programs = programs;
        Ok(())
    }

    fn warm_init_end(&self, device_id: u32) -> EngineResult<()> {
        self.record("warm_init_end");
        let mut state = lock(&self.state);
        let device = state.devices.get_mut(&device_id).ok_or(EngineError::ObjectNotFound)?;
        device.warm_init.take().map(|_| ()).ok_or(EngineError::NotReady)
    }

    fn entry_add(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey, data: &TableData) -> EngineResult<()> {
        self.record("entry_add");
        self.write(session, target, table, |t| {
            let key = key.canonical();
            if t.entries.contains_key(&key) {
                return Err(EngineError::AlreadyExists);
            }
            if table.size > 0 && t.entries.len() >= table.size as usize {
                return Err(EngineError::NoSpace);
            }
            t.next_handle += 1;
            let handle = t.next_handle;
            t.handles.insert(handle, key.clone());
            t.entries.insert(key, StoredEntry { data: data.clone(), handle, aged: false });
            Ok(())
        })
    }

    fn entry_mod(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey, data: &TableData, reset_ttl: bool) -> EngineResult<()> {
        self.record("entry_mod");
        self.write(session, target, table, |t| {
            let entry = t.entry_mut(key)?;
            entry.data = data.clone();
            if reset_ttl {
                entry.aged = false;
            }
            Ok(())
        })
    }

    fn entry_mod_inc(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                     key: &TableKey, data: &TableData, delete: bool) -> EngineResult<()> {
        self.record("entry_mod_inc");
        self.write(session, target, table, |t| merge_inc(&mut t.entry_mut(key)?.data, data, delete))
    }

    fn entry_del(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey) -> EngineResult<()> {
        self.record("entry_del");
        self.write(session, target, table, |t| {
            let removed = t.entries.remove(&key.canonical()).ok_or(EngineError::ObjectNotFound)?;
            t.handles.remove(&removed.handle);
            Ok(())
        })
    }

    fn table_clear(&self, session: SessionHandle, target: &Target, table: &TableInfo) -> EngineResult<()> {
        self.record("table_clear");
        self.write(session, target, table, |t| {
            t.clear();
            Ok(())
        })
    }

    fn default_entry_set(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                         data: &TableData) -> EngineResult<()> {
        self.record("default_entry_set");
        if !table.kind.has_default_entry() {
            return Err(EngineError::NotSupported);
        }
        self.write(session, target, table, |t| {
            t.default_entry = Some(data.clone());
            Ok(())
        })
    }

    fn default_entry_reset(&self, session: SessionHandle, target: &Target, table: &TableInfo) -> EngineResult<()> {
        self.record("default_entry_reset");
        if !table.kind.has_default_entry() {
            return Err(EngineError::NotSupported);
        }
        self.write(session, target, table, |t| {
            t.default_entry = None;
            Ok(())
        })
    }

    fn default_entry_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                         _flags: &TableFlags) -> EngineResult<TableData> {
        self.record("default_entry_get");
        if !table.kind.has_default_entry() {
            return Err(EngineError::NotSupported);
        }
        self.read(session, target, table, |t| t.default_entry.clone().ok_or(EngineError::ObjectNotFound))
    }

    fn entry_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 key: &TableKey, _flags: &TableFlags) -> EngineResult<TableData> {
        self.record("entry_get");
        self.read(session, target, table, |t| t.entry(key).map(|e| e.data.clone()))
    }

    fn entry_get_by_handle(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                           handle: u32, _flags: &TableFlags) -> EngineResult<(TableKey, TableData)> {
        self.record("entry_get_by_handle");
        self.read(session, target, table, |t| {
            let key = t.handles.get(&handle).ok_or(EngineError::ObjectNotFound)?;
            Ok((key.clone(), t.entry(key)?.data.clone()))
        })
    }

    fn entry_handle_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                        key: &TableKey) -> EngineResult<u32> {
        self.record("entry_handle_get");
        self.read(session, target, table, |t| t.entry(key).map(|e| e.handle))
    }

    fn entry_get_first(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                       _flags: &TableFlags) -> EngineResult<(TableKey, TableData)> {
        self.record("entry_get_first");
        self.read(session, target, table, |t| {
            t.entries.iter().next().map(|(k, e)| (k.clone(), e.data.clone())).ok_or(EngineError::ObjectNotFound)
        })
    }

    fn entry_get_next_n(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                        after: &TableKey, n: u32, _flags: &TableFlags)
                        -> EngineResult<Vec<(TableKey, TableData)>> {
        self.record("entry_get_next_n");
        self.read(session, target, table, |t| {
            use std::ops::Bound::{Excluded, Unbounded};
            Ok(t.entries.range((Excluded(after.canonical()), Unbounded))
                .take(n as usize)
                .map(|(k, e)| (k.clone(), e.data.clone()))
                .collect())
        })
    }

    fn usage_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                 _flags: &TableFlags) -> EngineResult<u32> {
        self.record("usage_get");
        if !table.kind.has_usage() {
            return Err(EngineError::NotSupported);
        }
        self.read(session, target, table, |t| Ok(t.entries.len() as u32))
    }

    fn attribute_set(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                     value: &AttributeValue, notifier: Option<Notifier>) -> EngineResult<()> {
        self.record("attribute_set");
        self.write(session, target, table, |t| {
            let kind = value.kind();
            match (value, notifier) {
                (_, Some(notifier)) => {
                    t.notifiers.insert(kind, notifier);
                }
                (AttributeValue::IdleTable(idle), None) if idle.mode == IdleTableMode::Poll => {
                    t.notifiers.remove(&kind);
                }
                _ => {}
            }
            t.attributes.insert(kind, value.clone());
            Ok(())
        })
    }

    fn attribute_get(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                     kind: AttributeKind) -> EngineResult<AttributeValue> {
        self.record("attribute_get");
        self.read(session, target, table, |t| t.attributes.get(&kind).cloned().ok_or(EngineError::ObjectNotFound))
    }

    fn operation_execute(&self, session: SessionHandle, target: &Target, table: &TableInfo,
                         kind: OperationKind, completion: Completion) -> EngineResult<()> {
        self.record("operation_execute");
        let mut state = lock(&self.state);
        session_mode(&mut state, session)?;
        program_mut(&mut state.devices, target, table)?;
        debug!(table = %table.name, ?kind, "executing operation");
        if state.hold_operations {
            state.held.push(completion);
        } else {
            thread::spawn(move || completion.complete());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataField, KeyField};

    const SCHEMA: &str = r#"{"tables": [
        {"name": "pipe.Ingress.fwd", "id": 10, "table_type": "MatchAction_Direct", "size": 2,
         "key": [{"id": 1, "name": "dst", "match_type": "Exact"}],
         "action_specs": [{"id": 100, "name": "Ingress.send", "data": [{"id": 1, "name": "port"}]}]},
        {"name": "pipe.Ingress.mgid", "id": 11, "table_type": "PreMgid", "size": 8,
         "key": [{"id": 1, "name": "$MGID", "match_type": "Exact"}],
         "data": [{"singleton": {"id": 2, "name": "$MULTICAST_NODE_ID"}}]}
    ]}"#;

    fn engine() -> (MemoryEngine, Arc<ProgramInfo>, SessionHandle) {
        let engine = MemoryEngine::new();
        engine.add_device(0, Vec::new());
        let info = ProgramInfo::from_json("fwd", SCHEMA.as_bytes(), "fwd/bf-rt.json".into(), vec![]).unwrap();
        engine.load_program(0, info).unwrap();
        let program = engine.program(0, "fwd").unwrap();
        let session = engine.session_create().unwrap();
        (engine, program, session)
    }

    fn key(value: u8) -> TableKey {
        TableKey::new(vec![KeyField::exact(1, vec![value])])
    }

    fn send(port: u8) -> TableData {
        TableData::new(100, vec![DataField::stream(1, vec![port])])
    }

    #[test]
    fn add_get_and_iterate() {
        let (engine, program, s) = engine();
        let fwd = program.table(10).unwrap();
        let target = Target::device(0);
        engine.entry_add(s, &target, fwd, &key(2), &send(1)).unwrap();
        engine.entry_add(s, &target, fwd, &key(1), &send(2)).unwrap();
        assert_eq!(engine.entry_add(s, &target, fwd, &key(1), &send(3)), Err(EngineError::AlreadyExists));
        assert_eq!(engine.entry_add(s, &target, fwd, &key(3), &send(3)), Err(EngineError::NoSpace));

        let flags = TableFlags::default();
        let (first, _) = engine.entry_get_first(s, &target, fwd, &flags).unwrap();
        assert_eq!(first, key(1));
        let rest = engine.entry_get_next_n(s, &target, fwd, &first, 5, &flags).unwrap();
        assert_eq!(rest, vec![(key(2), send(1))]);
        assert_eq!(engine.usage_get(s, &target, fwd, &flags), Ok(2));

        let handle = engine.entry_handle_get(s, &target, fwd, &key(2)).unwrap();
        assert_eq!(engine.entry_get_by_handle(s, &target, fwd, handle, &flags), Ok((key(2), send(1))));
    }

    #[test]
    fn abort_restores_tables() {
        let (engine, program, s) = engine();
        let fwd = program.table(10).unwrap();
        let target = Target::device(0);
        engine.entry_add(s, &target, fwd, &key(1), &send(1)).unwrap();

        engine.begin_transaction(s, true).unwrap();
        engine.entry_del(s, &target, fwd, &key(1)).unwrap();
        engine.entry_add(s, &target, fwd, &key(2), &send(2)).unwrap();
        engine.abort_transaction(s).unwrap();

        let flags = TableFlags::default();
        assert_eq!(engine.entry_get(s, &target, fwd, &key(1), &flags), Ok(send(1)));
        assert_eq!(engine.entry_get(s, &target, fwd, &key(2), &flags), Err(EngineError::ObjectNotFound));
        assert_eq!(engine.abort_transaction(s), Err(EngineError::InvalidArg));
    }

    #[test]
    fn modify_incremental_merges_members() {
        let (engine, program, s) = engine();
        let mgid = program.table(11).unwrap();
        let target = Target::device(0);
        let nodes = |members: Vec<u32>| TableData::new(0, vec![DataField { field_id: 2, value: DataValue::IntArr(members) }]);
        engine.entry_add(s, &target, mgid, &key(1), &nodes(vec![1, 2])).unwrap();
        engine.entry_mod_inc(s, &target, mgid, &key(1), &nodes(vec![2, 3]), false).unwrap();
        engine.entry_mod_inc(s, &target, mgid, &key(1), &nodes(vec![1]), true).unwrap();
        assert_eq!(engine.entry_get(s, &target, mgid, &key(1), &TableFlags::default()), Ok(nodes(vec![2, 3])));
    }

    #[test]
    fn default_entries_only_on_match_tables() {
        let (engine, program, s) = engine();
        let target = Target::device(0);
        let flags = TableFlags::default();
        let fwd = program.table(10).unwrap();
        assert_eq!(engine.default_entry_get(s, &target, fwd, &flags), Err(EngineError::ObjectNotFound));
        engine.default_entry_set(s, &target, fwd, &send(9)).unwrap();
        assert_eq!(engine.default_entry_get(s, &target, fwd, &flags), Ok(send(9)));
        let mgid = program.table(11).unwrap();
        assert_eq!(engine.default_entry_set(s, &target, mgid, &send(9)), Err(EngineError::NotSupported));
    }

    #[test]
    fn held_operations_complete_on_release() {
        use crate::operation::OperationToken;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (engine, program, s) = engine();
        let fwd = program.table(10).unwrap();
        engine.hold_operations(true);
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let completion = Completion::new(OperationToken { client_id: 1, table_id: 10 }, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        engine.operation_execute(s, &Target::device(0), fwd, OperationKind::HitStateUpdate, completion).unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(engine.release_held_operations(), 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
