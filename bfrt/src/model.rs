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


//! Requests, responses and entities exchanged with BF Runtime clients.
//!
//! These mirror the messages of `bfruntime.proto` without depending on any
//! particular protobuf or gRPC binding.

use std::fmt::{self, Display};

use itertools::Itertools;

use crate::status::Status;

/// Pipe id meaning "every pipe of the device".
pub const PIPE_ALL: u32 = 0xffff;

/// Parser id meaning "every parser of the pipe".
pub const PARSER_ALL: u32 = 0xff;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Ingress,
    Egress,
    All,
}

impl From<u32> for Direction {
    fn from(direction: u32) -> Self {
        match direction {
            0 => Direction::Ingress,
            1 => Direction::Egress,
            _ => Direction::All,
        }
    }
}

impl From<Direction> for u32 {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Ingress => 0,
            Direction::Egress => 1,
            Direction::All => 0xff,
        }
    }
}

/// Addresses a device, a pipe (or all of them), a direction and a parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub device_id: u32,
    pub pipe_id: u32,
    pub direction: Direction,
    pub parser_id: u32,
}

impl Target {
    /// Every pipe, direction and parser of `device_id`.
    pub fn device(device_id: u32) -> Target {
        Target {
            device_id,
            pipe_id: PIPE_ALL,
            direction: Direction::All,
            parser_id: PARSER_ALL,
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev {}", self.device_id)?;
        if self.pipe_id != PIPE_ALL {
            write!(f, " pipe {}", self.pipe_id)?;
        }
        match self.direction {
            Direction::Ingress => write!(f, " ingress"),
            Direction::Egress => write!(f, " egress"),
            Direction::All => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Atomicity {
    ContinueOnError,
    RollbackOnError,
    DataplaneAtomic,
}

impl Default for Atomicity {
    fn default() -> Self {
        Atomicity::ContinueOnError
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Unspecified,
    Insert,
    Modify,
    ModifyInc,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyMatch {
    Exact { value: Vec<u8> },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: u16 },
    Range { low: Vec<u8>, high: Vec<u8> },
    Optional { value: Vec<u8>, is_valid: bool },
}

impl KeyMatch {
    pub fn match_type(&self) -> &'static str {
        match self {
            KeyMatch::Exact { .. } => "Exact",
            KeyMatch::Ternary { .. } => "Ternary",
            KeyMatch::Lpm { .. } => "LPM",
            KeyMatch::Range { .. } => "Range",
            KeyMatch::Optional { .. } => "Optional",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyField {
    pub field_id: u32,
    pub value: KeyMatch,
}

impl KeyField {
    pub fn exact<V: Into<Vec<u8>>>(field_id: u32, value: V) -> KeyField {
        KeyField { field_id, value: KeyMatch::Exact { value: value.into() } }
    }
}

/// A table key.  Field order is not significant; [`TableKey::canonical`]
/// sorts fields by id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub fields: Vec<KeyField>,
}

impl TableKey {
    pub fn new(fields: Vec<KeyField>) -> TableKey {
        TableKey { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn canonical(&self) -> TableKey {
        let mut fields = self.fields.clone();
        fields.sort_by_key(|f| f.field_id);
        TableKey { fields }
    }
}

impl Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.fields.iter().map(|field| format!("{}:{}", field.field_id, field.value.match_type())).join(", "))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    Stream(Vec<u8>),
    Float(f32),
    Str(String),
    IntArr(Vec<u32>),
    BoolArr(Vec<bool>),
    StrArr(Vec<String>),
    Bool(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataField {
    pub field_id: u32,
    pub value: DataValue,
}

impl DataField {
    pub fn stream<V: Into<Vec<u8>>>(field_id: u32, value: V) -> DataField {
        DataField { field_id, value: DataValue::Stream(value.into()) }
    }
}

/// Table data: an action (0 when the table has none) and its data fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableData {
    pub action_id: u32,
    pub fields: Vec<DataField>,
}

impl TableData {
    pub fn new(action_id: u32, fields: Vec<DataField>) -> TableData {
        TableData { action_id, fields }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableFlags {
    pub from_hw: bool,
    pub key_only: bool,
    pub mod_del: bool,
    pub reset_ttl: bool,
    pub reset_stats: bool,
}

/// How a table entry is identified: by its key or by an engine handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntrySelector {
    Key(TableKey),
    Handle(u32),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableEntry {
    pub table_id: u32,
    pub selector: Option<EntrySelector>,
    pub data: Option<TableData>,
    pub is_default_entry: bool,
    pub target: Option<Target>,
    pub flags: TableFlags,
}

impl TableEntry {
    pub fn with_key(table_id: u32, key: TableKey, data: Option<TableData>) -> TableEntry {
        TableEntry {
            table_id,
            selector: Some(EntrySelector::Key(key)),
            data,
            ..Default::default()
        }
    }

    /// The key, if the entry is selected by a non-empty key.
    pub fn key(&self) -> Option<&TableKey> {
        match &self.selector {
            Some(EntrySelector::Key(key)) if !key.is_empty() => Some(key),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<u32> {
        match self.selector {
            Some(EntrySelector::Handle(handle)) => Some(handle),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableUsage {
    pub table_id: u32,
    pub usage: u32,
    pub flags: TableFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdleTableMode {
    Poll,
    Notify,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleTable {
    pub ttl_query_interval: u32,
    pub max_ttl: u32,
    pub min_ttl: u32,
    pub mode: IdleTableMode,
    pub enable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeMode {
    All,
    Single,
    UserDefined(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scope {
    pub mode: ScopeMode,
    pub args: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryScope {
    pub gress: Option<Scope>,
    pub pipe: Option<Scope>,
    pub parser: Option<Scope>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFieldMask {
    pub field_id: u32,
    pub mask: Vec<u8>,
}

/// The kinds of table attribute a client can set or read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKind {
    IdleTable,
    EntryScope,
    DynKeyMask,
    ByteCountAdj,
    PortStatusChange,
    StatePullInterval,
}

impl AttributeKind {
    /// The name the table schema uses to advertise support.
    pub fn schema_name(self) -> &'static str {
        match self {
            AttributeKind::IdleTable => "IdleTimeout",
            AttributeKind::EntryScope => "EntryScope",
            AttributeKind::DynKeyMask => "DynamicKeyMask",
            AttributeKind::ByteCountAdj => "MeterByteCountAdjust",
            AttributeKind::PortStatusChange => "port_status_notif_cb",
            AttributeKind::StatePullInterval => "poll_intvl_ms",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    IdleTable(IdleTable),
    EntryScope(EntryScope),
    DynKeyMask(Vec<KeyFieldMask>),
    ByteCountAdj(i32),
    PortStatusChange { enable: bool },
    StatePullInterval { interval_ms: u32 },
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::IdleTable(_) => AttributeKind::IdleTable,
            AttributeValue::EntryScope(_) => AttributeKind::EntryScope,
            AttributeValue::DynKeyMask(_) => AttributeKind::DynKeyMask,
            AttributeValue::ByteCountAdj(_) => AttributeKind::ByteCountAdj,
            AttributeValue::PortStatusChange { .. } => AttributeKind::PortStatusChange,
            AttributeValue::StatePullInterval { .. } => AttributeKind::StatePullInterval,
        }
    }
}

/// A table attribute.  In a read request, `value` only selects the kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableAttribute {
    pub table_id: u32,
    pub value: Option<AttributeValue>,
}

/// Triggers an asynchronous operation ("Sync", "SyncCounters",
/// "SyncRegisters", "UpdateHitState") on a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableOperation {
    pub table_id: u32,
    pub operation: String,
}

/// A name to resolve into an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectName {
    Table { table: String },
    Action { table: String, action: String },
    KeyField { table: String, field: String },
    /// `action` is empty for data fields common to every action.
    DataField { table: String, action: String, field: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectId {
    pub name: ObjectName,
    pub id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleId {
    pub table_id: u32,
    pub selector: Option<EntrySelector>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    TableEntry(TableEntry),
    TableUsage(TableUsage),
    TableAttribute(TableAttribute),
    TableOperation(TableOperation),
    ObjectId(ObjectId),
    Handle(HandleId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub kind: UpdateType,
    pub entity: Option<Entity>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WriteRequest {
    pub target: Target,
    pub client_id: u32,
    pub updates: Vec<Update>,
    pub atomicity: Atomicity,
    pub p4_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadRequest {
    pub target: Target,
    pub client_id: u32,
    pub entities: Vec<Entity>,
    pub p4_name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadResponse {
    pub entities: Vec<Entity>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigAction {
    Bind,
    Verify,
    VerifyAndWarmInitBegin,
    VerifyAndWarmInitBeginAndEnd,
    WarmInitEnd,
    ReconcileAndWarmInitEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DevInitMode {
    FastReconfig,
    Hitless,
}

impl Default for DevInitMode {
    fn default() -> Self {
        DevInitMode::FastReconfig
    }
}

/// One compiled pipeline profile of a program, as carried on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Profile {
    pub profile_name: String,
    pub context: Vec<u8>,
    pub binary: Vec<u8>,
    pub pipe_scope: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardingPipelineConfig {
    pub p4_name: String,
    pub bfruntime_info: Vec<u8>,
    pub profiles: Vec<Profile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetForwardingPipelineConfigRequest {
    pub client_id: u32,
    pub device_id: u32,
    pub action: ConfigAction,
    pub dev_init_mode: DevInitMode,
    pub base_path: String,
    pub configs: Vec<ForwardingPipelineConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetForwardingPipelineConfigResponse {
    pub configs: Vec<ForwardingPipelineConfig>,
    /// The device's fixed-function bf-rt json files, squashed into one document.
    pub non_p4_bfruntime_info: Vec<u8>,
}

/// Which notifications a subscribed client wants on its stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Notifications {
    pub learn: bool,
    pub idle_timeout: bool,
    pub port_status: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscribe {
    pub device_id: u32,
    pub notifications: Notifications,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamRequest {
    Subscribe(Subscribe),
    DigestAck { digest_id: u32, list_id: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessageRequest {
    pub client_id: u32,
    pub update: Option<StreamRequest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WarmInitEvent {
    Started,
    Finished,
}

/// Messages the server pushes on a client's stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Subscribe { subscribe: Subscribe, status: Status },
    WarmInit(WarmInitEvent),
    IdleTimeout { target: Target, entry: TableEntry },
    PortStatusChange { entry: TableEntry, port_up: bool },
}
