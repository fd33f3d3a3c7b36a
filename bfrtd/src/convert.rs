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


//! Conversions between the generated `bfruntime.proto` messages and the
//! `bfrt` request, response and entity types.
//!
//! Both sides are foreign to this crate, so conversions go through the
//! [`FromProto`] and [`ToProto`] traits instead of `From`.

use bfrt::model::{
    Atomicity,
    AttributeValue,
    ConfigAction,
    DataField,
    DataValue,
    DevInitMode,
    Direction,
    Entity,
    EntryScope,
    EntrySelector,
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigResponse,
    HandleId,
    IdleTable,
    IdleTableMode,
    KeyField,
    KeyFieldMask,
    KeyMatch,
    Notifications,
    ObjectId,
    ObjectName,
    Profile,
    ReadRequest,
    ReadResponse,
    Scope,
    ScopeMode,
    SetForwardingPipelineConfigRequest,
    StreamMessage,
    StreamMessageRequest,
    StreamRequest,
    Subscribe,
    TableAttribute,
    TableData,
    TableEntry,
    TableFlags,
    TableKey,
    TableOperation,
    TableUsage,
    Target,
    Update,
    UpdateType,
    WarmInitEvent,
    WriteRequest,
};
use bfrt::Status;
use grpcio::{RpcStatus, RpcStatusCode};
use proto::bfruntime as pb;
use protobuf::{Message, RepeatedField, SingularPtrField, well_known_types::Any};
use tracing::error;

/// Builds a `bfrt` value from a protobuf message.  Fails with
/// `INVALID_ARGUMENT` on messages that leave a required choice unset.
pub trait FromProto<P>: Sized {
    fn from_proto(p: &P) -> Result<Self, Status>;
}

pub trait ToProto<P> {
    fn to_proto(&self) -> P;
}

fn from_protos<P, T: FromProto<P>>(items: &[P]) -> Result<Vec<T>, Status> {
    items.iter().map(T::from_proto).collect()
}

fn to_protos<P, T: ToProto<P>>(items: &[T]) -> RepeatedField<P> {
    items.iter().map(T::to_proto).collect()
}

fn unset(what: &str) -> Status {
    Status::invalid_argument(format!("{} not set", what))
}

impl FromProto<pb::TargetDevice> for Target {
    fn from_proto(t: &pb::TargetDevice) -> Result<Self, Status> {
        Ok(Target {
            device_id: t.device_id,
            pipe_id: t.pipe_id,
            direction: Direction::from(t.direction),
            parser_id: t.prsr_id,
        })
    }
}

impl ToProto<pb::TargetDevice> for Target {
    fn to_proto(&self) -> pb::TargetDevice {
        pb::TargetDevice {
            device_id: self.device_id,
            pipe_id: self.pipe_id,
            direction: self.direction.into(),
            prsr_id: self.parser_id,
            ..Default::default()
        }
    }
}

impl FromProto<pb::KeyField> for KeyField {
    fn from_proto(f: &pb::KeyField) -> Result<Self, Status> {
        use pb::KeyField_oneof_match_type as Match;
        let value = match &f.match_type {
            Some(Match::exact(m)) => KeyMatch::Exact { value: m.value.clone() },
            Some(Match::ternary(m)) => KeyMatch::Ternary { value: m.value.clone(), mask: m.mask.clone() },
            Some(Match::lpm(m)) => {
                let prefix_len = u16::try_from(m.prefix_len).map_err(|_| Status::invalid_argument(format!(
                    "Invalid prefix length {} for key field {}", m.prefix_len, f.field_id)))?;
                KeyMatch::Lpm { value: m.value.clone(), prefix_len }
            }
            Some(Match::range(m)) => KeyMatch::Range { low: m.low.clone(), high: m.high.clone() },
            Some(Match::optional(m)) => KeyMatch::Optional { value: m.value.clone(), is_valid: m.is_valid },
            None => return Err(unset(&format!("Match type of key field {}", f.field_id))),
        };
        Ok(KeyField { field_id: f.field_id, value })
    }
}

impl ToProto<pb::KeyField> for KeyField {
    fn to_proto(&self) -> pb::KeyField {
        use pb::KeyField_oneof_match_type as Match;
        let match_type = match &self.value {
            KeyMatch::Exact { value } => Match::exact(pb::KeyField_Exact {
                value: value.clone(),
                ..Default::default()
            }),
            KeyMatch::Ternary { value, mask } => Match::ternary(pb::KeyField_Ternary {
                value: value.clone(),
                mask: mask.clone(),
                ..Default::default()
            }),
            KeyMatch::Lpm { value, prefix_len } => Match::lpm(pb::KeyField_LPM {
                value: value.clone(),
                prefix_len: i32::from(*prefix_len),
                ..Default::default()
            }),
            KeyMatch::Range { low, high } => Match::range(pb::KeyField_Range {
                low: low.clone(),
                high: high.clone(),
                ..Default::default()
            }),
            KeyMatch::Optional { value, is_valid } => Match::optional(pb::KeyField_Optional {
                value: value.clone(),
                is_valid: *is_valid,
                ..Default::default()
            }),
        };
        pb::KeyField { field_id: self.field_id, match_type: Some(match_type), ..Default::default() }
    }
}

impl FromProto<pb::TableKey> for TableKey {
    fn from_proto(k: &pb::TableKey) -> Result<Self, Status> {
        Ok(TableKey::new(from_protos(&k.fields)?))
    }
}

impl ToProto<pb::TableKey> for TableKey {
    fn to_proto(&self) -> pb::TableKey {
        pb::TableKey { fields: to_protos(&self.fields), ..Default::default() }
    }
}

impl FromProto<pb::DataField> for DataField {
    fn from_proto(f: &pb::DataField) -> Result<Self, Status> {
        use pb::DataField_oneof_value as Value;
        let value = match &f.value {
            Some(Value::stream(v)) => DataValue::Stream(v.clone()),
            Some(Value::float_val(v)) => DataValue::Float(*v),
            Some(Value::str_val(v)) => DataValue::Str(v.clone()),
            Some(Value::int_arr_val(v)) => DataValue::IntArr(v.val.clone()),
            Some(Value::bool_arr_val(v)) => DataValue::BoolArr(v.val.clone()),
            Some(Value::bool_val(v)) => DataValue::Bool(*v),
            Some(Value::str_arr_val(v)) => DataValue::StrArr(v.val.to_vec()),
            None => return Err(unset(&format!("Value of data field {}", f.field_id))),
        };
        Ok(DataField { field_id: f.field_id, value })
    }
}

impl ToProto<pb::DataField> for DataField {
    fn to_proto(&self) -> pb::DataField {
        use pb::DataField_oneof_value as Value;
        let value = match &self.value {
            DataValue::Stream(v) => Value::stream(v.clone()),
            DataValue::Float(v) => Value::float_val(*v),
            DataValue::Str(v) => Value::str_val(v.clone()),
            DataValue::IntArr(v) => Value::int_arr_val(pb::DataField_IntArray { val: v.clone(), ..Default::default() }),
            DataValue::BoolArr(v) => Value::bool_arr_val(pb::DataField_BoolArray { val: v.clone(), ..Default::default() }),
            DataValue::Bool(v) => Value::bool_val(*v),
            DataValue::StrArr(v) => Value::str_arr_val(pb::DataField_StrArray {
                val: RepeatedField::from_vec(v.clone()),
                ..Default::default()
            }),
        };
        pb::DataField { field_id: self.field_id, value: Some(value), ..Default::default() }
    }
}

impl FromProto<pb::TableData> for TableData {
    fn from_proto(d: &pb::TableData) -> Result<Self, Status> {
        Ok(TableData::new(d.action_id, from_protos(&d.fields)?))
    }
}

impl ToProto<pb::TableData> for TableData {
    fn to_proto(&self) -> pb::TableData {
        pb::TableData { action_id: self.action_id, fields: to_protos(&self.fields), ..Default::default() }
    }
}

/// Merges `table_flags` with the deprecated read and modify-increment flags
/// older clients still send.
fn table_flags(flags: Option<&pb::TableFlags>, read: Option<&pb::TableReadFlag>,
               mod_inc: Option<&pb::TableModIncFlag>) -> TableFlags {
    let mut merged = flags.map(|f| TableFlags {
        from_hw: f.from_hw,
        key_only: f.key_only,
        mod_del: f.mod_del,
        reset_ttl: f.reset_ttl,
        reset_stats: f.reset_stats,
    }).unwrap_or_default();
    if let Some(read) = read {
        merged.from_hw |= read.from_hw;
        merged.key_only |= read.key_only;
    }
    if let Some(mod_inc) = mod_inc {
        merged.mod_del |= mod_inc.field_type == pb::TableModIncFlag_Type::MOD_INC_DELETE;
    }
    merged
}

impl ToProto<pb::TableFlags> for TableFlags {
    fn to_proto(&self) -> pb::TableFlags {
        pb::TableFlags {
            from_hw: self.from_hw,
            key_only: self.key_only,
            mod_del: self.mod_del,
            reset_ttl: self.reset_ttl,
            reset_stats: self.reset_stats,
            ..Default::default()
        }
    }
}

fn optional_flags(flags: &TableFlags) -> SingularPtrField<pb::TableFlags> {
    if *flags == TableFlags::default() {
        SingularPtrField::none()
    } else {
        SingularPtrField::some(flags.to_proto())
    }
}

impl FromProto<pb::TableEntry> for TableEntry {
    /// The entry's target, if any, carries device 0 until the enclosing
    /// request fills in its own device.
    fn from_proto(e: &pb::TableEntry) -> Result<Self, Status> {
        use pb::TableEntry_oneof_value as Value;
        let selector = match &e.value {
            Some(Value::key(key)) => Some(EntrySelector::Key(TableKey::from_proto(key)?)),
            Some(Value::handle_id(handle)) => Some(EntrySelector::Handle(*handle)),
            None => None,
        };
        let target = e.entry_tgt.as_ref().map(|t| Target {
            device_id: 0,
            pipe_id: t.pipe_id,
            direction: Direction::from(t.direction),
            parser_id: t.prsr_id,
        });
        Ok(TableEntry {
            table_id: e.table_id,
            selector,
            data: e.data.as_ref().map(TableData::from_proto).transpose()?,
            is_default_entry: e.is_default_entry,
            target,
            flags: table_flags(e.table_flags.as_ref(), e.table_read_flag.as_ref(), e.table_mod_inc_flag.as_ref()),
        })
    }
}

impl ToProto<pb::TableEntry> for TableEntry {
    fn to_proto(&self) -> pb::TableEntry {
        use pb::TableEntry_oneof_value as Value;
        let value = self.selector.as_ref().map(|selector| match selector {
            EntrySelector::Key(key) => Value::key(key.to_proto()),
            EntrySelector::Handle(handle) => Value::handle_id(*handle),
        });
        let entry_tgt = self.target.map(|t| pb::EntryTgt {
            pipe_id: t.pipe_id,
            direction: t.direction.into(),
            prsr_id: t.parser_id,
            ..Default::default()
        });
        pb::TableEntry {
            table_id: self.table_id,
            value,
            data: self.data.as_ref().map(TableData::to_proto).into(),
            is_default_entry: self.is_default_entry,
            entry_tgt: entry_tgt.into(),
            table_flags: optional_flags(&self.flags),
            ..Default::default()
        }
    }
}

impl FromProto<pb::TableUsage> for TableUsage {
    fn from_proto(u: &pb::TableUsage) -> Result<Self, Status> {
        Ok(TableUsage {
            table_id: u.table_id,
            usage: u.usage,
            flags: table_flags(u.table_flags.as_ref(), u.table_read_flag.as_ref(), None),
        })
    }
}

impl ToProto<pb::TableUsage> for TableUsage {
    fn to_proto(&self) -> pb::TableUsage {
        pb::TableUsage {
            table_id: self.table_id,
            usage: self.usage,
            table_flags: optional_flags(&self.flags),
            ..Default::default()
        }
    }
}

fn scope_from_proto(mode: &pb::Mode) -> Scope {
    use pb::Mode_oneof_scope as ModeScope;
    let mode_kind = match mode.scope {
        Some(ModeScope::predef(pb::Mode_PredefinedMode::SINGLE)) => ScopeMode::Single,
        Some(ModeScope::user_defined(mask)) => ScopeMode::UserDefined(mask),
        Some(ModeScope::predef(pb::Mode_PredefinedMode::ALL)) | None => ScopeMode::All,
    };
    Scope { mode: mode_kind, args: mode.args }
}

fn scope_to_proto(scope: &Scope) -> pb::Mode {
    use pb::Mode_oneof_scope as ModeScope;
    let mode = match scope.mode {
        ScopeMode::All => ModeScope::predef(pb::Mode_PredefinedMode::ALL),
        ScopeMode::Single => ModeScope::predef(pb::Mode_PredefinedMode::SINGLE),
        ScopeMode::UserDefined(mask) => ModeScope::user_defined(mask),
    };
    pb::Mode { scope: Some(mode), args: scope.args, ..Default::default() }
}

impl FromProto<pb::TableAttribute> for TableAttribute {
    fn from_proto(a: &pb::TableAttribute) -> Result<Self, Status> {
        use pb::TableAttribute_oneof_attribute as Attribute;
        let value = a.attribute.as_ref().map(|attribute| match attribute {
            Attribute::idle_table(idle) => AttributeValue::IdleTable(IdleTable {
                ttl_query_interval: idle.ttl_query_interval,
                max_ttl: idle.max_ttl,
                min_ttl: idle.min_ttl,
                mode: match idle.idle_table_mode {
                    pb::IdleTable_IdleTableMode::IDLE_TABLE_POLL_MODE => IdleTableMode::Poll,
                    pb::IdleTable_IdleTableMode::IDLE_TABLE_NOTIFY_MODE => IdleTableMode::Notify,
                },
                enable: idle.enable,
            }),
            Attribute::entry_scope(scope) => AttributeValue::EntryScope(EntryScope {
                gress: scope.gress_scope.as_ref().map(scope_from_proto),
                pipe: scope.pipe_scope.as_ref().map(scope_from_proto),
                parser: scope.prsr_scope.as_ref().map(scope_from_proto),
            }),
            Attribute::dyn_key_mask(mask) => AttributeValue::DynKeyMask(mask.fields.iter().map(|f| KeyFieldMask {
                field_id: f.field_id,
                mask: f.mask.clone(),
            }).collect()),
            Attribute::byte_count_adj(adj) => AttributeValue::ByteCountAdj(adj.byte_count_adjust),
            Attribute::port_status_notify(chg) => AttributeValue::PortStatusChange { enable: chg.enable },
            Attribute::intvl_ms(intvl) => AttributeValue::StatePullInterval { interval_ms: intvl.intvl_val },
        });
        Ok(TableAttribute { table_id: a.table_id, value })
    }
}

impl ToProto<pb::TableAttribute> for TableAttribute {
    fn to_proto(&self) -> pb::TableAttribute {
        use pb::TableAttribute_oneof_attribute as Attribute;
        let attribute = self.value.as_ref().map(|value| match value {
            AttributeValue::IdleTable(idle) => Attribute::idle_table(pb::IdleTable {
                ttl_query_interval: idle.ttl_query_interval,
                max_ttl: idle.max_ttl,
                min_ttl: idle.min_ttl,
                idle_table_mode: match idle.mode {
                    IdleTableMode::Poll => pb::IdleTable_IdleTableMode::IDLE_TABLE_POLL_MODE,
                    IdleTableMode::Notify => pb::IdleTable_IdleTableMode::IDLE_TABLE_NOTIFY_MODE,
                },
                enable: idle.enable,
                ..Default::default()
            }),
            AttributeValue::EntryScope(scope) => Attribute::entry_scope(pb::EntryScope {
                gress_scope: scope.gress.as_ref().map(scope_to_proto).into(),
                pipe_scope: scope.pipe.as_ref().map(scope_to_proto).into(),
                prsr_scope: scope.parser.as_ref().map(scope_to_proto).into(),
                ..Default::default()
            }),
            AttributeValue::DynKeyMask(fields) => Attribute::dyn_key_mask(pb::DynKeyMask {
                fields: fields.iter().map(|f| pb::KeyFieldMask {
                    field_id: f.field_id,
                    mask: f.mask.clone(),
                    ..Default::default()
                }).collect(),
                ..Default::default()
            }),
            AttributeValue::ByteCountAdj(adjust) => Attribute::byte_count_adj(pb::ByteCountAdj {
                byte_count_adjust: *adjust,
                ..Default::default()
            }),
            AttributeValue::PortStatusChange { enable } => Attribute::port_status_notify(pb::PortStatusChg {
                enable: *enable,
                ..Default::default()
            }),
            AttributeValue::StatePullInterval { interval_ms } => Attribute::intvl_ms(pb::StatePullIntvl {
                intvl_val: *interval_ms,
                ..Default::default()
            }),
        });
        pb::TableAttribute { table_id: self.table_id, attribute, ..Default::default() }
    }
}

impl FromProto<pb::ObjectId> for ObjectId {
    fn from_proto(o: &pb::ObjectId) -> Result<Self, Status> {
        use pb::ObjectId_TableObject_oneof_names as Names;
        use pb::ObjectId_oneof_object as Object;
        let object = match &o.object {
            Some(Object::table_object(object)) => object,
            None => return Err(unset("Object id name")),
        };
        let table = object.table_name.clone();
        let name = match &object.names {
            None => ObjectName::Table { table },
            Some(Names::action_name(a)) => ObjectName::Action { table, action: a.action.clone() },
            Some(Names::key_field_name(k)) => ObjectName::KeyField { table, field: k.field.clone() },
            Some(Names::data_field_name(d)) => ObjectName::DataField {
                table,
                action: d.action.clone(),
                field: d.field.clone(),
            },
        };
        Ok(ObjectId { name, id: o.id })
    }
}

impl ToProto<pb::ObjectId> for ObjectId {
    fn to_proto(&self) -> pb::ObjectId {
        use pb::ObjectId_TableObject_oneof_names as Names;
        let (table_name, names) = match &self.name {
            ObjectName::Table { table } => (table, None),
            ObjectName::Action { table, action } => (table, Some(Names::action_name(pb::ObjectId_ActionName {
                action: action.clone(),
                ..Default::default()
            }))),
            ObjectName::KeyField { table, field } => (table, Some(Names::key_field_name(pb::ObjectId_KeyFieldName {
                field: field.clone(),
                ..Default::default()
            }))),
            ObjectName::DataField { table, action, field } => {
                (table, Some(Names::data_field_name(pb::ObjectId_DataFieldName {
                    action: action.clone(),
                    field: field.clone(),
                    ..Default::default()
                })))
            }
        };
        let object = pb::ObjectId_TableObject { table_name: table_name.clone(), names, ..Default::default() };
        pb::ObjectId {
            object: Some(pb::ObjectId_oneof_object::table_object(object)),
            id: self.id,
            ..Default::default()
        }
    }
}

impl FromProto<pb::HandleId> for HandleId {
    fn from_proto(h: &pb::HandleId) -> Result<Self, Status> {
        use pb::HandleId_oneof_value as Value;
        let selector = match &h.value {
            Some(Value::key(key)) => Some(EntrySelector::Key(TableKey::from_proto(key)?)),
            Some(Value::handle_id(handle)) => Some(EntrySelector::Handle(*handle)),
            None => None,
        };
        Ok(HandleId { table_id: h.table_id, selector })
    }
}

impl ToProto<pb::HandleId> for HandleId {
    fn to_proto(&self) -> pb::HandleId {
        use pb::HandleId_oneof_value as Value;
        let value = self.selector.as_ref().map(|selector| match selector {
            EntrySelector::Key(key) => Value::key(key.to_proto()),
            EntrySelector::Handle(handle) => Value::handle_id(*handle),
        });
        pb::HandleId { table_id: self.table_id, value, ..Default::default() }
    }
}

impl FromProto<pb::Entity> for Entity {
    fn from_proto(e: &pb::Entity) -> Result<Self, Status> {
        use pb::Entity_oneof_entity as Kind;
        Ok(match &e.entity {
            Some(Kind::table_entry(entry)) => Entity::TableEntry(TableEntry::from_proto(entry)?),
            Some(Kind::table_usage(usage)) => Entity::TableUsage(TableUsage::from_proto(usage)?),
            Some(Kind::table_attribute(attribute)) => Entity::TableAttribute(TableAttribute::from_proto(attribute)?),
            Some(Kind::table_operation(operation)) => Entity::TableOperation(TableOperation {
                table_id: operation.table_id,
                operation: operation.table_operations_type.clone(),
            }),
            Some(Kind::object_id(object)) => Entity::ObjectId(ObjectId::from_proto(object)?),
            Some(Kind::handle(handle)) => Entity::Handle(HandleId::from_proto(handle)?),
            None => return Err(unset("Entity")),
        })
    }
}

impl ToProto<pb::Entity> for Entity {
    fn to_proto(&self) -> pb::Entity {
        use pb::Entity_oneof_entity as Kind;
        let entity = match self {
            Entity::TableEntry(entry) => Kind::table_entry(entry.to_proto()),
            Entity::TableUsage(usage) => Kind::table_usage(usage.to_proto()),
            Entity::TableAttribute(attribute) => Kind::table_attribute(attribute.to_proto()),
            Entity::TableOperation(operation) => Kind::table_operation(pb::TableOperation {
                table_id: operation.table_id,
                table_operations_type: operation.operation.clone(),
                ..Default::default()
            }),
            Entity::ObjectId(object) => Kind::object_id(object.to_proto()),
            Entity::Handle(handle) => Kind::handle(handle.to_proto()),
        };
        pb::Entity { entity: Some(entity), ..Default::default() }
    }
}

/// Gives per-entry targets the device of the request that carries them.
fn on_device(mut entity: Entity, device_id: u32) -> Entity {
    if let Entity::TableEntry(TableEntry { target: Some(target), .. }) = &mut entity {
        target.device_id = device_id;
    }
    entity
}

impl FromProto<pb::Update> for Update {
    /// An update whose entity is missing or empty keeps `entity: None`, which
    /// fails only that update.
    fn from_proto(u: &pb::Update) -> Result<Self, Status> {
        let kind = match u.field_type {
            pb::Update_Type::UNSPECIFIED => UpdateType::Unspecified,
            pb::Update_Type::INSERT => UpdateType::Insert,
            pb::Update_Type::MODIFY => UpdateType::Modify,
            pb::Update_Type::MODIFY_INC => UpdateType::ModifyInc,
            pb::Update_Type::DELETE => UpdateType::Delete,
        };
        let entity = match u.entity.as_ref() {
            Some(entity) if entity.entity.is_some() => Some(Entity::from_proto(entity)?),
            _ => None,
        };
        Ok(Update { kind, entity })
    }
}

impl FromProto<pb::WriteRequest> for WriteRequest {
    fn from_proto(r: &pb::WriteRequest) -> Result<Self, Status> {
        let target = Target::from_proto(r.get_target())?;
        let mut updates: Vec<Update> = from_protos(&r.updates)?;
        for update in &mut updates {
            update.entity = update.entity.take().map(|e| on_device(e, target.device_id));
        }
        let atomicity = match r.atomicity {
            pb::WriteRequest_Atomicity::CONTINUE_ON_ERROR => Atomicity::ContinueOnError,
            pb::WriteRequest_Atomicity::ROLLBACK_ON_ERROR => Atomicity::RollbackOnError,
            pb::WriteRequest_Atomicity::DATAPLANE_ATOMIC => Atomicity::DataplaneAtomic,
        };
        Ok(WriteRequest { target, client_id: r.client_id, updates, atomicity, p4_name: r.p4_name.clone() })
    }
}

impl FromProto<pb::ReadRequest> for ReadRequest {
    fn from_proto(r: &pb::ReadRequest) -> Result<Self, Status> {
        let target = Target::from_proto(r.get_target())?;
        let entities = r.entities.iter()
            .map(|e| Entity::from_proto(e).map(|e| on_device(e, target.device_id)))
            .collect::<Result<_, _>>()?;
        Ok(ReadRequest { target, client_id: r.client_id, entities, p4_name: r.p4_name.clone() })
    }
}

impl ToProto<pb::ReadResponse> for ReadResponse {
    fn to_proto(&self) -> pb::ReadResponse {
        pb::ReadResponse { entities: to_protos(&self.entities), ..Default::default() }
    }
}

impl FromProto<pb::ForwardingPipelineConfig_Profile> for Profile {
    fn from_proto(p: &pb::ForwardingPipelineConfig_Profile) -> Result<Self, Status> {
        Ok(Profile {
            profile_name: p.profile_name.clone(),
            context: p.context.clone(),
            binary: p.binary.clone(),
            pipe_scope: p.pipe_scope.clone(),
        })
    }
}

impl ToProto<pb::ForwardingPipelineConfig_Profile> for Profile {
    fn to_proto(&self) -> pb::ForwardingPipelineConfig_Profile {
        pb::ForwardingPipelineConfig_Profile {
            profile_name: self.profile_name.clone(),
            context: self.context.clone(),
            binary: self.binary.clone(),
            pipe_scope: self.pipe_scope.clone(),
            ..Default::default()
        }
    }
}

impl FromProto<pb::ForwardingPipelineConfig> for ForwardingPipelineConfig {
    fn from_proto(c: &pb::ForwardingPipelineConfig) -> Result<Self, Status> {
        Ok(ForwardingPipelineConfig {
            p4_name: c.p4_name.clone(),
            bfruntime_info: c.bfruntime_info.clone(),
            profiles: from_protos(&c.profiles)?,
        })
    }
}

impl ToProto<pb::ForwardingPipelineConfig> for ForwardingPipelineConfig {
    fn to_proto(&self) -> pb::ForwardingPipelineConfig {
        pb::ForwardingPipelineConfig {
            p4_name: self.p4_name.clone(),
            bfruntime_info: self.bfruntime_info.clone(),
            profiles: to_protos(&self.profiles),
            ..Default::default()
        }
    }
}

impl FromProto<pb::SetForwardingPipelineConfigRequest> for SetForwardingPipelineConfigRequest {
    fn from_proto(r: &pb::SetForwardingPipelineConfigRequest) -> Result<Self, Status> {
        use pb::SetForwardingPipelineConfigRequest_Action as Action;
        let action = match r.action {
            Action::BIND => ConfigAction::Bind,
            Action::VERIFY => ConfigAction::Verify,
            Action::VERIFY_AND_WARM_INIT_BEGIN => ConfigAction::VerifyAndWarmInitBegin,
            Action::VERIFY_AND_WARM_INIT_BEGIN_AND_END => ConfigAction::VerifyAndWarmInitBeginAndEnd,
            Action::WARM_INIT_END => ConfigAction::WarmInitEnd,
            Action::RECONCILE_AND_WARM_INIT_END => ConfigAction::ReconcileAndWarmInitEnd,
        };
        let dev_init_mode = match r.dev_init_mode {
            pb::SetForwardingPipelineConfigRequest_DevInitMode::FAST_RECONFIG => DevInitMode::FastReconfig,
            pb::SetForwardingPipelineConfigRequest_DevInitMode::HITLESS => DevInitMode::Hitless,
        };
        Ok(SetForwardingPipelineConfigRequest {
            client_id: r.client_id,
            device_id: r.device_id,
            action,
            dev_init_mode,
            base_path: r.base_path.clone(),
            configs: from_protos(&r.config)?,
        })
    }
}

impl ToProto<pb::GetForwardingPipelineConfigResponse> for GetForwardingPipelineConfigResponse {
    fn to_proto(&self) -> pb::GetForwardingPipelineConfigResponse {
        pb::GetForwardingPipelineConfigResponse {
            config: to_protos(&self.configs),
            non_p4_config: SingularPtrField::some(pb::NonP4Config {
                bfruntime_info: self.non_p4_bfruntime_info.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl FromProto<pb::StreamMessageRequest> for StreamMessageRequest {
    fn from_proto(r: &pb::StreamMessageRequest) -> Result<Self, Status> {
        use pb::StreamMessageRequest_oneof_update as Request;
        let update = r.update.as_ref().map(|update| match update {
            Request::subscribe(subscribe) => {
                let notifications = subscribe.get_notifications();
                StreamRequest::Subscribe(Subscribe {
                    device_id: subscribe.device_id,
                    notifications: Notifications {
                        learn: notifications.enable_learn_notifications,
                        idle_timeout: notifications.enable_idletimeout_notifications,
                        port_status: notifications.enable_port_status_change_notifications,
                    },
                })
            }
            Request::digest_ack(ack) => StreamRequest::DigestAck { digest_id: ack.digest_id, list_id: ack.list_id },
        });
        Ok(StreamMessageRequest { client_id: r.client_id, update })
    }
}

impl ToProto<pb::StreamMessageResponse> for StreamMessage {
    fn to_proto(&self) -> pb::StreamMessageResponse {
        use pb::StreamMessageResponse_oneof_update as Response;
        let update = match self {
            StreamMessage::Subscribe { subscribe, status } => Response::subscribe(pb::Subscribe {
                device_id: subscribe.device_id,
                notifications: SingularPtrField::some(pb::Subscribe_Notifications {
                    enable_learn_notifications: subscribe.notifications.learn,
                    enable_idletimeout_notifications: subscribe.notifications.idle_timeout,
                    enable_port_status_change_notifications: subscribe.notifications.port_status,
                    ..Default::default()
                }),
                status: SingularPtrField::some(status.to_proto()),
                ..Default::default()
            }),
            StreamMessage::WarmInit(event) => {
                Response::set_forwarding_pipeline_config_response(pb::SetForwardingPipelineConfigResponse {
                    set_forwarding_pipeline_config_response_type: match event {
                        WarmInitEvent::Started => pb::SetForwardingPipelineConfigResponseType::WARM_INIT_STARTED,
                        WarmInitEvent::Finished => pb::SetForwardingPipelineConfigResponseType::WARM_INIT_FINISHED,
                    },
                    ..Default::default()
                })
            }
            StreamMessage::IdleTimeout { target, entry } => {
                Response::idle_timeout_notification(pb::IdleTimeoutNotification {
                    target: SingularPtrField::some(target.to_proto()),
                    table_entry: SingularPtrField::some(entry.to_proto()),
                    ..Default::default()
                })
            }
            StreamMessage::PortStatusChange { entry, port_up } => {
                Response::port_status_change_notification(pb::PortStatusChgNotification {
                    table_entry: SingularPtrField::some(entry.to_proto()),
                    port_up: *port_up,
                    ..Default::default()
                })
            }
        };
        pb::StreamMessageResponse { update: Some(update), ..Default::default() }
    }
}

impl ToProto<proto::status::Status> for Status {
    /// A `google.rpc.Status` with one packed `bfrt_proto.Error` per detail.
    fn to_proto(&self) -> proto::status::Status {
        let details = self.details().iter().filter_map(|detail| {
            let error = pb::Error {
                canonical_code: detail.code().as_i32(),
                message: detail.message().to_string(),
                ..Default::default()
            };
            Any::pack(&error).map_err(|e| error!("failed to pack error detail: {:?}", e)).ok()
        }).collect();
        proto::status::Status {
            code: self.code().as_i32(),
            message: self.message().to_string(),
            details,
            ..Default::default()
        }
    }
}

/// The status a failed call returns to the client.  Aggregate results carry
/// their per-item statuses as a serialized `google.rpc.Status`.
pub fn rpc_status(status: &Status) -> RpcStatus {
    let code = RpcStatusCode::from(status.code().as_i32());
    if status.details().is_empty() {
        return RpcStatus::with_message(code, status.message().to_string());
    }
    match status.to_proto().write_to_bytes() {
        Ok(details) => RpcStatus::with_details(code, status.message().to_string(), details),
        Err(e) => {
            error!("failed to encode status details: {:?}", e);
            RpcStatus::with_message(code, status.message().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfrt::Code;

    fn exact_key(value: &[u8]) -> pb::TableKey {
        TableKey::new(vec![KeyField::exact(1, value.to_vec())]).to_proto()
    }

    #[test]
    fn deprecated_flags_are_merged() {
        let entry = pb::TableEntry {
            table_id: 5,
            table_read_flag: SingularPtrField::some(pb::TableReadFlag { key_only: true, ..Default::default() }),
            table_mod_inc_flag: SingularPtrField::some(pb::TableModIncFlag {
                field_type: pb::TableModIncFlag_Type::MOD_INC_DELETE,
                ..Default::default()
            }),
            table_flags: SingularPtrField::some(pb::TableFlags { from_hw: true, ..Default::default() }),
            ..Default::default()
        };
        let entry = TableEntry::from_proto(&entry).unwrap();
        assert_eq!(entry.flags, TableFlags { from_hw: true, key_only: true, mod_del: true, ..Default::default() });
        assert_eq!(entry.selector, None);
    }

    #[test]
    fn entry_targets_take_the_request_device() {
        let entry = pb::TableEntry {
            table_id: 5,
            value: Some(pb::TableEntry_oneof_value::key(exact_key(&[1]))),
            entry_tgt: SingularPtrField::some(pb::EntryTgt { pipe_id: 2, ..Default::default() }),
            ..Default::default()
        };
        let request = pb::ReadRequest {
            target: SingularPtrField::some(pb::TargetDevice { device_id: 3, pipe_id: 0xffff, ..Default::default() }),
            entities: RepeatedField::from_vec(vec![pb::Entity {
                entity: Some(pb::Entity_oneof_entity::table_entry(entry)),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let request = ReadRequest::from_proto(&request).unwrap();
        match &request.entities[..] {
            [Entity::TableEntry(TableEntry { target: Some(target), .. })] => {
                assert_eq!(target.device_id, 3);
                assert_eq!(target.pipe_id, 2);
                assert_eq!(target.direction, Direction::Ingress);
            }
            other => panic!("unexpected entities {:?}", other),
        }
    }

    #[test]
    fn empty_update_carries_no_entity() {
        let request = pb::WriteRequest {
            updates: RepeatedField::from_vec(vec![pb::Update {
                field_type: pb::Update_Type::INSERT,
                entity: SingularPtrField::some(pb::Entity::new()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let request = WriteRequest::from_proto(&request).unwrap();
        assert_eq!(request.updates, vec![Update { kind: UpdateType::Insert, entity: None }]);
    }

    #[test]
    fn read_entities_must_be_set() {
        let request = pb::ReadRequest {
            entities: RepeatedField::from_vec(vec![pb::Entity::new()]),
            ..Default::default()
        };
        assert_eq!(ReadRequest::from_proto(&request).unwrap_err().code(), Code::InvalidArgument);
    }

    #[test]
    fn key_fields_need_a_match() {
        let field = pb::KeyField { field_id: 4, ..Default::default() };
        assert_eq!(KeyField::from_proto(&field).unwrap_err().code(), Code::InvalidArgument);

        let lpm = pb::KeyField {
            field_id: 4,
            match_type: Some(pb::KeyField_oneof_match_type::lpm(pb::KeyField_LPM {
                value: vec![10, 0, 0, 0],
                prefix_len: -1,
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(KeyField::from_proto(&lpm).unwrap_err().code(), Code::InvalidArgument);
    }

    #[test]
    fn object_names() {
        let object = ObjectId {
            name: ObjectName::DataField { table: "fwd".into(), action: "".into(), field: "$ENTRY_TTL".into() },
            id: 65554,
        };
        assert_eq!(ObjectId::from_proto(&object.to_proto()).unwrap(), object);
        assert_eq!(ObjectId::from_proto(&pb::ObjectId::new()).unwrap_err().code(), Code::InvalidArgument);
    }

    #[test]
    fn aggregate_status_packs_one_error_per_item() {
        let status = Status::with_details(Code::Unknown, "Write Error Status", vec![
            Status::ok(),
            Status::already_exists("Failed to add entry: object already exists"),
        ]);
        let encoded = status.to_proto();
        assert_eq!(encoded.code, Code::Unknown.as_i32());
        let codes: Vec<i32> = encoded.details.iter()
            .map(|any| any.unpack::<pb::Error>().unwrap().unwrap().canonical_code)
            .collect();
        assert_eq!(codes, vec![0, 6]);

        let rpc = rpc_status(&status);
        assert_eq!(rpc.code(), RpcStatusCode::UNKNOWN);
        assert_eq!(rpc.message(), "Write Error Status");
        let decoded = proto::status::Status::parse_from_bytes(rpc.details()).unwrap();
        assert_eq!(decoded.details.len(), 2);
    }

    #[test]
    fn warm_init_events_use_the_config_response() {
        let message = StreamMessage::WarmInit(WarmInitEvent::Finished).to_proto();
        match message.update {
            Some(pb::StreamMessageResponse_oneof_update::set_forwarding_pipeline_config_response(response)) => {
                assert_eq!(response.set_forwarding_pipeline_config_response_type,
                           pb::SetForwardingPipelineConfigResponseType::WARM_INIT_FINISHED);
            }
            other => panic!("unexpected stream response {:?}", other),
        }
    }
}
