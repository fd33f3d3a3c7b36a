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


//! Program and table metadata.
//!
//! A [`ProgramInfo`] is built once from a program's `bf-rt.json` when the
//! program is loaded onto a device, and is shared read-only after that.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display};
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::OperationKind;
use crate::model::{AttributeKind, ObjectName, TableData, TableKey};
use crate::status::Status;

#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema is not valid json or does not have the expected shape.
    #[error("malformed bf-rt schema ({0})")]
    Json(#[from] serde_json::Error),

    /// Two tables in one program share an id.
    #[error("duplicate table id {0}")]
    DuplicateTableId(u32),

    /// Two tables in one program share a full name.
    #[error("duplicate table name {0}")]
    DuplicateTableName(String),
}

/// Table kinds, as named by the `table_type` of the schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableKind {
    MatchDirect,
    MatchIndirect,
    MatchIndirectSelector,
    ActionProfile,
    Selector,
    Counter,
    Meter,
    Register,
    Lpf,
    Wred,
    PortConfig,
    PortStat,
    Pre,
    Mirror,
    /// Any other fixed-function table.
    Fixed(String),
}

impl TableKind {
    fn parse(table_type: &str) -> TableKind {
        match table_type {
            "MatchAction_Direct" => TableKind::MatchDirect,
            "MatchAction_Indirect" => TableKind::MatchIndirect,
            "MatchAction_Indirect_Selector" => TableKind::MatchIndirectSelector,
            "Action" => TableKind::ActionProfile,
            "Selector" => TableKind::Selector,
            "Counter" => TableKind::Counter,
            "Meter" => TableKind::Meter,
            "Register" => TableKind::Register,
            "Lpf" => TableKind::Lpf,
            "Wred" => TableKind::Wred,
            "PortConfigure" => TableKind::PortConfig,
            "PortStat" => TableKind::PortStat,
            "PreMgid" | "PreNode" | "PreEcmp" | "PreLag" | "PrePrune" | "PrePort" => TableKind::Pre,
            "Mirror" | "MirrorCfg" => TableKind::Mirror,
            other => TableKind::Fixed(other.to_string()),
        }
    }

    /// Whether the engine can count the entries of this table.  Counter,
    /// meter, register and similar tables are fully populated arrays, so a
    /// read of all entries walks the whole table instead.
    pub fn has_usage(&self) -> bool {
        !matches!(self, TableKind::Counter | TableKind::Meter | TableKind::Register | TableKind::Lpf | TableKind::Wred)
    }

    /// Whether this table has a default entry distinct from its keyed entries.
    pub fn has_default_entry(&self) -> bool {
        matches!(self, TableKind::MatchDirect | TableKind::MatchIndirect | TableKind::MatchIndirectSelector)
    }
}

impl Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::MatchDirect => write!(f, "MatchAction_Direct"),
            TableKind::MatchIndirect => write!(f, "MatchAction_Indirect"),
            TableKind::MatchIndirectSelector => write!(f, "MatchAction_Indirect_Selector"),
            TableKind::ActionProfile => write!(f, "Action"),
            TableKind::Selector => write!(f, "Selector"),
            TableKind::Counter => write!(f, "Counter"),
            TableKind::Meter => write!(f, "Meter"),
            TableKind::Register => write!(f, "Register"),
            TableKind::Lpf => write!(f, "Lpf"),
            TableKind::Wred => write!(f, "Wred"),
            TableKind::PortConfig => write!(f, "PortConfigure"),
            TableKind::PortStat => write!(f, "PortStat"),
            TableKind::Pre => write!(f, "Pre"),
            TableKind::Mirror => write!(f, "Mirror"),
            TableKind::Fixed(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFieldInfo {
    pub id: u32,
    pub name: String,
    pub match_type: String,
    pub mandatory: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataFieldInfo {
    pub id: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionInfo {
    pub id: u32,
    pub name: String,
    pub data: Vec<DataFieldInfo>,
}

/// Metadata for one table of a program.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub id: u32,
    pub name: String,
    pub kind: TableKind,
    pub handle: u32,
    /// Name of the program the table belongs to.
    pub program: String,
    /// Pipeline profile owning the table, if it is profile-specific.
    pub profile: Option<String>,
    pub size: u32,
    pub keys: Vec<KeyFieldInfo>,
    pub actions: Vec<ActionInfo>,
    pub data: Vec<DataFieldInfo>,
    pub depends_on: BTreeSet<u32>,
    pub dependents: BTreeSet<u32>,
    pub attributes: BTreeSet<String>,
    pub operations: BTreeSet<String>,
}

impl TableInfo {
    pub fn supports_attribute(&self, kind: AttributeKind) -> bool {
        self.attributes.contains(kind.schema_name())
    }

    /// Resolves a client-supplied operation name for this table.
    pub fn operation_kind(&self, name: &str) -> Option<OperationKind> {
        if !self.operations.contains(name) {
            return None;
        }
        match (name, &self.kind) {
            ("Sync", TableKind::Counter) | ("SyncCounters", _) => Some(OperationKind::CounterSync),
            ("Sync", TableKind::Register) | ("SyncRegisters", _) => Some(OperationKind::RegisterSync),
            ("UpdateHitState", _) => Some(OperationKind::HitStateUpdate),
            _ => None,
        }
    }

    pub fn action(&self, id: u32) -> Option<&ActionInfo> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Rejects key fields this table does not have.
    pub fn check_key(&self, key: &TableKey) -> Result<(), Status> {
        let mut seen = BTreeSet::new();
        for field in &key.fields {
            if !self.keys.iter().any(|k| k.id == field.field_id) {
                return Err(Status::invalid_argument(format!(
                    "Key field {} not found in table {}", field.field_id, self.name)));
            }
            if !seen.insert(field.field_id) {
                return Err(Status::invalid_argument(format!(
                    "Key field {} repeated for table {}", field.field_id, self.name)));
            }
        }
        Ok(())
    }

    /// Rejects an unknown action, or data fields that belong neither to the
    /// action nor to the table's common data.
    pub fn check_data(&self, data: &TableData) -> Result<(), Status> {
        let action_fields: &[DataFieldInfo] = if data.action_id == 0 {
            &[]
        } else {
            match self.action(data.action_id) {
                Some(action) => &action.data,
                None => return Err(Status::invalid_argument(format!(
                    "Action {} not found in table {}", data.action_id, self.name))),
            }
        };
        for field in &data.fields {
            let known = action_fields.iter().chain(self.data.iter()).any(|d| d.id == field.field_id);
            if !known {
                return Err(Status::invalid_argument(format!(
                    "Data field {} not found in table {}", field.field_id, self.name)));
            }
        }
        Ok(())
    }
}

/// A pipeline profile of a loaded program and the pipes it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineProfile {
    pub name: String,
    pub context_path: PathBuf,
    pub binary_path: PathBuf,
    pub pipe_scope: BTreeSet<u32>,
}

impl PipelineProfile {
    /// The pipe scope as a bitmask, bit `n` set for pipe `n`.
    pub fn pipe_mask(&self) -> u32 {
        self.pipe_scope.iter().filter(|&&p| p < 32).fold(0, |mask, p| mask | (1 << p))
    }
}

/// Metadata for a program loaded on a device.
#[derive(Debug)]
pub struct ProgramInfo {
    name: String,
    bfrt_path: PathBuf,
    pipelines: Vec<PipelineProfile>,
    tables: BTreeMap<u32, TableInfo>,
    /// Every dotted suffix of every table name, mapped to the tables it names.
    names: HashMap<String, Vec<u32>>,
}

#[derive(Deserialize)]
struct Schema {
    #[serde(default)]
    tables: Vec<SchemaTable>,
}

#[derive(Deserialize)]
struct SchemaTable {
    name: String,
    id: u32,
    table_type: String,
    #[serde(default)]
    handle: Option<u32>,
    #[serde(default)]
    size: u32,
    #[serde(default)]
    depends_on: Vec<u32>,
    #[serde(default)]
    key: Vec<SchemaKeyField>,
    #[serde(default)]
    action_specs: Vec<SchemaAction>,
    #[serde(default)]
    data: Vec<SchemaData>,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    supported_operations: Vec<String>,
}

#[derive(Deserialize)]
struct SchemaKeyField {
    id: u32,
    name: String,
    #[serde(default)]
    match_type: String,
    #[serde(default)]
    mandatory: bool,
}

#[derive(Deserialize)]
struct SchemaField {
    id: u32,
    name: String,
}

#[derive(Deserialize)]
struct SchemaAction {
    id: u32,
    name: String,
    #[serde(default)]
    data: Vec<SchemaField>,
}

#[derive(Deserialize)]
struct SchemaData {
    #[serde(default)]
    singleton: Option<SchemaField>,
    #[serde(default)]
    oneof: Vec<SchemaField>,
}

impl From<SchemaField> for DataFieldInfo {
    fn from(f: SchemaField) -> Self {
        DataFieldInfo { id: f.id, name: f.name }
    }
}

impl ProgramInfo {
    /// Builds the registry for program `name` from its `bf-rt.json` content.
    pub fn from_json(
        name: &str,
        bfrt_json: &[u8],
        bfrt_path: PathBuf,
        pipelines: Vec<PipelineProfile>,
    ) -> Result<ProgramInfo, SchemaError> {
        let schema: Schema = serde_json::from_slice(bfrt_json)?;

        let mut tables = BTreeMap::new();
        let mut full_names = BTreeSet::new();
        for t in schema.tables {
            if !full_names.insert(t.name.clone()) {
                return Err(SchemaError::DuplicateTableName(t.name));
            }
            let profile = t.name.split('.').next()
                .filter(|prefix| pipelines.iter().any(|p| p.name == *prefix))
                .map(String::from);
            let data = t.data.into_iter()
                .flat_map(|d| d.singleton.into_iter().chain(d.oneof))
                .map(DataFieldInfo::from)
                .collect();
            let table = TableInfo {
                id: t.id,
                handle: t.handle.unwrap_or(t.id),
                kind: TableKind::parse(&t.table_type),
                program: name.to_string(),
                profile,
                size: t.size,
                keys: t.key.into_iter().map(|k| KeyFieldInfo {
                    id: k.id,
                    name: k.name,
                    match_type: k.match_type,
                    mandatory: k.mandatory,
                }).collect(),
                actions: t.action_specs.into_iter().map(|a| ActionInfo {
                    id: a.id,
                    name: a.name,
                    data: a.data.into_iter().map(DataFieldInfo::from).collect(),
                }).collect(),
                data,
                depends_on: t.depends_on.into_iter().collect(),
                dependents: BTreeSet::new(),
                attributes: t.attributes.into_iter().collect(),
                operations: t.supported_operations.into_iter().collect(),
                name: t.name,
            };
            if tables.insert(table.id, table).is_some() {
                return Err(SchemaError::DuplicateTableId(t.id));
            }
        }

        let edges: Vec<(u32, u32)> = tables.values()
            .flat_map(|t| t.depends_on.iter().map(move |&dep| (dep, t.id)))
            .collect();
        for (dependency, dependent) in edges {
            if let Some(t) = tables.get_mut(&dependency) {
                t.dependents.insert(dependent);
            }
        }

        let mut names: HashMap<String, Vec<u32>> = HashMap::new();
        for t in tables.values() {
            let parts: Vec<&str> = t.name.split('.').collect();
            for start in 0..parts.len() {
                names.entry(parts[start..].join(".")).or_default().push(t.id);
            }
        }

        Ok(ProgramInfo {
            name: name.to_string(),
            bfrt_path,
            pipelines,
            tables,
            names,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bfrt_path(&self) -> &PathBuf {
        &self.bfrt_path
    }

    pub fn pipelines(&self) -> &[PipelineProfile] {
        &self.pipelines
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn table(&self, id: u32) -> Result<&TableInfo, Status> {
        self.tables.get(&id)
            .ok_or_else(|| Status::not_found(format!("Table id {} not found in program {}", id, self.name)))
    }

    pub fn has_table(&self, id: u32) -> bool {
        self.tables.contains_key(&id)
    }

    /// Looks up a table by full name or by any unambiguous dotted suffix of
    /// it, e.g. `fwd` for `pipe.SwitchIngress.fwd`.
    pub fn table_by_name(&self, name: &str) -> Result<&TableInfo, Status> {
        match self.names.get(name).map(Vec::as_slice) {
            Some([id]) => self.table(*id),
            Some(ids) if ids.len() > 1 => Err(Status::invalid_argument(format!(
                "Table name {} is ambiguous in program {}", name, self.name))),
            _ => Err(Status::not_found(format!("Table {} not found in program {}", name, self.name))),
        }
    }

    /// Resolves an object name to its id.
    pub fn object_id(&self, object: &ObjectName) -> Result<u32, Status> {
        match object {
            ObjectName::Table { table } => Ok(self.table_by_name(table)?.id),
            ObjectName::Action { table, action } => {
                let t = self.table_by_name(table)?;
                find_action(t, action).map(|a| a.id)
            }
            ObjectName::KeyField { table, field } => {
                let t = self.table_by_name(table)?;
                t.keys.iter().find(|k| k.name == *field).map(|k| k.id)
                    .ok_or_else(|| Status::not_found(format!("Key field {} not found in table {}", field, t.name)))
            }
            ObjectName::DataField { table, action, field } => {
                let t = self.table_by_name(table)?;
                let fields: &[DataFieldInfo] = if action.is_empty() {
                    &t.data
                } else {
                    &find_action(t, action)?.data
                };
                fields.iter().find(|d| d.name == *field).map(|d| d.id)
                    .ok_or_else(|| Status::not_found(format!("Data field {} not found in table {}", field, t.name)))
            }
        }
    }
}

fn find_action<'a>(table: &'a TableInfo, name: &str) -> Result<&'a ActionInfo, Status> {
    table.actions.iter()
        .find(|a| a.name == name || a.name.rsplit('.').next() == Some(name))
        .ok_or_else(|| Status::not_found(format!("Action {} not found in table {}", name, table.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataField, KeyField};
    use crate::status::Code;

    const SCHEMA: &str = r#"{
      "schema_version": "1.0.0",
      "tables": [
        {
          "name": "pipe.SwitchIngress.fwd",
          "id": 1001,
          "table_type": "MatchAction_Direct",
          "size": 1024,
          "depends_on": [1003],
          "key": [ { "id": 1, "name": "hdr.ethernet.dst_addr", "match_type": "Exact", "mandatory": false } ],
          "action_specs": [
            { "id": 20, "name": "SwitchIngress.send", "data": [ { "id": 1, "name": "port" } ] },
            { "id": 21, "name": "SwitchIngress.drop", "data": [] }
          ],
          "data": [],
          "supported_operations": ["UpdateHitState"],
          "attributes": ["EntryScope", "IdleTimeout"]
        },
        {
          "name": "pipe.SwitchEgress.fwd",
          "id": 1002,
          "table_type": "MatchAction_Direct",
          "size": 16,
          "key": [], "action_specs": [], "data": []
        },
        {
          "name": "pipe.SwitchIngress.cnt",
          "id": 1003,
          "table_type": "Counter",
          "size": 64,
          "key": [ { "id": 65556, "name": "$COUNTER_INDEX", "match_type": "Exact" } ],
          "data": [ { "mandatory": false, "singleton": { "id": 65553, "name": "$COUNTER_SPEC_BYTES" } } ],
          "supported_operations": ["Sync"]
        }
      ]
    }"#;

    fn program() -> ProgramInfo {
        let pipe = PipelineProfile {
            name: "pipe".into(),
            context_path: "fwd/pipe/context.json".into(),
            binary_path: "fwd/pipe/tofino.bin".into(),
            pipe_scope: [0, 2].into_iter().collect(),
        };
        ProgramInfo::from_json("fwd", SCHEMA.as_bytes(), "fwd/bf-rt.json".into(), vec![pipe]).unwrap()
    }

    #[test]
    fn parses_tables() {
        let p = program();
        let fwd = p.table(1001).unwrap();
        assert_eq!(fwd.kind, TableKind::MatchDirect);
        assert_eq!(fwd.profile.as_deref(), Some("pipe"));
        assert_eq!(fwd.program, "fwd");
        assert_eq!(fwd.size, 1024);
        assert!(fwd.supports_attribute(AttributeKind::IdleTable));
        assert!(!fwd.supports_attribute(AttributeKind::PortStatusChange));
        assert_eq!(p.table(1003).unwrap().data[0].name, "$COUNTER_SPEC_BYTES");
        assert_eq!(p.table(9).unwrap_err().code(), Code::NotFound);
        assert_eq!(p.pipelines()[0].pipe_mask(), 0b101);
    }

    #[test]
    fn builds_dependency_graph() {
        let p = program();
        assert!(p.table(1001).unwrap().depends_on.contains(&1003));
        assert!(p.table(1003).unwrap().dependents.contains(&1001));
    }

    #[test]
    fn resolves_names_and_suffixes() {
        let p = program();
        assert_eq!(p.table_by_name("pipe.SwitchIngress.fwd").unwrap().id, 1001);
        assert_eq!(p.table_by_name("SwitchIngress.fwd").unwrap().id, 1001);
        assert_eq!(p.table_by_name("cnt").unwrap().id, 1003);
        assert_eq!(p.table_by_name("fwd").unwrap_err().code(), Code::InvalidArgument);
        assert_eq!(p.table_by_name("nope").unwrap_err().code(), Code::NotFound);

        let action = ObjectName::Action { table: "SwitchIngress.fwd".into(), action: "send".into() };
        assert_eq!(p.object_id(&action).unwrap(), 20);
        let field = ObjectName::DataField {
            table: "SwitchIngress.fwd".into(),
            action: "SwitchIngress.send".into(),
            field: "port".into(),
        };
        assert_eq!(p.object_id(&field).unwrap(), 1);
        let key = ObjectName::KeyField { table: "cnt".into(), field: "$COUNTER_INDEX".into() };
        assert_eq!(p.object_id(&key).unwrap(), 65556);
        let common = ObjectName::DataField { table: "cnt".into(), action: String::new(), field: "$COUNTER_SPEC_BYTES".into() };
        assert_eq!(p.object_id(&common).unwrap(), 65553);
    }

    #[test]
    fn resolves_operations_by_table_kind() {
        let p = program();
        assert_eq!(p.table(1003).unwrap().operation_kind("Sync"), Some(OperationKind::CounterSync));
        assert_eq!(p.table(1001).unwrap().operation_kind("UpdateHitState"), Some(OperationKind::HitStateUpdate));
        assert_eq!(p.table(1001).unwrap().operation_kind("Sync"), None);
    }

    #[test]
    fn checks_keys_and_data() {
        let p = program();
        let fwd = p.table(1001).unwrap();
        assert!(fwd.check_key(&TableKey::new(vec![KeyField::exact(1, vec![0; 6])])).is_ok());
        assert_eq!(fwd.check_key(&TableKey::new(vec![KeyField::exact(7, vec![0])])).unwrap_err().code(),
                   Code::InvalidArgument);
        assert!(fwd.check_data(&TableData::new(20, vec![DataField::stream(1, vec![0, 1])])).is_ok());
        assert!(fwd.check_data(&TableData::new(22, vec![])).is_err());
        assert!(fwd.check_data(&TableData::new(21, vec![DataField::stream(1, vec![0, 1])])).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"{"tables": [
            {"name": "a", "id": 1, "table_type": "MatchAction_Direct"},
            {"name": "b", "id": 1, "table_type": "MatchAction_Direct"}]}"#;
        let err = ProgramInfo::from_json("p", json.as_bytes(), "p/bf-rt.json".into(), vec![]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTableId(1)));
        assert!(ProgramInfo::from_json("p", b"not json", "x".into(), vec![]).is_err());
    }
}
