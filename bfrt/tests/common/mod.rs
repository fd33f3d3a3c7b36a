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


#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use bfrt::model::{
    Atomicity,
    DataField,
    Entity,
    KeyField,
    Notifications,
    ReadRequest,
    StreamMessageRequest,
    StreamRequest,
    Subscribe,
    TableData,
    TableEntry,
    TableKey,
    Target,
    Update,
    UpdateType,
    WriteRequest,
};
use bfrt::{BfRtServer, MemoryEngine, Outbound, ProgramInfo, ServerConfig, StreamChannel};
use futures::channel::mpsc::UnboundedReceiver;

pub const DEVICE: u32 = 0;
pub const PROGRAM: &str = "fwd";

pub const FWD_TABLE: u32 = 10;
pub const SEND_ACTION: u32 = 100;
pub const COUNTER_TABLE: u32 = 20;
pub const PORT_TABLE: u32 = 30;

/// A small program: an exact-match forwarding table with hit state, a
/// counter, and the port table.
pub const BFRT_JSON: &str = r#"{
  "schema_version": "1.0.0",
  "tables": [
    {
      "name": "pipe.SwitchIngress.fwd",
      "id": 10,
      "table_type": "MatchAction_Direct",
      "size": 16,
      "key": [{"id": 1, "name": "hdr.ethernet.dst_addr", "match_type": "Exact", "mandatory": false}],
      "action_specs": [
        {"id": 100, "name": "SwitchIngress.send", "data": [{"id": 1, "name": "port"}]},
        {"id": 101, "name": "SwitchIngress.drop", "data": []}
      ],
      "data": [{"singleton": {"id": 65554, "name": "$ENTRY_TTL"}}],
      "attributes": ["IdleTimeout", "EntryScope"],
      "supported_operations": ["UpdateHitState"]
    },
    {
      "name": "pipe.SwitchIngress.pkts",
      "id": 20,
      "table_type": "Counter",
      "size": 4,
      "key": [{"id": 1, "name": "$COUNTER_INDEX", "match_type": "Exact", "mandatory": true}],
      "data": [{"singleton": {"id": 65553, "name": "$COUNTER_SPEC_PKTS"}}],
      "supported_operations": ["Sync"]
    },
    {
      "name": "$PORT",
      "id": 30,
      "table_type": "PortConfigure",
      "size": 64,
      "key": [{"id": 1, "name": "$DEV_PORT", "match_type": "Exact", "mandatory": true}],
      "data": [{"singleton": {"id": 2, "name": "$SPEED"}}],
      "attributes": ["port_status_notif_cb"]
    }
  ]
}"#;

pub struct Fixture {
    pub engine: Arc<MemoryEngine>,
    pub server: BfRtServer,
}

pub fn setup() -> Fixture {
    setup_with(ServerConfig::default())
}

/// A server over a memory engine with device 0 running [`BFRT_JSON`].
pub fn setup_with(config: ServerConfig) -> Fixture {
    let engine = Arc::new(MemoryEngine::new());
    engine.add_device(DEVICE, Vec::new());
    let program = ProgramInfo::from_json(PROGRAM, BFRT_JSON.as_bytes(), PathBuf::from("fwd/bf-rt.json"), Vec::new())
        .unwrap();
    engine.load_program(DEVICE, program).unwrap();
    let server = BfRtServer::new(engine.clone(), config);
    Fixture { engine, server }
}

/// A fresh, empty directory.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bfrt-{}-{}", name, rand::random::<u32>()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn key(dst: u8) -> TableKey {
    TableKey::new(vec![KeyField::exact(1, vec![0, 0, 0, 0, 0, dst])])
}

pub fn send(port: u8) -> TableData {
    TableData::new(SEND_ACTION, vec![DataField::stream(1, vec![port])])
}

pub fn fwd_entry(dst: u8, port: u8) -> TableEntry {
    TableEntry::with_key(FWD_TABLE, key(dst), Some(send(port)))
}

pub fn update(kind: UpdateType, entity: Entity) -> Update {
    Update { kind, entity: Some(entity) }
}

pub fn insert(dst: u8, port: u8) -> Update {
    update(UpdateType::Insert, Entity::TableEntry(fwd_entry(dst, port)))
}

pub fn write_request(client_id: u32, atomicity: Atomicity, updates: Vec<Update>) -> WriteRequest {
    WriteRequest {
        target: Target::device(DEVICE),
        client_id,
        updates,
        atomicity,
        p4_name: PROGRAM.to_string(),
    }
}

pub fn read_request(client_id: u32, entities: Vec<Entity>) -> ReadRequest {
    ReadRequest {
        target: Target::device(DEVICE),
        client_id,
        entities,
        p4_name: PROGRAM.to_string(),
    }
}

/// Reads every entry of the forwarding table.
pub fn read_all(client_id: u32) -> ReadRequest {
    read_request(client_id, vec![Entity::TableEntry(TableEntry { table_id: FWD_TABLE, ..Default::default() })])
}

/// Opens a stream and subscribes `client_id` on it.
pub fn subscribe(server: &BfRtServer, client_id: u32, notifications: Notifications)
                 -> (StreamChannel, UnboundedReceiver<Outbound>) {
    let (mut channel, receiver) = server.stream_channel();
    channel.handle(StreamMessageRequest {
        client_id,
        update: Some(StreamRequest::Subscribe(Subscribe { device_id: DEVICE, notifications })),
    }).unwrap();
    (channel, receiver)
}

/// Everything queued on a stream so far.
pub fn drain(receiver: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut messages = Vec::new();
    while let Ok(Some(message)) = receiver.try_next() {
        messages.push(message);
    }
    messages
}
