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


mod common;

use std::time::{Duration, Instant};

use bfrt::model::{
    Atomicity,
    DataField,
    DataValue,
    Entity,
    EntrySelector,
    HandleId,
    KeyField,
    ObjectId,
    ObjectName,
    TableData,
    TableEntry,
    TableFlags,
    TableKey,
    TableOperation,
    TableUsage,
    UpdateType,
};
use bfrt::{Code, Deadline};
use common::*;

fn populate(f: &Fixture, count: u8) {
    let updates = (1..=count).map(|dst| insert(dst, dst)).collect();
    f.server.write(&write_request(1, Atomicity::ContinueOnError, updates), Deadline::none()).unwrap();
}

#[test]
fn empty_table_reads_nothing() {
    let f = setup();
    let outcome = f.server.read(&read_all(1), Deadline::none()).unwrap();
    assert_eq!(outcome.status, Ok(()));
    assert!(outcome.response.entities.is_empty());
    assert_eq!(f.engine.calls("usage_get"), 0);
}

#[test]
fn single_entry_needs_no_iteration() {
    let f = setup();
    populate(&f, 1);
    let outcome = f.server.read(&read_all(1), Deadline::none()).unwrap();
    assert_eq!(outcome.response.entities, vec![Entity::TableEntry(fwd_entry(1, 1))]);
    assert_eq!(f.engine.calls("entry_get_next_n"), 0);
}

#[test]
fn reads_every_entry_in_key_order() {
    let f = setup();
    populate(&f, 3);
    let outcome = f.server.read(&read_all(1), Deadline::none()).unwrap();
    let expected: Vec<Entity> = (1..=3).map(|dst| Entity::TableEntry(fwd_entry(dst, dst))).collect();
    assert_eq!(outcome.response.entities, expected);
    assert_eq!(f.engine.calls("entry_get_next_n"), 1);
}

#[test]
fn wildcard_read_includes_the_default_entry() {
    let f = setup();
    populate(&f, 1);
    let default = TableEntry { table_id: FWD_TABLE, data: Some(send(0)), is_default_entry: true, ..Default::default() };
    let request = write_request(1, Atomicity::ContinueOnError, vec![update(UpdateType::Modify, Entity::TableEntry(default.clone()))]);
    f.server.write(&request, Deadline::none()).unwrap();

    let outcome = f.server.read(&read_all(1), Deadline::none()).unwrap();
    assert_eq!(outcome.response.entities, vec![Entity::TableEntry(fwd_entry(1, 1)), Entity::TableEntry(default)]);
}

#[test]
fn key_only_read_drops_data() {
    let f = setup();
    populate(&f, 2);
    let flags = TableFlags { key_only: true, ..Default::default() };
    let request = read_request(1, vec![Entity::TableEntry(TableEntry { table_id: FWD_TABLE, flags, ..Default::default() })]);
    let outcome = f.server.read(&request, Deadline::none()).unwrap();
    assert_eq!(outcome.response.entities.len(), 2);
    for entity in &outcome.response.entities {
        match entity {
            Entity::TableEntry(entry) => assert_eq!(entry.data, None),
            other => panic!("unexpected entity {:?}", other),
        }
    }
}

#[test]
fn action_filter_skips_other_actions() {
    let f = setup();
    populate(&f, 2);
    let drop = TableEntry::with_key(FWD_TABLE, key(9), Some(TableData::new(101, Vec::new())));
    let request = write_request(1, Atomicity::ContinueOnError, vec![update(UpdateType::Insert, Entity::TableEntry(drop.clone()))]);
    f.server.write(&request, Deadline::none()).unwrap();

    let filter = TableEntry { table_id: FWD_TABLE, data: Some(TableData::new(101, Vec::new())), ..Default::default() };
    let outcome = f.server.read(&read_request(1, vec![Entity::TableEntry(filter)]), Deadline::none()).unwrap();
    assert_eq!(outcome.response.entities, vec![Entity::TableEntry(drop)]);
}

#[test]
fn missing_key_is_reported_per_entity() {
    let f = setup();
    populate(&f, 1);
    let request = read_request(1, vec![
        Entity::TableEntry(TableEntry::with_key(FWD_TABLE, key(1), None)),
        Entity::TableEntry(TableEntry::with_key(FWD_TABLE, key(2), None)),
    ]);
    let outcome = f.server.read(&request, Deadline::none()).unwrap();
    assert_eq!(outcome.response.entities, vec![Entity::TableEntry(fwd_entry(1, 1))]);
    let status = outcome.status.unwrap_err();
    assert_eq!(status.message(), "Read Error Status");
    let codes: Vec<Code> = status.details().iter().map(|d| d.code()).collect();
    assert_eq!(codes, vec![Code::Ok, Code::NotFound]);
}

#[test]
fn counters_without_usage_walk_the_table() {
    let f = setup();
    let counter = |index: u8, packets: u8| TableEntry::with_key(
        COUNTER_TABLE,
        TableKey::new(vec![KeyField::exact(1, vec![0, 0, 0, index])]),
        Some(TableData::new(0, vec![DataField { field_id: 65553, value: DataValue::Stream(vec![packets]) }])));
    let updates = (0..3).map(|i| update(UpdateType::Insert, Entity::TableEntry(counter(i, i * 10)))).collect();
    f.server.write(&write_request(1, Atomicity::ContinueOnError, updates), Deadline::none()).unwrap();

    let request = read_request(1, vec![Entity::TableEntry(TableEntry { table_id: COUNTER_TABLE, ..Default::default() })]);
    let outcome = f.server.read(&request, Deadline::none()).unwrap();
    assert_eq!(outcome.status, Ok(()));
    assert_eq!(outcome.response.entities.len(), 3);
}

#[test]
fn usage_and_handles() {
    let f = setup();
    populate(&f, 2);
    let request = read_request(1, vec![
        Entity::TableUsage(TableUsage { table_id: FWD_TABLE, ..Default::default() }),
        Entity::Handle(HandleId { table_id: FWD_TABLE, selector: Some(EntrySelector::Key(key(2))) }),
    ]);
    let outcome = f.server.read(&request, Deadline::none()).unwrap();
    assert_eq!(outcome.status, Ok(()));
    let handle = match &outcome.response.entities[..] {
        [Entity::TableUsage(usage), Entity::Handle(HandleId { selector: Some(EntrySelector::Handle(handle)), .. })] => {
            assert_eq!(usage.usage, 2);
            *handle
        }
        other => panic!("unexpected read response {:?}", other),
    };

    let by_handle = TableEntry { table_id: FWD_TABLE, selector: Some(EntrySelector::Handle(handle)), ..Default::default() };
    let outcome = f.server.read(&read_request(1, vec![Entity::TableEntry(by_handle)]), Deadline::none()).unwrap();
    assert_eq!(outcome.response.entities, vec![Entity::TableEntry(fwd_entry(2, 2))]);
}

#[test]
fn handle_lookup_needs_a_key() {
    let f = setup();
    let request = read_request(1, vec![Entity::Handle(HandleId { table_id: FWD_TABLE, selector: None })]);
    let status = f.server.read(&request, Deadline::none()).unwrap().status.unwrap_err();
    assert_eq!(status.details()[0].code(), Code::InvalidArgument);
}

#[test]
fn object_ids_resolve_by_suffix() {
    let f = setup();
    let names = [
        ObjectName::Table { table: "fwd".into() },
        ObjectName::Action { table: "fwd".into(), action: "send".into() },
        ObjectName::KeyField { table: "SwitchIngress.fwd".into(), field: "hdr.ethernet.dst_addr".into() },
    ];
    let entities = names.iter().map(|name| Entity::ObjectId(ObjectId { name: name.clone(), id: 0 })).collect();
    let outcome = f.server.read(&read_request(1, entities), Deadline::none()).unwrap();
    let ids: Vec<u32> = outcome.response.entities.iter().map(|e| match e {
        Entity::ObjectId(object) => object.id,
        other => panic!("unexpected entity {:?}", other),
    }).collect();
    assert_eq!(ids, vec![FWD_TABLE, SEND_ACTION, 1]);
}

#[test]
fn operations_cannot_be_read() {
    let f = setup();
    let request = read_request(1, vec![
        Entity::TableOperation(TableOperation { table_id: FWD_TABLE, operation: "UpdateHitState".into() }),
    ]);
    assert_eq!(f.server.read(&request, Deadline::none()).unwrap_err().code(), Code::Unimplemented);
}

#[test]
fn expired_deadline_returns_what_was_read() {
    let f = setup();
    populate(&f, 1);
    let expired = Deadline::after(Instant::now(), Duration::ZERO);
    let outcome = f.server.read(&read_all(1), expired).unwrap();
    assert!(outcome.response.entities.is_empty());
    assert_eq!(outcome.status.unwrap_err().code(), Code::DeadlineExceeded);
}
