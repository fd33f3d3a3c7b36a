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


//! The registry of connected clients and the reconfiguration lock.
//!
//! Calls that use a client's program (Read, Write, operation completions,
//! binding, subscribing) hold the reconfiguration lock in read mode, taken
//! without blocking: while a reconfiguration holds it in write mode they fail
//! with "resource busy" instead of waiting.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError, Weak};

use tracing::{debug, error, info, warn};

use crate::connection::{lock, BoundProgram, Connection, Subscription};
use crate::engine::{Completion, Notifier, PipelineEngine};
use crate::model::{StreamMessage, TableEntry, TableKey, Target};
use crate::operation::{NotifyCookie, OperationToken};
use crate::session::Session;
use crate::status::Status;

pub struct ConnectionRegistry {
    me: Weak<ConnectionRegistry>,
    engine: Arc<dyn PipelineEngine>,
    connections: Mutex<BTreeMap<u32, Arc<Connection>>>,
    reconfig: RwLock<()>,
}

impl ConnectionRegistry {
    pub fn new(engine: Arc<dyn PipelineEngine>) -> Arc<ConnectionRegistry> {
        Arc::new_cyclic(|me| ConnectionRegistry {
            me: me.clone(),
            engine,
            connections: Mutex::new(BTreeMap::new()),
            reconfig: RwLock::new(()),
        })
    }

    pub fn engine(&self) -> &Arc<dyn PipelineEngine> {
        &self.engine
    }

    /// Takes the reconfiguration lock in read mode, failing if a
    /// reconfiguration holds or awaits it.
    pub fn try_read(&self) -> Result<RwLockReadGuard<'_, ()>, Status> {
        match self.reconfig.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(Status::not_ready("resource busy")),
        }
    }

    /// Takes the reconfiguration lock in write mode, waiting for calls in
    /// progress to finish.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.reconfig.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a connection for `client_id`.  With a subscription, an existing
    /// independent connection is promoted instead and keeps its session.
    pub fn add_connection(&self, client_id: u32, subscription: Option<Subscription>) -> Result<Arc<Connection>, Status> {
        let mut connections = lock(&self.connections);
        if let Some(existing) = connections.get(&client_id) {
            return match subscription {
                Some(subscription) if existing.is_independent() => {
                    existing.promote(subscription)?;
                    Ok(existing.clone())
                }
                _ => Err(Status::already_exists(format!("Client {} already connected", client_id))),
            };
        }
        let subscribed = subscription.is_some();
        let connection = Arc::new(Connection::new(client_id, Session::new(self.engine.clone())?, subscription));
        connections.insert(client_id, connection.clone());
        debug!(client = client_id, subscribed, "added connection");
        Ok(connection)
    }

    pub fn get_connection(&self, client_id: u32) -> Result<Arc<Connection>, Status> {
        lock(&self.connections).get(&client_id).cloned()
            .ok_or_else(|| Status::not_ready(format!("Unknown client {}", client_id)))
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a client.  Its stream is invalidated first, so notifications
    /// racing with the removal are dropped.
    pub fn cleanup_connection(&self, client_id: u32) {
        let removed = {
            let mut connections = lock(&self.connections);
            if let Some(subscription) = connections.get(&client_id).and_then(|c| c.subscription()) {
                subscription.stream.invalidate();
            }
            connections.remove(&client_id)
        };
        if let Some(connection) = removed {
            connection.set_bound_program(None);
            debug!(client = client_id, "removed connection");
        }
    }

    /// Removes `client_id` unless it was promoted to a subscribed connection
    /// in the meantime.
    pub fn cleanup_independent(&self, client_id: u32) {
        let mut connections = lock(&self.connections);
        if connections.get(&client_id).map_or(false, |c| c.is_independent()) {
            connections.remove(&client_id);
            debug!(client = client_id, "removed independent connection");
        }
    }

    /// Binds `connection` to program `p4_name` of `device_id`.  A program can
    /// be bound to one client at a time.
    pub fn bind(&self, connection: &Connection, device_id: u32, p4_name: &str) -> Result<(), Status> {
        let connections = lock(&self.connections);
        let taken = connections.values().filter_map(|c| c.bound_program())
            .any(|b| b.device_id() == device_id && b.p4_name() == p4_name);
        if taken {
            return Err(Status::already_exists(format!(
                "Program {} on device {} is already bound to a client", p4_name, device_id)));
        }
        let program = BoundProgram::new(self.engine.as_ref(), device_id, p4_name)?;
        connection.set_bound_program(Some(Arc::new(program)));
        info!(client = connection.client_id(), device = device_id, program = p4_name, "bound program");
        Ok(())
    }

    /// Rebinds the clients of `device_id` after a reconfiguration.  Clients
    /// whose program is gone have their stream cancelled and are unbound.
    pub fn refresh_connections(&self, device_id: u32) {
        let connections: Vec<Arc<Connection>> = lock(&self.connections).values().cloned().collect();
        for connection in connections {
            let bound = match connection.bound_program() {
                Some(bound) if bound.device_id() == device_id => bound,
                _ => continue,
            };
            match BoundProgram::new(self.engine.as_ref(), device_id, bound.p4_name()) {
                Ok(program) => connection.set_bound_program(Some(Arc::new(program))),
                Err(e) => {
                    warn!(client = connection.client_id(), "program {} is gone ({}), cancelling stream",
                          bound.p4_name(), e);
                    if let Some(subscription) = connection.subscription() {
                        subscription.stream.close(Status::cancelled(format!(
                            "Program {} was removed from device {}", bound.p4_name(), device_id)));
                    }
                    connection.set_bound_program(None);
                }
            }
        }
    }

    /// Sends `message` to every subscribed client.
    pub fn broadcast(&self, message: StreamMessage) {
        let connections: Vec<Arc<Connection>> = lock(&self.connections).values().cloned().collect();
        for connection in connections.iter().filter(|c| !c.is_independent()) {
            if !connection.send(message.clone()) {
                debug!(client = connection.client_id(), "stream closed, dropping {:?}", message);
            }
        }
    }

    /// The completion handle to give the engine for the operation `token`.
    pub fn completion(&self, token: OperationToken) -> Completion {
        let registry = self.me.clone();
        Completion::new(token, move |token| match registry.upgrade() {
            Some(registry) => registry.deliver_completion(token),
            None => warn!("operation {:?} completed after shutdown", token),
        })
    }

    /// Wakes the caller waiting for operation `token`.  Runs on engine
    /// threads, so it never blocks on the reconfiguration lock.
    pub fn deliver_completion(&self, token: OperationToken) {
        let _guard = match self.try_read() {
            Ok(guard) => guard,
            Err(_) => {
                error!("dropping completion of {:?}: reconfiguration in progress", token);
                return;
            }
        };
        let connection = match self.get_connection(token.client_id) {
            Ok(connection) => connection,
            Err(e) => {
                error!("dropping completion of {:?} ({})", token, e);
                return;
            }
        };
        if let Some(bound) = connection.bound_program() {
            if !bound.info().has_table(token.table_id) {
                error!("dropping completion of {:?}: table not in program {}", token, bound.p4_name());
                return;
            }
        }
        if !connection.pending().complete(token.table_id) {
            warn!("no operation pending for {:?}", token);
        }
    }

    /// The callback reporting aged-out entries of `table_id` to the client
    /// identified by `cookie`.
    pub fn idle_timeout_notifier(&self, cookie: NotifyCookie, table_id: u32) -> Notifier {
        let registry = self.me.clone();
        Notifier::IdleTimeout(Arc::new(move |target: Target, key: TableKey| {
            if let Some(registry) = registry.upgrade() {
                registry.notify_idle_timeout(cookie, table_id, target, key);
            }
        }))
    }

    /// The callback reporting port status changes to the client identified by
    /// `cookie`.
    pub fn port_status_notifier(&self, cookie: NotifyCookie, table_id: u32) -> Notifier {
        let registry = self.me.clone();
        Notifier::PortStatus(Arc::new(move |key: TableKey, port_up: bool| {
            if let Some(registry) = registry.upgrade() {
                registry.notify_port_status(cookie, table_id, key, port_up);
            }
        }))
    }

    fn notified_connection(&self, cookie: NotifyCookie) -> Option<Arc<Connection>> {
        let connection = lock(&self.connections).get(&cookie.client_id).cloned();
        if connection.is_none() {
            debug!("no client for notification cookie {:?}", cookie);
        }
        connection
    }

    fn notify_idle_timeout(&self, cookie: NotifyCookie, table_id: u32, target: Target, key: TableKey) {
        if let Some(connection) = self.notified_connection(cookie) {
            if connection.notifications().idle_timeout {
                let entry = TableEntry::with_key(table_id, key, None);
                connection.send(StreamMessage::IdleTimeout { target, entry });
            }
        }
    }

    fn notify_port_status(&self, cookie: NotifyCookie, table_id: u32, key: TableKey, port_up: bool) {
        if let Some(connection) = self.notified_connection(cookie) {
            if connection.notifications().port_status {
                let entry = TableEntry::with_key(table_id, key, None);
                connection.send(StreamMessage::PortStatusChange { entry, port_up });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::StreamHandle;
    use crate::memory::MemoryEngine;
    use crate::model::Notifications;
    use crate::status::Code;

    fn registry() -> (Arc<MemoryEngine>, Arc<ConnectionRegistry>) {
        let engine = Arc::new(MemoryEngine::new());
        engine.add_device(0, Vec::new());
        (engine.clone(), ConnectionRegistry::new(engine))
    }

    fn subscription() -> Subscription {
        let (stream, _receiver) = StreamHandle::channel();
        Subscription { device_id: 0, notifications: Notifications::default(), stream }
    }

    #[test]
    fn add_then_get() {
        let (_, registry) = registry();
        registry.add_connection(7, None).unwrap();
        let connection = registry.get_connection(7).unwrap();
        assert_eq!(connection.client_id(), 7);
        assert!(format!("{:?}", connection).contains("client_id: 7"));
        assert_eq!(registry.get_connection(8).unwrap_err().code(), Code::Unavailable);
    }

    #[test]
    fn duplicate_adds_fail() {
        let (_, registry) = registry();
        registry.add_connection(7, Some(subscription())).unwrap();
        assert_eq!(registry.add_connection(7, Some(subscription())).unwrap_err().code(), Code::AlreadyExists);
        assert_eq!(registry.add_connection(7, None).unwrap_err().code(), Code::AlreadyExists);
    }

    #[test]
    fn subscription_promotes_independent_connection() {
        let (engine, registry) = registry();
        let independent = registry.add_connection(7, None).unwrap();
        let session = independent.session().handle();
        let promoted = registry.add_connection(7, Some(subscription())).unwrap();
        assert!(!promoted.is_independent());
        assert_eq!(promoted.session().handle(), session);
        assert_eq!(engine.calls("session_create"), 1);

        registry.cleanup_independent(7);
        assert!(registry.get_connection(7).is_ok());
    }

    #[test]
    fn session_destroyed_with_connection() {
        let (engine, registry) = registry();
        registry.add_connection(7, None).unwrap();
        registry.cleanup_independent(7);
        assert!(registry.is_empty());
        assert_eq!(engine.calls("session_destroy"), 1);
    }

    #[test]
    fn lock_is_busy_during_reconfiguration() {
        let (_, registry) = registry();
        let guard = registry.write();
        assert_eq!(registry.try_read().unwrap_err().message(), "resource busy");
        drop(guard);
        assert!(registry.try_read().is_ok());
    }

    #[test]
    fn completion_for_unknown_client_is_dropped() {
        let (_, registry) = registry();
        registry.completion(OperationToken { client_id: 3, table_id: 1 }).complete();
        assert!(registry.is_empty());
    }
}
