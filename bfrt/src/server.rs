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


//! The BF Runtime server: the entry points of the RPC service, independent of
//! any RPC framework.

use std::sync::{Arc, RwLockReadGuard};
use std::time::Duration;

use tracing::{debug, error};

use crate::config_manager::ConfigManager;
use crate::connection::Connection;
use crate::connections::ConnectionRegistry;
use crate::device_config::DeviceForwardingConfig;
use crate::engine::PipelineEngine;
use crate::model::{
    ConfigAction,
    GetForwardingPipelineConfigResponse,
    SetForwardingPipelineConfigRequest,
    StreamMessage,
    Target,
    WarmInitEvent,
};
use crate::registry::ProgramInfo;
use crate::status::{Code, EngineContext, Status};

/// How long a Write waits for an asynchronous table operation, unless the
/// client's deadline comes first.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub operation_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { operation_timeout: DEFAULT_OPERATION_TIMEOUT }
    }
}

/// Owns the pipeline engine handle and the connected clients.
pub struct BfRtServer {
    registry: Arc<ConnectionRegistry>,
    config: ServerConfig,
}

/// A call in progress for one client.  Holds the reconfiguration lock `G`,
/// in read mode unless the call reconfigures, and removes the client's
/// connection at the end of the call if the call created it.
pub(crate) struct ClientCall<'a, G = RwLockReadGuard<'a, ()>> {
    registry: &'a ConnectionRegistry,
    pub(crate) connection: Arc<Connection>,
    created: bool,
    _guard: G,
}

impl<G> ClientCall<'_, G> {
    /// The program a request addresses.  Independent clients, and requests
    /// naming a program, use the program loaded on the target device.  Others
    /// use the client's bound program.
    pub(crate) fn program(&self, target: &Target, p4_name: &str) -> Result<Arc<ProgramInfo>, Status> {
        if self.connection.is_independent() || !p4_name.is_empty() {
            return self.registry.engine().program(target.device_id, p4_name)
                .context(format!("Program {} not found on device {}", p4_name, target.device_id));
        }
        match self.connection.bound_program() {
            Some(bound) if bound.device_id() != target.device_id => Err(Status::invalid_argument(format!(
                "Target device {} does not match device {} of bound program {}",
                target.device_id, bound.device_id(), bound.p4_name()))),
            Some(bound) => Ok(bound.info().clone()),
            None => Err(Status::not_found(format!(
                "No program bound to client {}", self.connection.client_id()))),
        }
    }
}

impl<G> Drop for ClientCall<'_, G> {
    fn drop(&mut self) {
        if self.created {
            self.registry.cleanup_independent(self.connection.client_id());
        }
    }
}

impl BfRtServer {
    pub fn new(engine: Arc<dyn PipelineEngine>, config: ServerConfig) -> BfRtServer {
        BfRtServer { registry: ConnectionRegistry::new(engine), config }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn PipelineEngine> {
        self.registry.engine()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts a call on behalf of `client_id`, connecting it as an
    /// independent client if it is not connected yet.
    pub(crate) fn begin_call(&self, client_id: u32) -> Result<ClientCall<'_>, Status> {
        let guard = self.registry.try_read()?;
        self.connect(client_id, guard)
    }

    /// Starts a call holding `guard`, connecting `client_id` as an
    /// independent client for the length of the call if needed.
    fn connect<G>(&self, client_id: u32, guard: G) -> Result<ClientCall<'_, G>, Status> {
        let (connection, created) = match self.registry.add_connection(client_id, None) {
            Ok(connection) => (connection, true),
            Err(e) if e.code() == Code::AlreadyExists => (self.registry.get_connection(client_id)?, false),
            Err(e) => return Err(e),
        };
        Ok(ClientCall { registry: &self.registry, connection, created, _guard: guard })
    }

    pub fn set_forwarding_pipeline_config(&self, request: &SetForwardingPipelineConfigRequest) -> Result<(), Status> {
        debug!(client = request.client_id, device = request.device_id, action = ?request.action,
               "SetForwardingPipelineConfig");
        match request.action {
            ConfigAction::Bind => self.bind(request),
            _ => self.reconfigure(request),
        }
    }

    fn bind(&self, request: &SetForwardingPipelineConfigRequest) -> Result<(), Status> {
        let _guard = self.registry.try_read()?;
        let connection = self.registry.get_connection(request.client_id)?;
        let config = match request.configs.as_slice() {
            [config] => config,
            configs => return Err(Status::invalid_argument(format!(
                "Binding needs exactly one config, got {}", configs.len()))),
        };
        self.registry.bind(&connection, request.device_id, &config.p4_name)
    }

    fn reconfigure(&self, request: &SetForwardingPipelineConfigRequest) -> Result<(), Status> {
        let call = self.connect(request.client_id, self.registry.write())?;
        let config = DeviceForwardingConfig::from_request(self.engine().as_ref(), request).map_err(|e| {
            error!("rejecting config from client {}: {}", request.client_id, e);
            Status::invalid_argument("Invalid device config sent")
        })?;
        let mut manager = call.connection.config_manager();
        match request.action {
            ConfigAction::Verify => manager.verify(&config),
            ConfigAction::VerifyAndWarmInitBegin => {
                manager.verify(&config)?;
                self.warm_init_begin(&mut manager, config, request)
            }
            ConfigAction::VerifyAndWarmInitBeginAndEnd => {
                manager.verify(&config)?;
                self.warm_init_begin(&mut manager, config, request)?;
                self.warm_init_end(&mut manager, request.device_id)
            }
            ConfigAction::WarmInitEnd => {
                if !request.configs.is_empty() {
                    return Err(Status::invalid_argument("WARM_INIT_END takes no configs"));
                }
                self.warm_init_end(&mut manager, request.device_id)
            }
            ConfigAction::ReconcileAndWarmInitEnd => {
                Err(Status::unimplemented("RECONCILE_AND_WARM_INIT_END is not supported"))
            }
            // Handled under the read lock by `bind`.
            ConfigAction::Bind => Err(Status::internal("BIND dispatched as a reconfiguration")),
        }
    }

    fn warm_init_begin(
        &self,
        manager: &mut ConfigManager,
        config: DeviceForwardingConfig,
        request: &SetForwardingPipelineConfigRequest,
    ) -> Result<(), Status> {
        manager.warm_init_begin(self.engine().as_ref(), config, request)?;
        self.registry.broadcast(StreamMessage::WarmInit(WarmInitEvent::Started));
        self.registry.refresh_connections(request.device_id);
        Ok(())
    }

    fn warm_init_end(&self, manager: &mut ConfigManager, device_id: u32) -> Result<(), Status> {
        manager.warm_init_end(self.engine().as_ref())?;
        self.registry.broadcast(StreamMessage::WarmInit(WarmInitEvent::Finished));
        self.registry.refresh_connections(device_id);
        Ok(())
    }

    pub fn get_forwarding_pipeline_config(&self, client_id: u32, device_id: u32)
                                          -> Result<GetForwardingPipelineConfigResponse, Status> {
        let call = self.connect(client_id, self.registry.try_read()?)?;
        let manager = call.connection.config_manager();
        manager.get(self.engine().as_ref(), device_id)
    }
}
