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


use std::fmt::{self, Display};

use tracing::info;

use crate::device_config::DeviceForwardingConfig;
use crate::engine::PipelineEngine;
use crate::model::{GetForwardingPipelineConfigResponse, SetForwardingPipelineConfigRequest};
use crate::status::{EngineContext, Status};

/// Where a client is in reconfiguring its device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForwardingConfigState {
    Initial,
    WarmInitStarted,
    WarmInitFinished,
}

impl Display for ForwardingConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingConfigState::Initial => write!(f, "INITIAL"),
            ForwardingConfigState::WarmInitStarted => write!(f, "WARM_INIT_STARTED"),
            ForwardingConfigState::WarmInitFinished => write!(f, "WARM_INIT_FINISHED"),
        }
    }
}

/// Drives one client's warm-init state machine.
#[derive(Debug)]
pub struct ConfigManager {
    state: ForwardingConfigState,
    /// The configuration being applied, while warm init is in progress.
    in_flight: Option<DeviceForwardingConfig>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        ConfigManager::new()
    }
}

impl ConfigManager {
    pub fn new() -> ConfigManager {
        ConfigManager { state: ForwardingConfigState::Initial, in_flight: None }
    }

    pub fn state(&self) -> ForwardingConfigState {
        self.state
    }

    /// Checks a configuration before it is applied.  Every configuration that
    /// can be built from a request is currently accepted.
    pub fn verify(&self, _config: &DeviceForwardingConfig) -> Result<(), Status> {
        Ok(())
    }

    /// Saves the artifacts of `request` and loads `config` onto its device.
    /// The state is unchanged on failure.
    pub fn warm_init_begin(
        &mut self,
        engine: &dyn PipelineEngine,
        config: DeviceForwardingConfig,
        request: &SetForwardingPipelineConfigRequest,
    ) -> Result<(), Status> {
        if self.state == ForwardingConfigState::WarmInitStarted {
            return Err(Status::not_ready("Warm_init in process."));
        }
        let device_id = config.device_id();
        config.save_to_disk(request)?;
        engine.warm_init_begin(device_id, request.dev_init_mode)
            .context(format!("Failed to begin warm init on device {}", device_id))?;
        engine.device_add(device_id, &config.device_profile())
            .context(format!("Failed to add device {}", device_id))?;
        info!(device = device_id, mode = ?request.dev_init_mode, "warm init started");
        self.in_flight = Some(config);
        self.state = ForwardingConfigState::WarmInitStarted;
        Ok(())
    }

    pub fn warm_init_end(&mut self, engine: &dyn PipelineEngine) -> Result<(), Status> {
        let device_id = match (self.state, &self.in_flight) {
            (ForwardingConfigState::Initial, _) => return Err(Status::not_found("No config saved found")),
            (ForwardingConfigState::WarmInitFinished, _) => {
                return Err(Status::not_ready("Warm init already finished"))
            }
            (ForwardingConfigState::WarmInitStarted, Some(config)) => config.device_id(),
            (ForwardingConfigState::WarmInitStarted, None) => {
                return Err(Status::internal("Warm init started without a config"))
            }
        };
        engine.warm_init_end(device_id)
            .context(format!("Failed to end warm init on device {}", device_id))?;
        info!(device = device_id, "warm init finished");
        self.in_flight = None;
        self.state = ForwardingConfigState::WarmInitFinished;
        Ok(())
    }

    /// The configuration of `device_id` with the content of its artifacts.
    /// While warm init is in progress this is the configuration being applied.
    pub fn get(&self, engine: &dyn PipelineEngine, device_id: u32) -> Result<GetForwardingPipelineConfigResponse, Status> {
        match &self.in_flight {
            Some(config) if self.state == ForwardingConfigState::WarmInitStarted => config.read_from_disk(),
            _ => DeviceForwardingConfig::from_device(engine, device_id)?.read_from_disk(),
        }
    }
}
