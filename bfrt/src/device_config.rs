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


//! The description of the programs a device should run, and where their
//! artifacts live on disk.
//!
//! Artifacts of program `P` with profile `R` under install root `ROOT` are
//! stored as `ROOT/P/bf-rt.json`, `ROOT/P/R/context.json` and
//! `ROOT/P/R/tofino.bin`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::engine::PipelineEngine;
use crate::model::{
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigResponse,
    Profile,
    SetForwardingPipelineConfigRequest,
};
use crate::status::{EngineContext, Status};

pub const BF_RT_FILE_NAME: &str = "bf-rt.json";
pub const CONTEXT_FILE_NAME: &str = "context.json";
pub const PIPELINE_CFG_FILE_NAME: &str = "tofino.bin";

/// Program and profile names must be shorter than this.
pub const PROG_NAME_LEN: usize = 256;

/// Maximum number of pipes in one profile's scope.
pub const MAX_P4_PIPELINES: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A program or profile name of `PROG_NAME_LEN` bytes or more.
    #[error("name {0:?} is longer than allowed ({} bytes)", PROG_NAME_LEN - 1)]
    NameTooLong(String),

    #[error("pipe_scope of profile {profile} has {len} pipes, more than {}", MAX_P4_PIPELINES)]
    PipeScopeTooLarge { profile: String, len: usize },

    /// Two profiles of a program share a name or a pipe.
    #[error("profile {profile} of program {program} overlaps another profile")]
    OverlappingProfile { program: String, profile: String },

    #[error("program {0} is listed more than once")]
    DuplicateProgram(String),

    #[error("device {0} is not known to the pipeline engine")]
    UnknownDevice(u32),
}

/// One pipeline profile of a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P4Pipeline {
    pub profile_name: String,
    pub context_path: PathBuf,
    pub binary_path: PathBuf,
    pub pipe_scope: BTreeSet<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramConfig {
    pub name: String,
    pub bfrt_path: PathBuf,
    /// Sorted by lowest pipe.
    pub pipelines: Vec<P4Pipeline>,
}

impl ProgramConfig {
    fn add_pipeline(&mut self, pipeline: P4Pipeline) -> Result<(), ConfigError> {
        let clash = self.pipelines.iter().any(|p| {
            p.profile_name == pipeline.profile_name || !p.pipe_scope.is_disjoint(&pipeline.pipe_scope)
        });
        if clash {
            return Err(ConfigError::OverlappingProfile {
                program: self.name.clone(),
                profile: pipeline.profile_name,
            });
        }
        self.pipelines.push(pipeline);
        self.pipelines.sort_by_key(|p| p.pipe_scope.iter().next().copied());
        Ok(())
    }
}

/// The programs to load onto a device, as handed to the pipeline engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceProfile {
    pub programs: Vec<ProgramConfig>,
}

/// A device's forwarding configuration: its programs and the fixed-function
/// bf-rt files of the device itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceForwardingConfig {
    device_id: u32,
    programs: BTreeMap<String, ProgramConfig>,
    fixed_paths: Vec<PathBuf>,
}

/// The directory artifacts of a request are installed under.
pub fn install_root(base_path: &str) -> PathBuf {
    match base_path {
        "" => PathBuf::from("."),
        path => PathBuf::from(path.strip_suffix('/').unwrap_or(path)),
    }
}

fn check_name(name: &str) -> Result<(), ConfigError> {
    if name.len() >= PROG_NAME_LEN {
        return Err(ConfigError::NameTooLong(name.to_string()));
    }
    Ok(())
}

impl DeviceForwardingConfig {
    /// Describes the programs of a configuration request, located where
    /// [`DeviceForwardingConfig::save_to_disk`] puts them.
    pub fn from_request(
        engine: &dyn PipelineEngine,
        request: &SetForwardingPipelineConfigRequest,
    ) -> Result<DeviceForwardingConfig, ConfigError> {
        let root = install_root(&request.base_path);
        let mut programs = BTreeMap::new();
        for config in &request.configs {
            check_name(&config.p4_name)?;
            let program_path = root.join(&config.p4_name);
            let mut program = ProgramConfig {
                name: config.p4_name.clone(),
                bfrt_path: program_path.join(BF_RT_FILE_NAME),
                pipelines: Vec::new(),
            };
            for profile in &config.profiles {
                check_name(&profile.profile_name)?;
                if profile.pipe_scope.len() > MAX_P4_PIPELINES {
                    return Err(ConfigError::PipeScopeTooLarge {
                        profile: profile.profile_name.clone(),
                        len: profile.pipe_scope.len(),
                    });
                }
                let profile_path = program_path.join(&profile.profile_name);
                program.add_pipeline(P4Pipeline {
                    profile_name: profile.profile_name.clone(),
                    context_path: profile_path.join(CONTEXT_FILE_NAME),
                    binary_path: profile_path.join(PIPELINE_CFG_FILE_NAME),
                    pipe_scope: profile.pipe_scope.iter().copied().collect(),
                })?;
            }
            if programs.insert(program.name.clone(), program).is_some() {
                return Err(ConfigError::DuplicateProgram(config.p4_name.clone()));
            }
        }
        let fixed_paths = engine.fixed_file_paths(request.device_id)
            .map_err(|_| ConfigError::UnknownDevice(request.device_id))?;
        Ok(DeviceForwardingConfig { device_id: request.device_id, programs, fixed_paths })
    }

    /// Describes the programs currently loaded on `device_id`.
    pub fn from_device(engine: &dyn PipelineEngine, device_id: u32) -> Result<DeviceForwardingConfig, Status> {
        let mut programs = BTreeMap::new();
        let names = engine.program_names(device_id)
            .context(format!("Failed to get programs of device {}", device_id))?;
        for name in names {
            let info = engine.program(device_id, &name)
                .context(format!("Failed to get program {}", name))?;
            let pipelines = info.pipelines().iter().map(|p| P4Pipeline {
                profile_name: p.name.clone(),
                context_path: p.context_path.clone(),
                binary_path: p.binary_path.clone(),
                pipe_scope: p.pipe_scope.clone(),
            }).collect();
            programs.insert(name.clone(), ProgramConfig {
                name,
                bfrt_path: info.bfrt_path().clone(),
                pipelines,
            });
        }
        let fixed_paths = engine.fixed_file_paths(device_id)
            .context(format!("Failed to get fixed file paths of device {}", device_id))?;
        Ok(DeviceForwardingConfig { device_id, programs, fixed_paths })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn programs(&self) -> impl Iterator<Item = &ProgramConfig> {
        self.programs.values()
    }

    pub fn device_profile(&self) -> DeviceProfile {
        DeviceProfile { programs: self.programs.values().cloned().collect() }
    }

    /// Writes the artifacts carried by `request` to their install paths.
    pub fn save_to_disk(&self, request: &SetForwardingPipelineConfigRequest) -> Result<(), Status> {
        let root = install_root(&request.base_path);
        for config in &request.configs {
            let program_path = root.join(&config.p4_name);
            create_file(&program_path.join(BF_RT_FILE_NAME), &config.bfruntime_info)
                .map_err(|e| Status::internal(format!("Failed to create BF-RT file: {}", e)))?;
            for profile in &config.profiles {
                let profile_path = program_path.join(&profile.profile_name);
                create_file(&profile_path.join(CONTEXT_FILE_NAME), &profile.context)
                    .map_err(|e| Status::internal(format!("Failed to create context json file: {}", e)))?;
                create_file(&profile_path.join(PIPELINE_CFG_FILE_NAME), &profile.binary)
                    .map_err(|e| Status::internal(format!("Failed to create binary file: {}", e)))?;
            }
        }
        Ok(())
    }

    /// Reads the artifacts back.  A missing bf-rt file is an error; a missing
    /// context or binary is logged and returned empty.
    pub fn read_from_disk(&self) -> Result<GetForwardingPipelineConfigResponse, Status> {
        let mut configs = Vec::new();
        for program in self.programs.values() {
            let bfruntime_info = fs::read(&program.bfrt_path).map_err(|e| {
                Status::not_found(format!("Error opening file {}: {}", program.bfrt_path.display(), e))
            })?;
            let profiles = program.pipelines.iter().map(|p| Profile {
                profile_name: p.profile_name.clone(),
                context: read_or_warn(&p.context_path),
                binary: read_or_warn(&p.binary_path),
                pipe_scope: p.pipe_scope.iter().copied().collect(),
            }).collect();
            configs.push(ForwardingPipelineConfig {
                p4_name: program.name.clone(),
                bfruntime_info,
                profiles,
            });
        }
        Ok(GetForwardingPipelineConfigResponse {
            configs,
            non_p4_bfruntime_info: squash_bfrt_jsons(&self.fixed_paths),
        })
    }
}

fn create_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, content)
}

fn read_or_warn(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| {
        warn!("Error opening file {} ({})", path.display(), e);
        Vec::new()
    })
}

/// Merges bf-rt json files into one document: the tables of every file are
/// appended to the first file's, and `learn_filters` come from the last file.
pub fn squash_bfrt_jsons(paths: &[PathBuf]) -> Vec<u8> {
    let documents: Vec<Value> = paths.iter().filter_map(|path| {
        let parsed = fs::read(path).map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_slice::<Value>(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(document) => Some(document),
            Err(e) => {
                error!("Failed to read file {} into a json object ({})", path.display(), e);
                None
            }
        }
    }).collect();

    let mut iter = documents.iter();
    let mut merged = match iter.next() {
        Some(first) => first.clone(),
        None => return Vec::new(),
    };
    for document in iter {
        let tables = document.get("tables").and_then(Value::as_array).cloned().unwrap_or_default();
        match merged.get_mut("tables").and_then(Value::as_array_mut) {
            Some(existing) => existing.extend(tables),
            None => {
                if let Some(object) = merged.as_object_mut() {
                    object.insert("tables".into(), Value::Array(tables));
                }
            }
        }
    }
    if let (Some(last), Some(object)) = (documents.last(), merged.as_object_mut()) {
        if let Some(filters) = last.get("learn_filters") {
            object.insert("learn_filters".into(), filters.clone());
        }
    }
    merged.to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;
    use crate::model::{ConfigAction, DevInitMode};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bfrt-{}-{}", name, rand::random::<u32>()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn request(base_path: &str, configs: Vec<ForwardingPipelineConfig>) -> SetForwardingPipelineConfigRequest {
        SetForwardingPipelineConfigRequest {
            client_id: 1,
            device_id: 0,
            action: ConfigAction::Verify,
            dev_init_mode: DevInitMode::FastReconfig,
            base_path: base_path.into(),
            configs,
        }
    }

    fn program(name: &str, profiles: &[(&str, &[u32])]) -> ForwardingPipelineConfig {
        ForwardingPipelineConfig {
            p4_name: name.into(),
            bfruntime_info: br#"{"tables": []}"#.to_vec(),
            profiles: profiles.iter().map(|(profile, pipes)| Profile {
                profile_name: profile.to_string(),
                context: b"{}".to_vec(),
                binary: vec![0xde, 0xad],
                pipe_scope: pipes.to_vec(),
            }).collect(),
        }
    }

    fn engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.add_device(0, Vec::new());
        engine
    }

    #[test]
    fn install_root_trims_one_slash() {
        assert_eq!(install_root(""), PathBuf::from("."));
        assert_eq!(install_root("/srv/p4/"), PathBuf::from("/srv/p4"));
        assert_eq!(install_root("/srv/p4"), PathBuf::from("/srv/p4"));
    }

    #[test]
    fn builds_paths_from_request() {
        let engine = engine();
        let req = request("/srv/p4/", vec![program("fwd", &[("pipe1", &[2, 3]), ("pipe0", &[0, 1])])]);
        let config = DeviceForwardingConfig::from_request(&engine, &req).unwrap();
        let fwd = config.programs().next().unwrap();
        assert_eq!(fwd.bfrt_path, PathBuf::from("/srv/p4/fwd/bf-rt.json"));
        assert_eq!(fwd.pipelines[0].profile_name, "pipe0");
        assert_eq!(fwd.pipelines[0].context_path, PathBuf::from("/srv/p4/fwd/pipe0/context.json"));
        assert_eq!(fwd.pipelines[1].binary_path, PathBuf::from("/srv/p4/fwd/pipe1/tofino.bin"));
    }

    #[test]
    fn rejects_invalid_requests() {
        let engine = engine();
        let long = "x".repeat(PROG_NAME_LEN);
        let cases = vec![
            (vec![program(&long, &[])], ConfigError::NameTooLong(long.clone())),
            (vec![program("p", &[("a", &[0, 1, 2, 3, 4])])],
             ConfigError::PipeScopeTooLarge { profile: "a".into(), len: 5 }),
            (vec![program("p", &[("a", &[0, 1]), ("b", &[1, 2])])],
             ConfigError::OverlappingProfile { program: "p".into(), profile: "b".into() }),
            (vec![program("p", &[("a", &[0]), ("a", &[1])])],
             ConfigError::OverlappingProfile { program: "p".into(), profile: "a".into() }),
            (vec![program("p", &[]), program("p", &[])], ConfigError::DuplicateProgram("p".into())),
        ];
        for (configs, expected) in cases {
            assert_eq!(DeviceForwardingConfig::from_request(&engine, &request("", configs)), Err(expected));
        }

        let mut unknown = request("", vec![]);
        unknown.device_id = 9;
        assert_eq!(DeviceForwardingConfig::from_request(&engine, &unknown), Err(ConfigError::UnknownDevice(9)));
    }

    #[test]
    fn saves_and_reads_back() {
        let dir = scratch_dir("disk");
        let engine = engine();
        let req = request(dir.to_str().unwrap(), vec![program("fwd", &[("pipe", &[0, 1, 2, 3])])]);
        let config = DeviceForwardingConfig::from_request(&engine, &req).unwrap();
        config.save_to_disk(&req).unwrap();
        assert!(dir.join("fwd/pipe/tofino.bin").exists());

        let response = config.read_from_disk().unwrap();
        assert_eq!(response.configs, req.configs);
        assert!(response.non_p4_bfruntime_info.is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_bfrt_file_is_not_found() {
        let dir = scratch_dir("missing");
        let engine = engine();
        let req = request(dir.to_str().unwrap(), vec![program("fwd", &[])]);
        let config = DeviceForwardingConfig::from_request(&engine, &req).unwrap();
        assert_eq!(config.read_from_disk().unwrap_err().code(), crate::status::Code::NotFound);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn squashes_fixed_jsons() {
        let dir = scratch_dir("squash");
        let a = dir.join("a.json");
        let b = dir.join("b.json");
        fs::write(&a, r#"{"schema_version": "1.0", "tables": [{"name": "port"}]}"#).unwrap();
        fs::write(&b, r#"{"tables": [{"name": "mirror"}], "learn_filters": [{"name": "digest"}]}"#).unwrap();
        let missing = dir.join("missing.json");

        let merged: Value = serde_json::from_slice(&squash_bfrt_jsons(&[a, missing, b])).unwrap();
        let names: Vec<&str> = merged["tables"].as_array().unwrap().iter()
            .map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["port", "mirror"]);
        assert_eq!(merged["schema_version"], "1.0");
        assert_eq!(merged["learn_filters"][0]["name"], "digest");
        assert!(squash_bfrt_jsons(&[]).is_empty());
        fs::remove_dir_all(dir).unwrap();
    }
}
