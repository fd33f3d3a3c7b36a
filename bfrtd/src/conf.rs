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


//! The device configuration file: the devices to create at startup and the
//! programs to load onto them.
//!
//! ```json
//! { "p4_devices": [ { "device-id": 0,
//!     "fixed_functions": ["port.json"],
//!     "p4_programs": [ { "program-name": "fwd", "bfrt-config": "fwd/bf-rt.json",
//!         "p4_pipelines": [ { "p4_pipeline_name": "pipe", "context": "fwd/pipe/context.json",
//!             "config": "fwd/pipe/tofino.bin", "pipe_scope": [0, 1, 2, 3] } ] } ] } ] }
//! ```
//!
//! Relative paths are relative to the directory of the file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use bfrt::device_config::{DeviceProfile, MAX_P4_PIPELINES, P4Pipeline, ProgramConfig};
use bfrt::{MemoryEngine, PipelineEngine};
use serde::Deserialize;
use tracing::info;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Conf {
    pub p4_devices: Vec<DeviceConf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct DeviceConf {
    #[serde(rename = "device-id")]
    pub device_id: u32,
    #[serde(default)]
    pub fixed_functions: Vec<PathBuf>,
    #[serde(default)]
    pub p4_programs: Vec<ProgramConf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ProgramConf {
    #[serde(rename = "program-name")]
    pub program_name: String,
    #[serde(rename = "bfrt-config")]
    pub bfrt_config: PathBuf,
    #[serde(default)]
    pub p4_pipelines: Vec<PipelineConf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PipelineConf {
    pub p4_pipeline_name: String,
    pub context: PathBuf,
    pub config: PathBuf,
    #[serde(default)]
    pub pipe_scope: BTreeSet<u32>,
}

impl Conf {
    pub fn parse(s: &str, base: &Path) -> Result<Conf> {
        let mut conf: Conf = serde_json::from_str(s)?;
        conf.resolve(base);
        Ok(conf)
    }

    pub fn load(path: &Path) -> Result<Conf> {
        let s = fs::read_to_string(path).with_context(|| format!("{}: read failed", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Conf::parse(&s, base).with_context(|| format!("{}: parse failed", path.display()))
    }

    fn resolve(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for device in &mut self.p4_devices {
            device.fixed_functions.iter_mut().for_each(resolve);
            for program in &mut device.p4_programs {
                resolve(&mut program.bfrt_config);
                for pipeline in &mut program.p4_pipelines {
                    resolve(&mut pipeline.context);
                    resolve(&mut pipeline.config);
                }
            }
        }
    }

    /// Creates every device on `engine` and loads its programs.
    pub fn preload(&self, engine: &MemoryEngine) -> Result<()> {
        for device in &self.p4_devices {
            let profile = device.profile()?;
            engine.add_device(device.device_id, device.fixed_functions.clone());
            engine.device_add(device.device_id, &profile)
                .with_context(|| format!("device {}: loading programs failed", device.device_id))?;
            info!(device_id = device.device_id, "loaded programs {:?}",
                  profile.programs.iter().map(|p| &p.name).collect::<Vec<_>>());
        }
        Ok(())
    }
}

impl DeviceConf {
    fn profile(&self) -> Result<DeviceProfile> {
        let programs = self.p4_programs.iter().map(|program| {
            let mut pipelines = Vec::with_capacity(program.p4_pipelines.len());
            for pipeline in &program.p4_pipelines {
                if pipeline.pipe_scope.len() > MAX_P4_PIPELINES {
                    return Err(anyhow!("program {} profile {}: pipe_scope has more than {} pipes",
                                       program.program_name, pipeline.p4_pipeline_name, MAX_P4_PIPELINES));
                }
                pipelines.push(P4Pipeline {
                    profile_name: pipeline.p4_pipeline_name.clone(),
                    context_path: pipeline.context.clone(),
                    binary_path: pipeline.config.clone(),
                    pipe_scope: pipeline.pipe_scope.clone(),
                });
            }
            Ok(ProgramConfig {
                name: program.program_name.clone(),
                bfrt_path: program.bfrt_config.clone(),
                pipelines,
            })
        }).collect::<Result<_>>()?;
        Ok(DeviceProfile { programs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = r#"{
      "p4_devices": [
        {
          "device-id": 0,
          "fixed_functions": ["/usr/share/bfrt/port.json"],
          "p4_programs": [
            {
              "program-name": "fwd",
              "bfrt-config": "fwd/bf-rt.json",
              "p4_pipelines": [
                {
                  "p4_pipeline_name": "pipe",
                  "context": "fwd/pipe/context.json",
                  "config": "fwd/pipe/tofino.bin",
                  "pipe_scope": [0, 1, 2, 3]
                }
              ]
            }
          ]
        }
      ]
    }"#;

    const BFRT_JSON: &str = r#"{
      "schema_version": "1.0.0",
      "tables": [
        {
          "name": "pipe.SwitchIngress.fwd",
          "id": 10,
          "table_type": "MatchAction_Direct",
          "size": 16,
          "key": [{"id": 1, "name": "hdr.ethernet.dst_addr", "match_type": "Exact", "mandatory": false}],
          "action_specs": [{"id": 100, "name": "SwitchIngress.send", "data": [{"id": 1, "name": "port"}]}],
          "data": []
        }
      ]
    }"#;

    #[test]
    fn relative_paths_resolve_against_the_conf_dir() {
        let conf = Conf::parse(CONF, Path::new("/etc/bfrtd")).unwrap();
        let device = &conf.p4_devices[0];
        assert_eq!(device.fixed_functions, vec![PathBuf::from("/usr/share/bfrt/port.json")]);
        let program = &device.p4_programs[0];
        assert_eq!(program.bfrt_config, PathBuf::from("/etc/bfrtd/fwd/bf-rt.json"));
        assert_eq!(program.p4_pipelines[0].config, PathBuf::from("/etc/bfrtd/fwd/pipe/tofino.bin"));
        assert_eq!(program.p4_pipelines[0].pipe_scope, (0..4).collect());
    }

    #[test]
    fn programs_and_pipelines_are_optional() {
        let conf = Conf::parse(r#"{"p4_devices": [{"device-id": 3}]}"#, Path::new(".")).unwrap();
        assert_eq!(conf.p4_devices[0].device_id, 3);
        assert!(conf.p4_devices[0].p4_programs.is_empty());
        assert!(conf.p4_devices[0].profile().unwrap().programs.is_empty());
    }

    #[test]
    fn pipe_scope_is_limited() {
        let conf = CONF.replace("[0, 1, 2, 3]", "[0, 1, 2, 3, 4]");
        let conf = Conf::parse(&conf, Path::new(".")).unwrap();
        assert!(conf.p4_devices[0].profile().is_err());
    }

    #[test]
    fn preload_loads_programs_from_disk() {
        let dir = std::env::temp_dir().join(format!("bfrtd-conf-{}", std::process::id()));
        fs::create_dir_all(dir.join("fwd")).unwrap();
        fs::write(dir.join("fwd/bf-rt.json"), BFRT_JSON).unwrap();
        fs::write(dir.join("bfrtd.conf"), CONF).unwrap();

        let engine = MemoryEngine::new();
        Conf::load(&dir.join("bfrtd.conf")).unwrap().preload(&engine).unwrap();
        assert_eq!(engine.program_names(0).unwrap(), vec!["fwd".to_string()]);
        let program = engine.program(0, "fwd").unwrap();
        assert!(program.has_table(10));
        assert_eq!(program.pipelines()[0].pipe_mask(), 0xf);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_bfrt_json_fails_preload() {
        let conf = Conf::parse(CONF, Path::new("/nonexistent")).unwrap();
        assert!(conf.preload(&MemoryEngine::new()).is_err());
    }
}
