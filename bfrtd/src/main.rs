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


//! `bfrtd` serves the BF Runtime gRPC interface over the software pipeline
//! engine.  Devices and programs to start with come from a configuration
//! file; clients can replace programs at runtime with
//! SetForwardingPipelineConfig.

mod conf;
mod convert;
mod service;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bfrt::{BfRtServer, MemoryEngine, ServerConfig};
use clap::Parser;
use grpcio::{ChannelBuilder, Environment, ServerBuilder};
use proto::bfruntime_grpc::create_bf_runtime;
use signal_hook::{consts::signal::*, iterator::Signals};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::conf::Conf;
use crate::service::BfRuntimeService;

/// Threads polling gRPC completion queues.  Write blocks its thread while it
/// waits for table operations, so keep more than one.
const GRPC_THREADS: usize = 4;

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Address to accept BF Runtime connections on
    #[clap(long, default_value = "0.0.0.0")]
    address: String,

    /// Port to accept BF Runtime connections on
    #[clap(long, default_value_t = 50052)]
    port: u16,

    /// Accept connections from this host only, overriding --address
    #[clap(long)]
    local_only: bool,

    /// Device configuration file listing the programs to load at startup
    #[clap(long)]
    conf_file: Option<PathBuf>,

    /// How long a Write waits for asynchronous table operations
    #[clap(long, default_value_t = 5000)]
    operation_timeout_ms: u64,

    /// Log filter, e.g. "info" or "bfrt=debug" (defaults to RUST_LOG, then "info")
    #[clap(long)]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    log_panics::init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    let engine = Arc::new(MemoryEngine::new());
    match &args.conf_file {
        Some(path) => Conf::load(path)?.preload(&engine)?,
        None => engine.add_device(0, Vec::new()),
    }

    let config = ServerConfig { operation_timeout: Duration::from_millis(args.operation_timeout_ms) };
    let server = Arc::new(BfRtServer::new(engine, config));

    let address = if args.local_only { "127.0.0.1" } else { args.address.as_str() };
    let env = Arc::new(Environment::new(GRPC_THREADS));
    let service = create_bf_runtime(BfRuntimeService::new(server.clone()));
    let ch_builder = ChannelBuilder::new(env.clone());
    let mut grpc_server = ServerBuilder::new(env)
        .register_service(service)
        .bind(address, args.port)
        .channel_args(ch_builder.build_args())
        .build()
        .with_context(|| format!("cannot serve on {}:{}", address, args.port))?;
    grpc_server.start();
    info!("BF Runtime server listening on {}:{}", address, args.port);

    let mut signals = Signals::new(&[SIGTERM, SIGINT, SIGHUP])?;
    if let Some(signal) = signals.forever().next() {
        info!("exiting on signal {}", signal);
    }
    if !server.registry().is_empty() {
        info!("dropping {} connected clients", server.registry().len());
    }
    futures::executor::block_on(grpc_server.shutdown())?;
    Ok(())
}
