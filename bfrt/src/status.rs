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


//! RPC status codes and the errors reported by the pipeline engine.

use std::fmt::{self, Display};

use thiserror::Error;

/// Canonical RPC status codes, numbered as in `google.rpc.Code`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Code {
        use Code::*;
        match code {
            0 => Ok,
            1 => Cancelled,
            3 => InvalidArgument,
            4 => DeadlineExceeded,
            5 => NotFound,
            6 => AlreadyExists,
            7 => PermissionDenied,
            8 => ResourceExhausted,
            9 => FailedPrecondition,
            10 => Aborted,
            11 => OutOfRange,
            12 => Unimplemented,
            13 => Internal,
            14 => Unavailable,
            15 => DataLoss,
            16 => Unauthenticated,
            _ => Unknown,
        }
    }

    fn name(self) -> &'static str {
        use Code::*;
        match self {
            Ok => "OK",
            Cancelled => "CANCELLED",
            Unknown => "UNKNOWN",
            InvalidArgument => "INVALID_ARGUMENT",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            NotFound => "NOT_FOUND",
            AlreadyExists => "ALREADY_EXISTS",
            PermissionDenied => "PERMISSION_DENIED",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            FailedPrecondition => "FAILED_PRECONDITION",
            Aborted => "ABORTED",
            OutOfRange => "OUT_OF_RANGE",
            Unimplemented => "UNIMPLEMENTED",
            Internal => "INTERNAL",
            Unavailable => "UNAVAILABLE",
            DataLoss => "DATA_LOSS",
            Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An RPC failure: a canonical code, a message, and, for aggregate results of
/// multi-item requests, one sub-status per request item.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
    details: Vec<Status>,
}

impl Status {
    pub fn new<S: Into<String>>(code: Code, message: S) -> Status {
        Status { code, message: message.into(), details: Vec::new() }
    }

    pub fn with_details<S: Into<String>>(code: Code, message: S, details: Vec<Status>) -> Status {
        Status { code, message: message.into(), details }
    }

    pub fn ok() -> Status {
        Status::new(Code::Ok, "")
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Cancelled, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Unknown, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Status {
        Status::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Status {
        Status::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Status {
        Status::new(Code::NotFound, message)
    }

    pub fn already_exists<S: Into<String>>(message: S) -> Status {
        Status::new(Code::AlreadyExists, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Unimplemented, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Internal, message)
    }

    /// The "not ready" condition: an unknown client, a busy reconfiguration
    /// lock, or a reconfiguration already in progress.
    pub fn not_ready<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Unavailable, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &[Status] {
        &self.details
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// Errors reported by the pipeline engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum EngineError {
    #[error("object not ready")]
    NotReady,
    #[error("table locked")]
    TableLocked,
    #[error("device locked")]
    DeviceLocked,
    #[error("object in use")]
    InUse,
    #[error("no system resources")]
    NoSysResources,
    #[error("no space in table")]
    NoSpace,
    #[error("maximum number of sessions exceeded")]
    MaxSessionsExceeded,
    #[error("I/O error")]
    Io,
    #[error("invalid argument")]
    InvalidArg,
    #[error("object already exists")]
    AlreadyExists,
    #[error("entry references exist")]
    EntryReferencesExist,
    #[error("object not found")]
    ObjectNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("table not found")]
    TableNotFound,
    #[error("operation not supported")]
    NotSupported,
    #[error("not implemented")]
    NotImplemented,
    #[error("transactions not supported")]
    TxnNotSupported,
    #[error("internal error")]
    Internal,
    #[error("initialization error")]
    InitError,
    #[error("hardware update failed")]
    HwUpdateFailed,
    #[error("unexpected error")]
    Unexpected,
}

impl EngineError {
    /// The RPC code a client sees for this engine error.
    pub fn code(self) -> Code {
        use EngineError::*;
        match self {
            NotReady | TableLocked | DeviceLocked | InUse => Code::Unavailable,
            NoSysResources | NoSpace | MaxSessionsExceeded | Io => Code::ResourceExhausted,
            InvalidArg => Code::InvalidArgument,
            AlreadyExists | EntryReferencesExist => Code::AlreadyExists,
            ObjectNotFound | SessionNotFound | TableNotFound => Code::NotFound,
            NotSupported | NotImplemented | TxnNotSupported => Code::Unimplemented,
            Internal => Code::Internal,
            InitError => Code::Aborted,
            HwUpdateFailed | Unexpected => Code::Unknown,
        }
    }
}

impl From<EngineError> for Status {
    fn from(e: EngineError) -> Status {
        Status::new(e.code(), e.to_string())
    }
}

/// Attaches a description of the failed step to an engine error, the way
/// `anyhow::Context` does for `anyhow` errors.
pub trait EngineContext<T> {
    fn context<S: Display>(self, what: S) -> Result<T, Status>;
}

impl<T> EngineContext<T> for Result<T, EngineError> {
    fn context<S: Display>(self, what: S) -> Result<T, Status> {
        self.map_err(|e| Status::new(e.code(), format!("{}: {}", what, e)))
    }
}
