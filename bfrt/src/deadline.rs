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


//! Client deadlines, carried as `deadline_sec` and `deadline_nsec` call
//! metadata and measured from the start of the call.

use std::time::{Duration, Instant};

use tracing::warn;

pub const DEADLINE_SEC_KEY: &str = "deadline_sec";
pub const DEADLINE_NSEC_KEY: &str = "deadline_nsec";

const MAX_NSEC: i64 = 999_999_999;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline.
    pub fn none() -> Deadline {
        Deadline { at: None }
    }

    /// `timeout` after `start`.  A timeout too large to represent means no
    /// deadline.
    pub fn after(start: Instant, timeout: Duration) -> Deadline {
        Deadline { at: start.checked_add(timeout) }
    }

    /// Parses the deadline metadata of a call that started at `start`.
    /// Missing metadata, a negative value, more than 999999999 nanoseconds,
    /// or a deadline too far out to represent all mean "no deadline".
    pub fn from_metadata<'a, I>(start: Instant, metadata: I) -> Deadline
        where I: IntoIterator<Item = (&'a str, &'a [u8])>
    {
        let mut sec = None;
        let mut nsec = None;
        for (key, value) in metadata {
            match key {
                DEADLINE_SEC_KEY => sec = Some(parse_value(key, value)),
                DEADLINE_NSEC_KEY => nsec = Some(parse_value(key, value)),
                _ => (),
            }
        }
        if sec.is_none() && nsec.is_none() {
            return Deadline::none();
        }
        match (sec.unwrap_or(Some(0)), nsec.unwrap_or(Some(0))) {
            (Some(sec), Some(nsec)) if sec >= 0 && (0..=MAX_NSEC).contains(&nsec) => {
                Deadline::after(start, Duration::new(sec as u64, nsec as u32))
            }
            _ => Deadline::none(),
        }
    }

    #[cfg(test)]
    fn is_set(&self) -> bool {
        self.at.is_some()
    }

    pub fn is_exceeded(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left before the deadline, or `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

fn parse_value(key: &str, value: &[u8]) -> Option<i64> {
    let parsed = std::str::from_utf8(value).ok().and_then(|s| s.trim().parse::<i64>().ok());
    if parsed.is_none() {
        warn!("ignoring malformed {} metadata {:?}", key, String::from_utf8_lossy(value));
    }
    parsed
}
