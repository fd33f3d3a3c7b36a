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


//! Correlates asynchronous pipeline-engine completions with the RPC calls
//! waiting for them.
//!
//! Issuing an operation registers a channel in the issuing connection's
//! [`PendingOperations`] under the operation's table id and hands the engine a
//! [`Completion`](crate::engine::Completion) carrying an [`OperationToken`].
//! When the engine completes the operation, the token leads back to the
//! connection, and the completion is delivered on the oldest channel
//! registered for that table.  The caller waits on the receiving end with a
//! bounded timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Identifies an asynchronous operation: the issuing client and the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationToken {
    pub client_id: u32,
    pub table_id: u32,
}

impl OperationToken {
    pub fn encode(self) -> u64 {
        (u64::from(self.table_id) << 32) | u64::from(self.client_id)
    }

    pub fn decode(value: u64) -> OperationToken {
        OperationToken {
            client_id: value as u32,
            table_id: (value >> 32) as u32,
        }
    }
}

/// Identifies the recipient of idle-timeout and port-status notifications.
/// Encoded as the device id in the top 8 bits and the low 24 bits of the
/// client id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NotifyCookie {
    pub device_id: u32,
    pub client_id: u32,
}

impl NotifyCookie {
    pub fn encode(self) -> u32 {
        (self.device_id << 24) | (self.client_id & 0x00ff_ffff)
    }

    pub fn decode(value: u32) -> NotifyCookie {
        NotifyCookie {
            device_id: value >> 24,
            client_id: value & 0x00ff_ffff,
        }
    }
}

/// How waiting for one operation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

#[derive(Debug, Default)]
struct Waiters {
    next_seq: u64,
    by_table: HashMap<u32, VecDeque<(u64, SyncSender<()>)>>,
}

/// Operations a connection issued that have not completed yet.
#[derive(Clone, Debug, Default)]
pub struct PendingOperations {
    waiters: Arc<Mutex<Waiters>>,
}

impl PendingOperations {
    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an operation about to be issued on `token.table_id`.
    /// Dropping the returned value withdraws the registration.
    pub fn register(&self, token: OperationToken) -> PendingOperation {
        let (sender, receiver) = mpsc::sync_channel(1);
        let mut waiters = self.lock();
        let seq = waiters.next_seq;
        waiters.next_seq += 1;
        waiters.by_table.entry(token.table_id).or_default().push_back((seq, sender));
        PendingOperation {
            token,
            seq,
            receiver,
            owner: self.clone(),
        }
    }

    /// Delivers a completion for `table_id` to the oldest waiter.  Returns
    /// false if no operation on that table was pending.
    pub fn complete(&self, table_id: u32) -> bool {
        let sender = {
            let mut waiters = self.lock();
            let queue = match waiters.by_table.get_mut(&table_id) {
                Some(queue) => queue,
                None => return false,
            };
            let front = queue.pop_front();
            if queue.is_empty() {
                waiters.by_table.remove(&table_id);
            }
            match front {
                Some((_, sender)) => sender,
                None => return false,
            }
        };
        // The waiter may have given up already; that is fine.
        let _ = sender.try_send(());
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().by_table.values().map(VecDeque::len).sum()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn withdraw(&self, table_id: u32, seq: u64) {
        let mut waiters = self.lock();
        if let Some(queue) = waiters.by_table.get_mut(&table_id) {
            queue.retain(|(s, _)| *s != seq);
            if queue.is_empty() {
                waiters.by_table.remove(&table_id);
            }
        }
    }
}

/// A registered operation, waiting for its completion.
pub struct PendingOperation {
    token: OperationToken,
    seq: u64,
    receiver: Receiver<()>,
    owner: PendingOperations,
}

impl PendingOperation {
    pub fn token(&self) -> OperationToken {
        self.token
    }

    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        match self.receiver.recv_timeout(timeout) {
            Ok(()) => WaitOutcome::Completed,
            // The sender stays registered until it delivers or this waiter
            // withdraws it, so a disconnect can only follow a delivery.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => WaitOutcome::TimedOut,
        }
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        self.owner.withdraw(self.token.table_id, self.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_encoding() {
        let token = OperationToken { client_id: 0xdead_beef, table_id: 0x0100_0002 };
        assert_eq!(OperationToken::decode(token.encode()), token);
    }

    #[test]
    fn cookie_encoding() {
        let cookie = NotifyCookie { device_id: 3, client_id: 0x12_3456 };
        assert_eq!(cookie.encode(), 0x0312_3456);
        assert_eq!(NotifyCookie::decode(cookie.encode()), cookie);
    }

    #[test]
    fn completion_wakes_waiter() {
        let pending = PendingOperations::default();
        let op = pending.register(OperationToken { client_id: 1, table_id: 7 });
        assert_eq!(pending.len(), 1);
        let remote = pending.clone();
        let t = std::thread::spawn(move || assert!(remote.complete(7)));
        assert_eq!(op.wait(Duration::from_secs(5)), WaitOutcome::Completed);
        t.join().unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn unmatched_completion_is_reported() {
        let pending = PendingOperations::default();
        assert!(!pending.complete(7));
    }

    #[test]
    fn wait_times_out() {
        let pending = PendingOperations::default();
        let op = pending.register(OperationToken { client_id: 1, table_id: 7 });
        assert_eq!(op.wait(Duration::from_millis(10)), WaitOutcome::TimedOut);
    }

    #[test]
    fn dropping_withdraws_registration() {
        let pending = PendingOperations::default();
        let first = pending.register(OperationToken { client_id: 1, table_id: 7 });
        let second = pending.register(OperationToken { client_id: 1, table_id: 7 });
        drop(first);
        assert_eq!(pending.len(), 1);
        assert!(pending.complete(7));
        assert_eq!(second.wait(Duration::from_millis(10)), WaitOutcome::Completed);
        drop(second);
        assert!(pending.is_empty());
    }
}
