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


use crate::status::{Code, Status};

pub const WRITE_ERROR_MESSAGE: &str = "Write Error Status";
pub const READ_ERROR_MESSAGE: &str = "Read Error Status";

/// Collects the outcomes of the items of a multi-item request, in request
/// order, and turns them into one status.
#[derive(Debug)]
pub struct ErrorReporter {
    message: &'static str,
    errors: Vec<(usize, Status)>,
    index: usize,
}

impl ErrorReporter {
    pub fn new(message: &'static str) -> ErrorReporter {
        ErrorReporter { message, errors: Vec::new(), index: 0 }
    }

    /// Records the outcome of the next item.
    pub fn push(&mut self, result: Result<(), Status>) {
        if let Err(status) = result {
            self.errors.push((self.index, status));
        }
        self.index += 1;
    }

    #[cfg(test)]
    fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// `Ok` if every item succeeded.  Otherwise an `UNKNOWN` status with one
    /// detail per item up to the last failed one: the item's error, or OK for
    /// items that succeeded.
    pub fn status(self) -> Result<(), Status> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let mut details = Vec::with_capacity(self.index);
        for (index, error) in self.errors {
            details.resize_with(index, Status::ok);
            details.push(error);
        }
        Err(Status::with_details(Code::Unknown, self.message, details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ok() {
        let mut reporter = ErrorReporter::new(WRITE_ERROR_MESSAGE);
        reporter.push(Ok(()));
        reporter.push(Ok(()));
        assert!(!reporter.has_errors());
        assert_eq!(reporter.status(), Ok(()));
    }

    #[test]
    fn empty_is_ok() {
        assert_eq!(ErrorReporter::new(READ_ERROR_MESSAGE).status(), Ok(()));
    }

    #[test]
    fn pads_with_ok_up_to_last_error() {
        let mut reporter = ErrorReporter::new(WRITE_ERROR_MESSAGE);
        reporter.push(Ok(()));
        reporter.push(Err(Status::already_exists("dup")));
        reporter.push(Ok(()));
        reporter.push(Err(Status::not_found("gone")));
        reporter.push(Ok(()));

        let status = reporter.status().unwrap_err();
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), WRITE_ERROR_MESSAGE);
        let codes: Vec<Code> = status.details().iter().map(Status::code).collect();
        assert_eq!(codes, vec![Code::Ok, Code::AlreadyExists, Code::Ok, Code::NotFound]);
        assert_eq!(status.details()[3].message(), "gone");
    }

    #[test]
    fn first_item_error() {
        let mut reporter = ErrorReporter::new(READ_ERROR_MESSAGE);
        reporter.push(Err(Status::invalid_argument("bad key")));
        reporter.push(Ok(()));
        let status = reporter.status().unwrap_err();
        assert_eq!(status.details().len(), 1);
        assert_eq!(status.details()[0].code(), Code::InvalidArgument);
    }
}
