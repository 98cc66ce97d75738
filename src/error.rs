// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Error types that can result from multicast operations.

/// Error returned by the forward hook of a topic.
///
/// Hook errors are consumed by the engine: the affected message is dropped
/// for the peer under evaluation and the error is logged.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Error associated with the public multicast API.
#[derive(Debug)]
pub enum Error {
    /// An operation was attempted before the service was started or after it
    /// was stopped.
    NotStarted,
    /// A record was scheduled for a peer without an established writable
    /// connection.
    NoWritableConnection,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotStarted => write!(f, "the multicast service is not started"),
            Error::NoWritableConnection => {
                write!(f, "no writable connection to the peer is established")
            }
        }
    }
}

impl std::error::Error for Error {}
