// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Progress/diagnostic sink injected into the session.
//!
//! Three levels: `verbose` for link chatter, `important` for milestones
//! and progress, `error` for failures. A sink decides for itself whether
//! verbose output is wanted; `verbose_enabled` lets callers skip building
//! messages that would be dropped anyway. No global state.

pub trait Log {
    fn verbose_enabled(&self) -> bool;
    fn verbose(&self, msg: &str);
    fn important(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Discards everything. Handy default for embedding and for tests.
pub struct Quiet;

impl Log for Quiet {
    fn verbose_enabled(&self) -> bool {
        false
    }
    fn verbose(&self, _msg: &str) {}
    fn important(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}
