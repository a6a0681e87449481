// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Terminal log sink for the session.

use colored::Colorize;
use updi::Log;

pub struct Stderr {
    verbose: bool,
}

impl Stderr {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Log for Stderr {
    fn verbose_enabled(&self) -> bool {
        self.verbose
    }

    fn verbose(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg.dimmed());
        }
    }

    fn important(&self, msg: &str) {
        eprintln!("{msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }
}
