// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Parent-process signalling for stub processes.
//!
//! The test control layer attaches a line reader to each stub's stdout and
//! treats specific sentinel lines (e.g. `backend: started`) as lifecycle
//! signals. stdout is therefore reserved for sentinels; all logging goes to
//! stderr.

use std::io::Write;

/// Sends one sentinel line to the controlling parent process.
pub fn send_to_parent(message: &str) {
    let mut stdout = std::io::stdout();
    // Failure here means the parent is gone; nothing sensible left to do.
    let _ = writeln!(stdout, "{message}");
    let _ = stdout.flush();
}
