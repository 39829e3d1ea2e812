/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Helpers shared by this crate's own tests and its `tests/` integration
//! suite. Not part of the public API; exported only so integration tests can
//! reuse the same temp-file conventions as the unit tests.

use std::path::{Path, PathBuf};

use crate::WriteAheadLog;

/// A database file path under the system temp directory that removes itself
/// (and any sibling WAL file) when dropped, so a panicking test doesn't leak
/// files into the temp directory.
pub struct TempDbPath {
    path: PathBuf,
}

impl TempDbPath {
    /// Builds a path unique to this process and `component`/`case` pair,
    /// removing any stale file left behind by a prior crashed run.
    pub fn new(component: &str, case: &str) -> TempDbPath {
        let mut path = std::env::temp_dir();
        path.push(format!("pagevault-{}-test-{}-{}.db", component, std::process::id(), case));
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(WriteAheadLog::wal_path_for(&path));
        TempDbPath { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn wal_path(&self) -> PathBuf {
        WriteAheadLog::wal_path_for(&self.path)
    }
}

impl Drop for TempDbPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = std::fs::remove_file(self.wal_path());
    }
}
