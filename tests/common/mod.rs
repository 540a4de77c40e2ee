#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of the persisted store file inside this workspace.
    pub fn store_path(&self) -> PathBuf {
        self.temp_dir.path().join("store.json")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub const PEOPLE_CSV: &str = "name,age\nAlice,30\nBob,35\nana,40\n";

pub const TWO_TABLE_DUMP: &str = "\
CREATE TABLE people (
    id integer,
    name varchar(50)
);
INSERT INTO people (id, name) VALUES (1, 'ada'), (2, 'grace');
CREATE TABLE ages (
    person integer,
    age integer
);
INSERT INTO ages (person, age) VALUES (1, 36), (3, 41);
";
