//! The text header file `<dir>/wal`: a version stamp followed by the
//! persisted type table. Rewritten atomically (`wal.bak` -> `wal`) at
//! every checkpoint so a crash mid-rewrite never corrupts the live
//! header.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::WalError;
use crate::types::TypeRegistry;

/// Current on-disk header version. Bumped whenever the record grammar or
/// catalog layout changes in a way that requires [`crate::legacy`] to
/// run on older directories.
pub const CURRENT_VERSION: u32 = 52301;

/// Version boundary below which a directory is upgraded by
/// [`crate::legacy::LegacyUpgrader`] rather than replayed directly.
pub const LEGACY_VERSION_BOUNDARY: u32 = 52300;

/// Parsed contents of the `wal` header file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Version stamp this directory was last written at.
    pub version: u32,
    /// `(external_id, internal_name)` pairs, for operator visibility only
    /// — the type registry used to decode the log is always the one
    /// built from the running code.
    pub types: Vec<(i8, String)>,
}

impl Header {
    /// Build a fresh header at the current version, recording the
    /// running registry's type table.
    pub fn current(registry: &TypeRegistry) -> Self {
        Header {
            version: CURRENT_VERSION,
            types: registry
                .entries()
                .map(|(id, name)| (id, name.to_string()))
                .collect(),
        }
    }

    /// Whether this header predates the current catalog layout and must
    /// be routed through [`crate::legacy::LegacyUpgrader`] first.
    pub fn needs_legacy_upgrade(&self) -> bool {
        self.version < LEGACY_VERSION_BOUNDARY
    }

    /// Read and parse `<dir>/wal`.
    pub fn read(dir: &Path) -> Result<Self, WalError> {
        let path = dir.join("wal");
        let text = fs::read_to_string(&path)?;
        Self::parse(&text)
    }

    /// Parse the header's text format: one version line, a blank line,
    /// then zero or more `<external_id>,<internal_name>` lines.
    pub fn parse(text: &str) -> Result<Self, WalError> {
        let mut lines = text.lines();
        let version_line = lines.next().ok_or_else(|| WalError::CorruptHeader {
            reason: "empty header file".to_string(),
        })?;
        let version: u32 = version_line.trim().parse().map_err(|_| WalError::CorruptHeader {
            reason: format!("unparsable version stamp {version_line:?}"),
        })?;

        // The blank separator line, if present. Some legacy directories
        // omit it when the type table is empty; tolerate that.
        let mut rest: Vec<&str> = lines.collect();
        if rest.first() == Some(&"") {
            rest.remove(0);
        }

        let mut types = Vec::with_capacity(rest.len());
        for line in rest {
            if line.is_empty() {
                continue;
            }
            let (id_str, name) = line.split_once(',').ok_or_else(|| WalError::CorruptHeader {
                reason: format!("unparsable type table line {line:?}"),
            })?;
            let id: i8 = id_str.trim().parse().map_err(|_| WalError::CorruptHeader {
                reason: format!("unparsable type id in {line:?}"),
            })?;
            types.push((id, name.trim().to_string()));
        }

        Ok(Header { version, types })
    }

    /// Serialize back to the on-disk text format.
    pub fn to_text(&self) -> String {
        let mut out = format!("{:06}\n\n", self.version);
        for (id, name) in &self.types {
            out.push_str(&format!("{id},{name}\n"));
        }
        out
    }

    /// Atomically rewrite `<dir>/wal`: write to `wal.bak`, fsync, then
    /// rename over the live file. A crash before the rename leaves the
    /// previous header intact; a crash after leaves the new one intact —
    /// there is no window where `wal` is partially written.
    pub fn write_atomic(&self, dir: &Path) -> Result<(), WalError> {
        fs::create_dir_all(dir)?;
        let bak_path = dir.join("wal.bak");
        let live_path = dir.join("wal");
        {
            let mut f = fs::File::create(&bak_path)?;
            f.write_all(self.to_text().as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&bak_path, &live_path)?;
        Ok(())
    }
}
