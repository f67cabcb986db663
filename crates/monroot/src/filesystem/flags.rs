//! Mount flags and the OCI mount-option table.
//!
//! OCI mount entries carry their options as strings (`"ro"`, `"nosuid"`,
//! `"rbind"`, ...). Each known option maps to a kernel `MS_*` bit and a
//! polarity: it either sets the bit or clears it. A list of options reduces,
//! left to right, into a set mask and a clear mask; the last mention of a bit
//! wins.

use std::collections::HashMap;

use once_cell::sync::Lazy;
pub use rustix::mount::MountFlags;

use super::propagation::PropagationMode;

/// `MS_REMOUNT`. rustix only adds it inside `mount_remount`.
#[allow(clippy::cast_possible_truncation)]
pub const MS_REMOUNT: MountFlags = MountFlags::from_bits_retain(libc::MS_REMOUNT as _);

/// `MS_I_VERSION`, which rustix does not name.
#[allow(clippy::cast_possible_truncation)]
pub const MS_I_VERSION: MountFlags = MountFlags::from_bits_retain(libc::MS_I_VERSION as _);

/// Bits that only select the kind of bind operation.
const BIND_OPERATION: MountFlags = MountFlags::BIND
    .union(MountFlags::REC)
    .union(MS_REMOUNT);

/// Whether a follow-up `MS_BIND | MS_REMOUNT` is needed to apply `flags`.
///
/// The initial bind mount ignores everything except `MS_REC`, so any
/// attribute bit beyond bind/rec/remount must be applied by a remount.
#[must_use]
pub const fn needs_remount(flags: MountFlags) -> bool {
    !flags.difference(BIND_OPERATION).is_empty()
}

/// Whether an option sets or clears its flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// The option sets the bit.
    Set,
    /// The option clears the bit.
    Clear,
}

/// One row of the mount-option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagMapping {
    /// Kernel flag bit(s).
    pub flag: MountFlags,
    /// Set or clear.
    pub polarity: Polarity,
}

const MOUNT_OPTIONS: &[(&str, Polarity, MountFlags)] = &[
    ("async", Polarity::Clear, MountFlags::SYNCHRONOUS),
    ("atime", Polarity::Clear, MountFlags::NOATIME),
    ("bind", Polarity::Set, MountFlags::BIND),
    ("defaults", Polarity::Set, MountFlags::empty()),
    ("dev", Polarity::Clear, MountFlags::NODEV),
    ("diratime", Polarity::Clear, MountFlags::NODIRATIME),
    ("dirsync", Polarity::Set, MountFlags::DIRSYNC),
    ("exec", Polarity::Clear, MountFlags::NOEXEC),
    ("iversion", Polarity::Set, MS_I_VERSION),
    ("lazytime", Polarity::Set, MountFlags::LAZYTIME),
    ("loud", Polarity::Clear, MountFlags::SILENT),
    ("mand", Polarity::Set, MountFlags::PERMIT_MANDATORY_FILE_LOCKING),
    ("noatime", Polarity::Set, MountFlags::NOATIME),
    ("nodev", Polarity::Set, MountFlags::NODEV),
    ("nodiratime", Polarity::Set, MountFlags::NODIRATIME),
    ("noexec", Polarity::Set, MountFlags::NOEXEC),
    ("noiversion", Polarity::Clear, MS_I_VERSION),
    ("nolazytime", Polarity::Clear, MountFlags::LAZYTIME),
    ("nomand", Polarity::Clear, MountFlags::PERMIT_MANDATORY_FILE_LOCKING),
    ("norelatime", Polarity::Clear, MountFlags::RELATIME),
    ("nostrictatime", Polarity::Clear, MountFlags::STRICTATIME),
    ("nosuid", Polarity::Set, MountFlags::NOSUID),
    ("nosymfollow", Polarity::Set, MountFlags::NOSYMFOLLOW),
    ("rbind", Polarity::Set, MountFlags::BIND.union(MountFlags::REC)),
    ("relatime", Polarity::Set, MountFlags::RELATIME),
    ("remount", Polarity::Set, MS_REMOUNT),
    ("ro", Polarity::Set, MountFlags::RDONLY),
    ("rw", Polarity::Clear, MountFlags::RDONLY),
    ("silent", Polarity::Set, MountFlags::SILENT),
    ("strictatime", Polarity::Set, MountFlags::STRICTATIME),
    ("suid", Polarity::Clear, MountFlags::NOSUID),
    ("symfollow", Polarity::Clear, MountFlags::NOSYMFOLLOW),
    ("sync", Polarity::Set, MountFlags::SYNCHRONOUS),
];

static MOUNT_FLAG_TABLE: Lazy<HashMap<&'static str, FlagMapping>> = Lazy::new(|| {
    MOUNT_OPTIONS
        .iter()
        .map(|&(name, polarity, flag)| (name, FlagMapping { flag, polarity }))
        .collect()
});

/// Look up a symbolic mount option.
#[must_use]
pub fn map_mount_flag(option: &str) -> Option<FlagMapping> {
    MOUNT_FLAG_TABLE.get(option).copied()
}

/// Every option name the table knows, in sorted order.
pub fn known_options() -> impl Iterator<Item = &'static str> {
    MOUNT_OPTIONS.iter().map(|(name, _, _)| *name)
}

/// The result of reducing an OCI option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Bits to set.
    pub flags: MountFlags,
    /// Bits to clear.
    pub cleared: MountFlags,
    /// Propagation keywords, in order of appearance.
    pub propagation: Vec<PropagationMode>,
    /// Options that are neither flags nor propagation keywords.
    ///
    /// These are filesystem-specific data or mount-attribute options that are
    /// not handled and are dropped.
    pub ignored: Vec<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            flags: MountFlags::empty(),
            cleared: MountFlags::empty(),
            propagation: Vec::new(),
            ignored: Vec::new(),
        }
    }
}

impl MountOptions {
    /// Reduce `options` left to right into set/clear masks.
    pub fn parse<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reduced = Self::default();
        for option in options {
            reduced.push(option.as_ref());
        }
        reduced
    }

    fn push(&mut self, option: &str) {
        if let Some(mapping) = map_mount_flag(option) {
            match mapping.polarity {
                Polarity::Set => {
                    self.flags.insert(mapping.flag);
                    self.cleared.remove(mapping.flag);
                }
                Polarity::Clear => {
                    self.flags.remove(mapping.flag);
                    self.cleared.insert(mapping.flag);
                }
            }
            return;
        }

        if let Some(mode) = PropagationMode::lookup(option) {
            self.propagation.push(mode);
            return;
        }

        self.ignored.push(option.to_string());
    }

    /// Apply the masks to `base`: `(base & !cleared) | flags`.
    #[must_use]
    pub const fn apply(&self, base: MountFlags) -> MountFlags {
        base.difference(self.cleared).union(self.flags)
    }
}
