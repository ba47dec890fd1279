//! Android Backup (`.ab`/`.adb`) archives: parse and emit the envelope,
//! decrypt and decompress the body, walk the PAX tar inside, and split a
//! full-system backup into per-app archives (or merge them back).
//!
//! Everything is streaming: archives are never materialised in memory, and
//! a stream read from [`tar::TarReader`] re-emitted through
//! [`tar::TarWriter`] is byte-identical to the input.

pub mod compression;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod io_utils;
pub mod listing;
pub mod merge;
pub mod split;
pub mod tar;

pub use error::{Error, Result};
