//! Storage engine: records, chunk layout, compression and the directory image

pub mod bitmap;
pub mod chunk;
pub mod compression;
pub mod directory;
pub mod error;
pub mod header;
pub mod io;
pub mod options;
pub mod vhd;

pub use directory::VhdDirectory;
