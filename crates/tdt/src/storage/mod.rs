pub mod filesystem;
pub mod manifest;

pub use filesystem::{
    copy_file, copy_tree, ensure_directory, move_file, read_json, write_atomic, write_json_atomic,
};
pub use manifest::{Manifest, ManifestEntry, ManifestWriter};
