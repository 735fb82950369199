use std::path::Path;

use anyhow::Context;
use clrhost::{Image, LoaderConfig};

/// Map an image from disk.
pub fn load_image(path: &Path) -> anyhow::Result<Image> {
    Image::from_file(path).with_context(|| format!("failed to read image: {}", path.display()))
}

/// The loader configuration selected by the command-line flags.
pub fn loader_config(runtime: &str, validate: bool, legacy_bind: bool) -> LoaderConfig {
    LoaderConfig {
        validate_images: validate,
        bind_legacy_v2: legacy_bind,
        // a single run never invokes twice
        cache_programs: false,
        ..LoaderConfig::for_version(runtime)
    }
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}
