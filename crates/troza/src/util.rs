use std::{borrow::Cow, path::Path};

use cow_utils::CowUtils;

/// A path as a string with `/` separators on every platform
pub fn normalize_path(path: &Path) -> Cow<'_, str> {
    match path.to_string_lossy() {
        Cow::Borrowed(text) => text.cow_replace('\\', "/"),
        Cow::Owned(text) => Cow::Owned(text.cow_replace('\\', "/").into_owned()),
    }
}

/// `path` relative to `base` with `/` separators, or the full normalized path if it lies
/// outside `base`
pub fn relative_path(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    normalize_path(relative).into_owned()
}
