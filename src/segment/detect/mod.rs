#[cfg(test)]
mod tests;

use fancy_regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose content is never worth embedding
const IGNORED_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "icns", "svg", "webp", "tif", "tiff", "psd",
    // audio
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "wma",
    // video
    "mp4", "avi", "mov", "mkv", "webm", "wmv", "flv", "mpeg", "mpg",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "rtf", "md", "markdown", "rst",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war", "whl",
    // compiled artifacts
    "exe", "dll", "so", "dylib", "bin", "o", "a", "lib", "obj", "class", "pyc", "pyo", "wasm",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // data and logs
    "log", "lock", "db", "sqlite", "sqlite3", "pkl", "npy", "npz", "parquet",
];

/// File names skipped regardless of extension
const IGNORED_NAMES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "LICENSE",
    "LICENCE",
    "COPYING",
    "NOTICE",
    "__init__.py",
];

/// Source extensions that test-naming conventions apply to
const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "mjs", "cjs", "ts", "tsx", "rb", "java", "cs", "go", "rs", "php",
    "swift", "kt", "kts", "scala", "c", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx", "m", "cu",
    "lua", "pl", "pm", "sh", "bash", "r", "hs", "ex", "exs", "dart",
];

// Alternatives, in order: `tests`, `test_x`, `x_test`/`x.tests`, `x.spec`/`x_spec`,
// `x_spec_y`, `TestX`, and CamelCase `XTest`/`XTests`/`XSpec`.
static TEST_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^tests?$|^test_|[._]tests?$|[._]specs?$|_spec_|^Test(?=[A-Z])|(?<=[A-Za-z0-9])(Tests?|Spec)$",
    )
    .expect("test file pattern is valid")
});

fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

/// Whether a file should be skipped entirely (media, archives, binaries, docs, boilerplate)
#[inline]
pub fn is_ignored_file(file_name: &str) -> bool {
    if IGNORED_NAMES.contains(&file_name) {
        return true;
    }

    match split_name(file_name) {
        (_, Some(ext)) => {
            let ext = ext.to_ascii_lowercase();
            IGNORED_EXTENSIONS.contains(&ext.as_str())
        }
        (_, None) => false,
    }
}

/// Whether a file follows a common test naming convention for its language
#[inline]
pub fn is_test_file(file_name: &str) -> bool {
    let (stem, Some(ext)) = split_name(file_name) else {
        return false;
    };

    let ext = ext.to_ascii_lowercase();
    if !SOURCE_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }

    TEST_STEM.is_match(stem).unwrap_or(false)
}

/// Map a file extension (with or without the leading dot) to a language name
#[inline]
pub fn programming_language(extension: &str) -> &'static str {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();

    match extension.as_str() {
        "py" | "pyw" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "cpp" | "cc" | "cxx" | "h" | "hpp" | "hxx" | "hh" => "cpp",
        "c" => "c",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "go" => "go",
        "rs" => "rust",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "html" | "htm" => "html",
        "css" => "css",
        "sh" | "bash" => "shell",
        "pl" | "pm" => "perl",
        "lua" => "lua",
        "hs" => "haskell",
        "r" => "r",
        "m" => "matlab",
        "cu" => "cuda",
        _ => "Unknown",
    }
}

/// Language of a repository-relative path, based on its extension
#[inline]
pub fn language_for_path(path: &str) -> &'static str {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or("Unknown", programming_language)
}
