//! Format resolution
//!
//! Maps file extensions, magic bytes, slugs and MIME types onto the closed
//! [`FormatId`] set. Every function here is pure apart from [`detect_format`],
//! which reads at most [`SNIFF_LEN`] bytes from the file.
//!
//! Known limitation: any `PK`-prefixed (ZIP container) input without a
//! recognised extension resolves to [`FormatId::Epub`], even when it is
//! really a docx/xlsx/pptx. The container is not opened to disambiguate.

use crate::{Error, Result};
use log::debug;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Number of leading bytes inspected when the extension is not recognised.
pub const SNIFF_LEN: usize = 4;

/// Supported input kinds. `Unknown` is a sentinel and never renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    Pdf,
    Epub,
    Docx,
    Xlsx,
    Pptx,
    Markdown,
    Html,
    Csv,
    Rtf,
    Ipynb,
    Tex,
    /// Any source code, config or plain text file
    Code,
    Url,
    Mermaid,
    GeoJson,
    Gpx,
    Unknown,
}

impl FormatId {
    /// Every renderable format, in declaration order.
    pub const SUPPORTED: [FormatId; 16] = [
        FormatId::Pdf,
        FormatId::Epub,
        FormatId::Docx,
        FormatId::Xlsx,
        FormatId::Pptx,
        FormatId::Markdown,
        FormatId::Html,
        FormatId::Csv,
        FormatId::Rtf,
        FormatId::Ipynb,
        FormatId::Tex,
        FormatId::Code,
        FormatId::Url,
        FormatId::Mermaid,
        FormatId::GeoJson,
        FormatId::Gpx,
    ];

    /// Canonical short name. Doubles as the template file stem.
    pub fn slug(self) -> &'static str {
        match self {
            FormatId::Pdf => "pdf",
            FormatId::Epub => "epub",
            FormatId::Docx => "docx",
            FormatId::Xlsx => "xlsx",
            FormatId::Pptx => "pptx",
            FormatId::Markdown => "md",
            FormatId::Html => "html",
            FormatId::Csv => "csv",
            FormatId::Rtf => "rtf",
            FormatId::Ipynb => "ipynb",
            FormatId::Tex => "tex",
            FormatId::Code => "code",
            FormatId::Url => "url",
            FormatId::Mermaid => "mmd",
            FormatId::GeoJson => "geojson",
            FormatId::Gpx => "gpx",
            FormatId::Unknown => "unknown",
        }
    }

    /// Primary MIME type, if the format has one.
    pub fn mime(self) -> Option<&'static str> {
        MIME_TABLE
            .iter()
            .find(|(_, id)| *id == self)
            .map(|(mime, _)| *mime)
    }

    pub fn is_unknown(self) -> bool {
        self == FormatId::Unknown
    }

    /// Look up a lowercase or mixed-case extension, with or without the dot.
    pub fn from_extension(ext: &str) -> Option<FormatId> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        if let Some(id) = EXTENSION_TABLE
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, id)| *id)
        {
            return Some(id);
        }
        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            return Some(FormatId::Code);
        }
        None
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for FormatId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        resolve_format_str(s)
    }
}

const EXTENSION_TABLE: &[(&str, FormatId)] = &[
    ("pdf", FormatId::Pdf),
    ("epub", FormatId::Epub),
    ("docx", FormatId::Docx),
    ("xlsx", FormatId::Xlsx),
    ("pptx", FormatId::Pptx),
    ("md", FormatId::Markdown),
    ("markdown", FormatId::Markdown),
    ("html", FormatId::Html),
    ("htm", FormatId::Html),
    ("csv", FormatId::Csv),
    ("rtf", FormatId::Rtf),
    ("ipynb", FormatId::Ipynb),
    ("tex", FormatId::Tex),
    ("latex", FormatId::Tex),
    ("mmd", FormatId::Mermaid),
    ("mermaid", FormatId::Mermaid),
    ("geojson", FormatId::GeoJson),
    ("gpx", FormatId::Gpx),
];

// Highlighting language is picked inside the template from the file name.
const CODE_EXTENSIONS: &[&str] = &[
    "txt", "log", "rs", "py", "pyi", "js", "mjs", "cjs", "jsx", "ts", "tsx", "go", "java", "kt",
    "kts", "scala", "groovy", "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "cs", "fs", "vb", "swift",
    "m", "mm", "rb", "php", "pl", "pm", "lua", "r", "jl", "dart", "hs", "ml", "mli", "ex", "exs",
    "erl", "hrl", "clj", "cljs", "elm", "zig", "nim", "v", "sol", "sh", "bash", "zsh", "fish",
    "ps1", "bat", "cmd", "sql", "graphql", "gql", "proto", "json", "jsonc", "json5", "yaml", "yml",
    "toml", "ini", "cfg", "conf", "env", "xml", "xsl", "css", "scss", "sass", "less", "vue",
    "svelte", "astro", "diff", "patch", "dockerfile", "makefile", "cmake", "gradle", "tf", "hcl",
    "nix",
];

const SLUG_ALIASES: &[(&str, FormatId)] = &[
    ("markdown", FormatId::Markdown),
    ("htm", FormatId::Html),
    ("latex", FormatId::Tex),
    ("mermaid", FormatId::Mermaid),
    ("text", FormatId::Code),
    ("txt", FormatId::Code),
    ("web", FormatId::Url),
];

const MIME_TABLE: &[(&str, FormatId)] = &[
    ("application/pdf", FormatId::Pdf),
    ("application/epub+zip", FormatId::Epub),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        FormatId::Docx,
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        FormatId::Xlsx,
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        FormatId::Pptx,
    ),
    ("text/markdown", FormatId::Markdown),
    ("text/html", FormatId::Html),
    ("text/csv", FormatId::Csv),
    ("application/rtf", FormatId::Rtf),
    ("text/rtf", FormatId::Rtf),
    ("application/x-ipynb+json", FormatId::Ipynb),
    ("application/x-tex", FormatId::Tex),
    ("text/x-tex", FormatId::Tex),
    ("text/plain", FormatId::Code),
    ("text/uri-list", FormatId::Url),
    ("text/vnd.mermaid", FormatId::Mermaid),
    ("application/geo+json", FormatId::GeoJson),
    ("application/gpx+xml", FormatId::Gpx),
];

/// Classify a byte prefix. Only the first [`SNIFF_LEN`] bytes are considered.
pub fn sniff(prefix: &[u8]) -> Option<FormatId> {
    let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];
    if prefix.starts_with(b"%PDF") {
        return Some(FormatId::Pdf);
    }
    if prefix.starts_with(b"PK") {
        return Some(FormatId::Epub);
    }
    None
}

/// Resolve a file on disk: extension first, then magic bytes.
///
/// An unreadable file with an unknown extension resolves to `Unknown`.
pub fn detect_format(path: &Path) -> FormatId {
    if let Some(id) = extension_of(path).and_then(FormatId::from_extension) {
        debug!("resolved {} by extension -> {}", path.display(), id);
        return id;
    }

    let mut magic = Vec::with_capacity(SNIFF_LEN);
    let read = std::fs::File::open(path)
        .and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut magic));
    if let Err(e) = read {
        debug!("could not sniff {}: {}", path.display(), e);
        return FormatId::Unknown;
    }

    let id = sniff(&magic).unwrap_or(FormatId::Unknown);
    debug!("resolved {} by magic bytes -> {}", path.display(), id);
    id
}

/// Resolve an in-memory payload using an optional file name hint.
pub fn detect_bytes(file_name: Option<&str>, bytes: &[u8]) -> FormatId {
    file_name
        .and_then(|name| extension_of(Path::new(name)))
        .and_then(FormatId::from_extension)
        .or_else(|| sniff(bytes))
        .unwrap_or(FormatId::Unknown)
}

/// Resolve a caller-declared format: slug (case-insensitive), then exact MIME.
///
/// Never sniffs bytes. Fails with [`Error::UnknownFormatString`].
pub fn resolve_format_str(declared: &str) -> Result<FormatId> {
    let trimmed = declared.trim();
    let lower = trimmed.to_ascii_lowercase();

    if let Some(id) = FormatId::SUPPORTED
        .iter()
        .copied()
        .find(|id| id.slug() == lower)
        .or_else(|| {
            SLUG_ALIASES
                .iter()
                .find(|(alias, _)| *alias == lower)
                .map(|(_, id)| *id)
        })
    {
        return Ok(id);
    }

    MIME_TABLE
        .iter()
        .find(|(mime, _)| *mime == trimmed)
        .map(|(_, id)| *id)
        .ok_or_else(|| Error::UnknownFormatString(declared.to_string()))
}

/// Whether the input should be navigated to directly rather than read from disk.
pub fn is_url(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    url::Url::parse(input).is_ok()
}

/// Resolve a CLI-style input: http(s) URLs map to `Url`, everything else is a path.
pub fn resolve_input(input: &str) -> FormatId {
    if is_url(input) {
        return FormatId::Url;
    }
    detect_format(Path::new(input))
}

fn extension_of(path: &Path) -> Option<&str> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        return Some(ext);
    }
    // Extension-less build files are still code.
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| matches!(n.to_ascii_lowercase().as_str(), "dockerfile" | "makefile"))
}
