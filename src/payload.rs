//! Payload injection
//!
//! Templates read their input from three globals set before any template
//! script runs: `fileBase64`, `pageNumber` and `fileName`. The init script
//! built here is registered with the page ahead of navigation.

use base64::Engine as Base64Engine;

/// Data handed to a template ahead of load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPayload {
    /// Input bytes, standard base64
    pub file_base64: String,
    /// 1-based page index
    pub page_number: u32,
    /// Original file name, used by templates to pick a highlighting language
    pub file_name: Option<String>,
}

impl InitPayload {
    pub fn new(bytes: &[u8], page_number: u32, file_name: Option<&str>) -> Self {
        Self {
            file_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            page_number,
            file_name: file_name.map(|s| s.to_string()),
        }
    }

    /// Script that publishes the payload as page globals.
    ///
    /// String values are emitted as JSON literals so file names cannot break
    /// out of the assignment.
    pub fn init_script(&self) -> String {
        let file_base64 = json_literal(&self.file_base64);
        let file_name = self
            .file_name
            .as_deref()
            .map(json_literal)
            .unwrap_or_else(|| "null".to_string());

        format!(
            "globalThis.fileBase64 = {};\nglobalThis.pageNumber = {};\nglobalThis.fileName = {};\n",
            file_base64, self.page_number, file_name
        )
    }
}

fn json_literal(s: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
