use thiserror::Error;

/// Failures in the symbol-resolution *plumbing* — spawning the DWARF tool,
/// reading its output. A failed *lookup* is never one of these; it
/// produces `SymbolInfo::unresolved()` instead.
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("failed to spawn DWARF line-info tool {tool}: {source}")]
    Spawn { tool: String, #[source] source: std::io::Error },

    #[error("DWARF line-info tool exited with status {status}")]
    ToolFailed { status: i32 },
}
