//! Slow path (b): shell out to the system `addr2line`-equivalent binary
//! for a demangled function name, source file, and line number.

use std::process::Command;
use std::sync::Arc;

use crate::error::SymbolError;
use crate::symbol_info::SymbolInfo;

/// Name of the `addr2line`-equivalent binary to invoke. Overridable for
/// tests and for systems that ship it under a triple-prefixed name (e.g.
/// `llvm-addr2line` or `x86_64-linux-gnu-addr2line`).
pub fn tool_binary_name() -> String {
    std::env::var("PERFLOW_ADDR2LINE_BIN").unwrap_or_else(|_| "addr2line".to_string())
}

/// Text-segment base adjustments tried, in order, against a
/// position-independent executable before giving up. `0` covers the common
/// case (non-PIE binaries, and PIE binaries/shared objects whose first
/// `PT_LOAD` segment starts at vaddr 0, where file offset already equals
/// virtual offset). The non-zero entries cover the page-aligned skew seen
/// when the ELF/program headers occupy their own leading page ahead of the
/// text segment, so the computed runtime-relative offset is shifted by one
/// page from the static vaddr `addr2line` expects.
const BASE_ADJUSTMENTS: &[i64] = &[0, 0x1000, -0x1000];

/// Runs the DWARF line-info tool on `library_path` for `offset`, trying
/// each of [`BASE_ADJUSTMENTS`] in turn until one yields a resolved
/// function name. Returns `SymbolInfo::unresolved()` (not an error) if the
/// tool runs successfully but cannot resolve the address at any
/// adjustment; returns `Err` only if the tool itself could not be run.
pub fn resolve_via_dwarf_tool(library_path: &str, offset: u64) -> Result<SymbolInfo, SymbolError> {
    let tool = tool_binary_name();
    for adjustment in BASE_ADJUSTMENTS {
        let adjusted = offset.wrapping_add(*adjustment as u64);
        let output = Command::new(&tool)
            .args(["-f", "-C", "-e", library_path, &format!("0x{adjusted:x}")])
            .output()
            .map_err(|source| SymbolError::Spawn { tool: tool.clone(), source })?;

        if !output.status.success() {
            continue;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        if let Some(info) = parse_addr2line_output(&text) {
            return Ok(info);
        }
    }
    Ok(SymbolInfo::unresolved())
}

/// Runs the DWARF line-info tool once for every offset in `offsets`,
/// rather than once per offset: `addr2line` accepts multiple `-e`-relative
/// addresses on one command line and emits one two-line record per address
/// in the order given. This is the batching the analysis side uses when
/// resolving every unresolved offset of one library at once, instead of
/// spawning a subprocess per offset.
pub fn resolve_batch_via_dwarf_tool(
    library_path: &str,
    offsets: &[u64],
) -> Result<Vec<SymbolInfo>, SymbolError> {
    if offsets.is_empty() {
        return Ok(Vec::new());
    }
    let tool = tool_binary_name();
    let addr_args: Vec<String> = offsets.iter().map(|o| format!("0x{o:x}")).collect();

    let output = Command::new(&tool)
        .args(["-f", "-C", "-e", library_path])
        .args(&addr_args)
        .output()
        .map_err(|source| SymbolError::Spawn { tool: tool.clone(), source })?;

    if !output.status.success() {
        return Ok(vec![SymbolInfo::unresolved(); offsets.len()]);
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut lines = text.lines();
    let mut results = Vec::with_capacity(offsets.len());
    for _ in offsets {
        let function_name = lines.next().unwrap_or("??").trim();
        let location = lines.next().unwrap_or("??:0").trim();
        results.push(parse_addr2line_record(function_name, location));
    }
    Ok(results)
}

fn parse_addr2line_record(function_name: &str, location: &str) -> SymbolInfo {
    if function_name.is_empty() || function_name == "??" {
        return SymbolInfo::unresolved();
    }
    let (source_file, line_number) = match location.rsplit_once(':') {
        Some((file, line)) if file != "??" => (file.to_string(), line.parse().unwrap_or(0)),
        _ => (String::new(), 0),
    };
    SymbolInfo { function_name: Arc::from(function_name), source_file: Arc::from(source_file.as_str()), line_number }
}

/// Parses `addr2line -f -C` output: one line of function name, one line of
/// `file:line` (or `??:0` when unknown).
fn parse_addr2line_output(text: &str) -> Option<SymbolInfo> {
    let mut lines = text.lines();
    let function_name = lines.next()?.trim();
    let location = lines.next()?.trim();
    let info = parse_addr2line_record(function_name, location);
    info.is_resolved().then_some(info)
}
