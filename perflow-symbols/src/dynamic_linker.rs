//! Fast path (a): resolve an absolute address against the dynamic linker's
//! own in-process symbol tables via `dladdr`. Only ever sees exported
//! (dynamic-symbol-table) names and carries no source-location
//! information.

use std::ffi::CStr;
use std::mem::MaybeUninit;

use crate::symbol_info::SymbolInfo;

/// Looks up the nearest preceding dynamic symbol for `absolute_addr`.
/// Returns `None` if `dladdr` cannot place the address in any loaded
/// object or has no symbol name for it.
pub fn resolve_via_dladdr(absolute_addr: u64) -> Option<SymbolInfo> {
    let mut info = MaybeUninit::<libc::Dl_info>::uninit();
    let rc = unsafe { libc::dladdr(absolute_addr as *const libc::c_void, info.as_mut_ptr()) };
    if rc == 0 {
        return None;
    }
    let info = unsafe { info.assume_init() };
    if info.dli_sname.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy().into_owned();
    if name.is_empty() {
        return None;
    }
    // Left mangled: the DWARF slow path (`addr2line -C`) demangles and is
    // preferred whenever a caller also wants source location.
    Some(SymbolInfo::function_only(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_known_address_in_this_process() {
        // `resolve_via_dladdr` itself is mapped in this very binary; its
        // own address must resolve to a non-empty function name.
        let addr = resolve_via_dladdr as usize as u64;
        let resolved = resolve_via_dladdr(addr);
        assert!(resolved.is_some());
        assert!(resolved.unwrap().is_resolved());
    }

    #[test]
    fn null_address_is_unresolved() {
        assert!(resolve_via_dladdr(0).is_none());
    }
}
