//! Parser for the Linux `/proc/<pid>/maps` executable-memory inventory.
//! Grounded on samply's own `samply::linux::proc_maps` parser; the field
//! layout and hand-rolled line scanner are kept, generalized to collapse
//! into [`crate::library_map::LibraryMap`] instead of samply's `Region`
//! consumer.

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MapRegion {
    pub start: u64,
    pub end: u64,
    pub is_executable: bool,
    pub path: String,
}

fn get_until<'a>(p: &mut &'a str, delimiter: char) -> &'a str {
    match p.find(delimiter) {
        Some(index) => {
            let (before, after) = p.split_at(index);
            *p = &after[delimiter.len_utf8()..];
            before
        }
        None => {
            let before = *p;
            *p = "";
            before
        }
    }
}

fn skip_whitespace(p: &mut &str) {
    *p = p.trim_start_matches(' ');
}

/// Parses the textual contents of a `/proc/<pid>/maps` file into regions,
/// in file order (which is already address-ascending on Linux).
pub fn parse(maps: &str) -> Vec<MapRegion> {
    if maps.trim().is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for mut line in maps.trim().split('\n') {
        if line.is_empty() {
            continue;
        }
        let start = match u64::from_str_radix(get_until(&mut line, '-'), 16) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let end = match u64::from_str_radix(get_until(&mut line, ' '), 16) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let perms = get_until(&mut line, ' ');
        let is_executable = perms.as_bytes().get(2) == Some(&b'x');
        let _file_offset = get_until(&mut line, ' ');
        let _dev = get_until(&mut line, ' ');
        let _inode = get_until(&mut line, ' ');
        skip_whitespace(&mut line);
        let path = line.trim().to_owned();
        out.push(MapRegion { start, end, is_executable, path });
    }
    out
}
