//! Go build information (`runtime/debug.BuildInfo`) as embedded by the linker.
//!
//! The header is 32 bytes: a 14-byte magic, the pointer size, a flags byte,
//! then either two pointers to Go string headers (Go 1.13-1.17) or, when the
//! inline flag is set (Go 1.18+), two varint-prefixed strings right after the
//! header. The second string is the module info text.

use memchr::memmem;

use super::container::{Container, Endian};
use crate::model::BuildSetting;

pub(crate) const BUILDINFO_MAGIC: &[u8] = b"\xff Go buildinf:";
const HEADER_SIZE: usize = 32;
const FLAGS_ENDIAN_BIG: u8 = 0x1;
const FLAGS_VERSION_INLINE: u8 = 0x2;
/// Upper bound for strings read through pointers.
const MAX_STRING_LEN: u64 = 1 << 20;

/// A module line (`mod`, `dep`) from the module info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Module {
    pub path: String,
    pub version: String,
    pub sum: Option<String>,
    pub replace: Option<Box<Module>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ModuleInfo {
    /// Import path of the main package.
    pub path: Option<String>,
    pub main: Option<Module>,
    pub deps: Vec<Module>,
    pub settings: Vec<BuildSetting>,
}

impl ModuleInfo {
    /// Path of the main module, falling back to the main package path.
    pub(crate) fn main_module_path(&self) -> Option<&str> {
        self.main
            .as_ref()
            .map(|m| m.path.as_str())
            .or(self.path.as_deref())
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildInfo {
    pub version: String,
    pub module: Option<ModuleInfo>,
}

/// Decode a Go unsigned varint, returning the value and bytes consumed.
pub(crate) fn uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate().take(10) {
        if byte < 0x80 {
            if i == 9 && byte > 1 {
                return None;
            }
            return Some((value | u64::from(byte) << shift, i + 1));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    None
}

/// File offset of the build info header.
fn find_header(data: &[u8], container: &Container) -> Option<usize> {
    if let Some(section) = container.section(&[".go.buildinfo", "__go_buildinfo"]) {
        if data.get(section.offset..)?.starts_with(BUILDINFO_MAGIC) {
            return Some(section.offset);
        }
    }
    memmem::find(data, BUILDINFO_MAGIC)
}

fn inline_string(data: &[u8]) -> Option<(&[u8], usize)> {
    let (len, consumed) = uvarint(data)?;
    let end = consumed.checked_add(usize::try_from(len).ok()?)?;
    Some((data.get(consumed..end)?, end))
}

fn pointed_string<'d>(
    data: &'d [u8],
    container: &Container,
    endian: Endian,
    ptr_size: usize,
    header_addr: u64,
) -> Option<&'d [u8]> {
    let header = container.read_vaddr(data, header_addr, ptr_size * 2)?;
    let addr = endian.ptr(header, 0, ptr_size)?;
    let len = endian.ptr(header, ptr_size, ptr_size)?;
    if len == 0 {
        return Some(&[]);
    }
    if len > MAX_STRING_LEN {
        return None;
    }
    container.read_vaddr(data, addr, len as usize)
}

/// Strip the 16-byte sentinels the linker wraps module info in.
fn strip_sentinels(raw: &[u8]) -> &[u8] {
    if raw.len() >= 33 && raw[raw.len() - 17] == b'\n' {
        &raw[16..raw.len() - 16]
    } else {
        raw
    }
}

/// Read the build info embedded in `data`, if any.
pub(crate) fn read_build_info(data: &[u8], container: &Container) -> Option<BuildInfo> {
    let start = find_header(data, container)?;
    let header = data.get(start..start + HEADER_SIZE)?;
    let ptr_size = usize::from(header[14]);
    let flags = header[15];

    let (version, modinfo) = if flags & FLAGS_VERSION_INLINE != 0 {
        let body = data.get(start + HEADER_SIZE..)?;
        let (version, used) = inline_string(body)?;
        let (modinfo, _) = inline_string(&body[used..]).unwrap_or((&[], 0));
        (version, modinfo)
    } else {
        if ptr_size != 4 && ptr_size != 8 {
            return None;
        }
        let endian = if flags & FLAGS_ENDIAN_BIG != 0 { Endian::Big } else { Endian::Little };
        let version_addr = endian.ptr(header, 16, ptr_size)?;
        let modinfo_addr = endian.ptr(header, 16 + ptr_size, ptr_size)?;
        let version = pointed_string(data, container, endian, ptr_size, version_addr)?;
        let modinfo =
            pointed_string(data, container, endian, ptr_size, modinfo_addr).unwrap_or(&[]);
        (version, modinfo)
    };

    let version = String::from_utf8_lossy(version).into_owned();
    if !version.starts_with("go") && !version.starts_with("devel") {
        return None;
    }
    let modinfo = strip_sentinels(modinfo);
    let module = if modinfo.is_empty() {
        None
    } else {
        Some(parse_module_info(&String::from_utf8_lossy(modinfo)))
    };
    Some(BuildInfo { version, module })
}

fn parse_module_line(fields: &str) -> Option<Module> {
    let mut parts = fields.split('\t');
    let path = parts.next().filter(|p| !p.is_empty())?.to_string();
    let version = parts.next().unwrap_or("").to_string();
    let sum = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    Some(Module { path, version, sum, replace: None })
}

/// Split a possibly quoted token off the front of `s`.
///
/// Quoted tokens use Go's `strconv.Quote` escaping; the common escapes match
/// JSON, so a JSON string parse unquotes them.
fn take_token<'s>(s: &'s str, stop: char) -> (String, &'s str) {
    if let Some(body) = s.strip_prefix('"') {
        let mut escaped = false;
        for (i, c) in body.char_indices() {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => {
                    let quoted = &s[..i + 2];
                    if let Ok(text) = serde_json::from_str::<String>(quoted) {
                        return (text, &s[i + 2..]);
                    }
                    break;
                }
                _ => escaped = false,
            }
        }
    }
    match s.find(stop) {
        Some(i) => (s[..i].to_string(), &s[i..]),
        None => (s.to_string(), ""),
    }
}

fn parse_setting(rest: &str) -> Option<BuildSetting> {
    let (key, tail) = take_token(rest, '=');
    let tail = tail.strip_prefix('=')?;
    if key.is_empty() {
        return None;
    }
    let (value, _) = take_token(tail, '\n');
    Some(BuildSetting::new(key, value))
}

/// Parse the textual module info written by `cmd/go`.
pub(crate) fn parse_module_info(text: &str) -> ModuleInfo {
    let mut info = ModuleInfo::default();
    for line in text.lines() {
        let Some((kind, rest)) = line.split_once('\t') else { continue };
        match kind {
            "path" => info.path = Some(rest.to_string()),
            "mod" => info.main = parse_module_line(rest),
            "dep" => info.deps.extend(parse_module_line(rest)),
            "=>" => {
                let replacement = parse_module_line(rest).map(Box::new);
                let target =
                    if info.deps.is_empty() { info.main.as_mut() } else { info.deps.last_mut() };
                if let Some(module) = target {
                    module.replace = replacement;
                }
            }
            "build" => info.settings.extend(parse_setting(rest)),
            _ => {}
        }
    }
    info
}
