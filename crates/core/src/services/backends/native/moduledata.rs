//! Runtime type descriptors reached through the linker's `moduledata` record.
//!
//! The record starts with a pointer back to the line table, which is how it is
//! found. Its `types` base and `typelinks` slice lead to every `runtime._type`
//! the linker kept; names and package paths are offsets from the `types` base.

use memchr::memmem;
use tracing::trace;

use super::container::Container;
use super::pclntab::{LineTable, PclnVersion};
use crate::model::{TypeDescriptor, TypeMethod};

/// Typelink counts above this are treated as a false match.
const MAX_TYPELINKS: u64 = 1 << 20;

const TFLAG_UNCOMMON: u8 = 1 << 0;
const TFLAG_EXTRA_STAR: u8 = 1 << 1;
const KIND_MASK: u8 = (1 << 5) - 1;

const KIND_ARRAY: u8 = 17;
const KIND_CHAN: u8 = 18;
const KIND_FUNC: u8 = 19;
const KIND_INTERFACE: u8 = 20;
const KIND_MAP: u8 = 21;
const KIND_PTR: u8 = 22;
const KIND_SLICE: u8 = 23;
const KIND_STRUCT: u8 = 25;

const KIND_NAMES: [&str; 27] = [
    "invalid",
    "bool",
    "int",
    "int8",
    "int16",
    "int32",
    "int64",
    "uint",
    "uint8",
    "uint16",
    "uint32",
    "uint64",
    "uintptr",
    "float32",
    "float64",
    "complex64",
    "complex128",
    "array",
    "chan",
    "func",
    "interface",
    "map",
    "ptr",
    "slice",
    "string",
    "struct",
    "unsafe.Pointer",
];

/// Size of one `runtime.method` entry.
const METHOD_SIZE: u64 = 16;

/// The parts of `runtime.moduledata` type walking needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ModuleData {
    pub types: u64,
    pub etypes: u64,
    pub typelinks: u64,
    pub ntypelinks: u64,
}

/// Word indices of `types` and `typelinks` within the record.
struct Layout {
    types: usize,
    typelinks: usize,
}

fn layout(version: PclnVersion) -> Layout {
    match version {
        // Go 1.8 through 1.15.
        PclnVersion::V12 => Layout { types: 25, typelinks: 30 },
        PclnVersion::V116 => Layout { types: 35, typelinks: 40 },
        // `rodata` and `gofunc` follow `etypes`.
        PclnVersion::V118 => Layout { types: 35, typelinks: 42 },
        // `covctrs` and `ecovctrs` precede `end`.
        PclnVersion::V120 => Layout { types: 37, typelinks: 44 },
    }
}

/// Minor release number of a `go1.N...` version string.
pub(crate) fn go_minor(version: &str) -> Option<u32> {
    let rest = version.strip_prefix("go1.")?;
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Find the module data that points back at `table`, mapped at `table_addr`.
pub(crate) fn locate(
    data: &[u8],
    container: &Container,
    table: &LineTable<'_>,
    table_addr: u64,
) -> Option<ModuleData> {
    let ptr = container.ptr_size;
    let endian = container.endian;
    let needle = endian.ptr_bytes(table_addr, ptr)?;
    // The second check pins the record: the function table slice before Go
    // 1.16, the function name table slice after.
    let (check_word, expected) = match table.version() {
        PclnVersion::V12 => (3, table_addr.checked_add(table.functab_offset() as u64)?),
        _ => (1, table_addr.checked_add(table.funcname_offset() as u64)?),
    };
    let layout = layout(table.version());

    memmem::find_iter(data, &needle).find_map(|pos| {
        let word = |index: usize| endian.ptr(data, index.checked_mul(ptr)?.checked_add(pos)?, ptr);
        if word(check_word)? != expected {
            return None;
        }
        let module = ModuleData {
            types: word(layout.types)?,
            etypes: word(layout.types + 1)?,
            typelinks: word(layout.typelinks)?,
            ntypelinks: word(layout.typelinks + 1)?,
        };
        if module.types == 0 || module.etypes < module.types || module.ntypelinks > MAX_TYPELINKS
        {
            return None;
        }
        trace!(offset = pos, ?module, "found module data");
        Some(module)
    })
}

/// Reads `runtime._type` records for one toolchain generation.
pub(crate) struct TypeReader<'d> {
    data: &'d [u8],
    container: &'d Container,
    module: ModuleData,
    /// Go 1.17 switched name lengths from big-endian u16 to a varint.
    varint_names: bool,
    /// Bytes a map type adds after the common header.
    map_extra: u64,
}

impl<'d> TypeReader<'d> {
    pub(crate) fn new(
        data: &'d [u8],
        container: &'d Container,
        module: ModuleData,
        version: PclnVersion,
        minor: Option<u32>,
    ) -> Self {
        let p = container.ptr_size as u64;
        let varint_names = match minor {
            Some(minor) => minor >= 17,
            None => matches!(version, PclnVersion::V118 | PclnVersion::V120),
        };
        let map_extra = match minor {
            // Swiss tables: key, elem, group, hasher, three sizes, flags.
            Some(minor) if minor >= 24 => 8 * p,
            // No hasher before Go 1.14.
            Some(minor) if minor < 14 => 3 * p + 8,
            _ => 4 * p + 8,
        };
        Self { data, container, module, varint_names, map_extra }
    }

    /// Every type listed in `typelinks`, in link order.
    pub(crate) fn types(&self) -> Vec<TypeDescriptor> {
        let Some(len) = usize::try_from(self.module.ntypelinks).ok().and_then(|n| n.checked_mul(4))
        else {
            return Vec::new();
        };
        let Some(links) = self.container.read_vaddr(self.data, self.module.typelinks, len) else {
            return Vec::new();
        };
        links
            .chunks_exact(4)
            .filter_map(|link| {
                let off = self.container.endian.u32(link, 0)? as i32;
                let addr = self.module.types.checked_add_signed(i64::from(off))?;
                self.descriptor(addr)
            })
            .collect()
    }

    fn bytes(&self, addr: u64, len: usize) -> Option<&'d [u8]> {
        self.container.read_vaddr(self.data, addr, len)
    }

    fn u8(&self, addr: u64) -> Option<u8> {
        self.bytes(addr, 1).map(|b| b[0])
    }

    fn u16(&self, addr: u64) -> Option<u16> {
        self.container.endian.u16(self.bytes(addr, 2)?, 0)
    }

    fn u32(&self, addr: u64) -> Option<u32> {
        self.container.endian.u32(self.bytes(addr, 4)?, 0)
    }

    fn ptr(&self, addr: u64) -> Option<u64> {
        let size = self.container.ptr_size;
        self.container.endian.ptr(self.bytes(addr, size)?, 0, size)
    }

    /// Resolve a `nameOff`: a flags byte, the length, then the bytes.
    fn name(&self, off: u32) -> Option<String> {
        let addr = self.module.types.checked_add(u64::from(off))?;
        let (len, header) = if self.varint_names {
            let mut len = 0usize;
            let mut header = 1u64;
            loop {
                let byte = self.u8(addr.checked_add(header)?)?;
                len |= usize::from(byte & 0x7f) << (7 * (header - 1));
                header += 1;
                if byte < 0x80 {
                    break;
                }
                if header > 4 {
                    return None;
                }
            }
            (len, header)
        } else {
            let raw = self.bytes(addr.checked_add(1)?, 2)?;
            (usize::from(u16::from_be_bytes([raw[0], raw[1]])), 3)
        };
        let bytes = self.bytes(addr.checked_add(header)?, len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Size of the common `_type` header.
    fn header_size(&self) -> u64 {
        4 * self.container.ptr_size as u64 + 16
    }

    fn uncommon_offset(&self, kind: u8) -> u64 {
        let p = self.container.ptr_size as u64;
        let extra = match kind {
            KIND_ARRAY => 3 * p,
            KIND_CHAN => 2 * p,
            // in/out counts, padded to pointer alignment.
            KIND_FUNC => p,
            KIND_PTR | KIND_SLICE => p,
            KIND_INTERFACE | KIND_STRUCT => 4 * p,
            KIND_MAP => self.map_extra,
            _ => 0,
        };
        self.header_size() + extra
    }

    /// Package path and methods from the uncommon section of the type at `addr`.
    fn uncommon(&self, addr: u64, kind: u8) -> Option<(String, Vec<TypeMethod>)> {
        let at = addr.checked_add(self.uncommon_offset(kind))?;
        let pkgpath = self.u32(at)?;
        let mcount = self.u16(at.checked_add(4)?)?;
        let moff = self.u32(at.checked_add(8)?)?;

        let package_path = match pkgpath {
            0 => String::new(),
            off => self.name(off).unwrap_or_default(),
        };
        let first = at.checked_add(u64::from(moff))?;
        let methods = (0..u64::from(mcount))
            .filter_map(|i| {
                let entry = first.checked_add(i * METHOD_SIZE)?;
                let name = self.name(self.u32(entry)?)?;
                Some(TypeMethod { name })
            })
            .collect();
        Some((package_path, methods))
    }

    fn flags_and_kind(&self, addr: u64) -> Option<(u8, u8)> {
        let p = self.container.ptr_size as u64;
        let tflag = self.u8(addr.checked_add(2 * p + 4)?)?;
        let kind = self.u8(addr.checked_add(2 * p + 7)?)? & KIND_MASK;
        Some((tflag, kind))
    }

    fn package_path(&self, addr: u64) -> Option<String> {
        let (tflag, kind) = self.flags_and_kind(addr)?;
        if tflag & TFLAG_UNCOMMON == 0 {
            return None;
        }
        self.uncommon(addr, kind).map(|(path, _)| path)
    }

    fn descriptor(&self, addr: u64) -> Option<TypeDescriptor> {
        let p = self.container.ptr_size as u64;
        let (tflag, kind) = self.flags_and_kind(addr)?;
        let kind_name = KIND_NAMES.get(usize::from(kind))?;

        let mut name = self.name(self.u32(addr.checked_add(4 * p + 8)?)?)?;
        if tflag & TFLAG_EXTRA_STAR != 0 && name.starts_with('*') {
            name.remove(0);
        }

        let body = addr.checked_add(self.header_size())?;
        let length = match kind {
            KIND_ARRAY => self.ptr(body.checked_add(2 * p)?)?,
            _ => 0,
        };

        let (mut package_path, methods) = if tflag & TFLAG_UNCOMMON != 0 {
            self.uncommon(addr, kind)?
        } else {
            (String::new(), Vec::new())
        };
        // A pointer without methods of its own belongs where its element does.
        if package_path.is_empty() && kind == KIND_PTR {
            if let Some(path) = self.ptr(body).and_then(|elem| self.package_path(elem)) {
                package_path = path;
            }
        }

        Some(TypeDescriptor {
            name,
            package_path,
            kind: (*kind_name).to_string(),
            address: addr,
            length,
            methods,
        })
    }
}
