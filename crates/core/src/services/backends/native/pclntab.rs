//! Reader for the Go program counter line table (`pclntab`).
//!
//! Only what function enumeration needs is decoded: names, entry and end
//! addresses, and the source file of each function's first instruction.

use memchr::memmem;

use super::buildinfo::uvarint;
use super::container::{Container, Endian};

const MAGIC_12: u32 = 0xffff_fffb;
const MAGIC_116: u32 = 0xffff_fffa;
const MAGIC_118: u32 = 0xffff_fff0;
const MAGIC_120: u32 = 0xffff_fff1;

/// Layout generation of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PclnVersion {
    /// Go 1.2 through 1.15.
    V12,
    /// Go 1.16 and 1.17.
    V116,
    /// Go 1.18 and 1.19.
    V118,
    /// Go 1.20 onwards.
    V120,
}

impl PclnVersion {
    fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            MAGIC_12 => Some(PclnVersion::V12),
            MAGIC_116 => Some(PclnVersion::V116),
            MAGIC_118 => Some(PclnVersion::V118),
            MAGIC_120 => Some(PclnVersion::V120),
            _ => None,
        }
    }

    /// Function table entries are 32-bit offsets from the text start.
    fn relative_entries(self) -> bool {
        matches!(self, PclnVersion::V118 | PclnVersion::V120)
    }
}

/// A function as recorded in the line table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawFunction {
    pub name: String,
    pub entry: u64,
    pub end: u64,
    pub file: Option<String>,
}

#[derive(Debug)]
pub(crate) struct LineTable<'d> {
    data: &'d [u8],
    version: PclnVersion,
    endian: Endian,
    ptr_size: usize,
    nfunc: usize,
    text_start: u64,
    funcname_off: usize,
    cu_off: usize,
    filetab_off: usize,
    pctab_off: usize,
    functab_off: usize,
}

impl<'d> LineTable<'d> {
    /// Parse the header of a table starting at `data[0]`.
    pub(crate) fn parse(data: &'d [u8]) -> Option<Self> {
        let (version, endian) = [Endian::Little, Endian::Big].into_iter().find_map(|endian| {
            PclnVersion::from_magic(endian.u32(data, 0)?).map(|v| (v, endian))
        })?;
        if data.len() < 16 || data[4] != 0 || data[5] != 0 || !matches!(data[6], 1 | 2 | 4) {
            return None;
        }
        let ptr_size = usize::from(data[7]);
        if ptr_size != 4 && ptr_size != 8 {
            return None;
        }

        let word = |i: usize| -> Option<usize> {
            usize::try_from(endian.ptr(data, 8 + i * ptr_size, ptr_size)?).ok()
        };
        let nfunc = word(0)?;
        let mut table = LineTable {
            data,
            version,
            endian,
            ptr_size,
            nfunc,
            text_start: 0,
            funcname_off: 0,
            cu_off: 0,
            filetab_off: 0,
            pctab_off: 0,
            functab_off: 0,
        };
        match version {
            PclnVersion::V12 => {
                table.functab_off = 8 + ptr_size;
                let filetab_at = nfunc
                    .checked_mul(2 * ptr_size)?
                    .checked_add(table.functab_off + ptr_size)?;
                table.filetab_off = endian.u32(data, filetab_at)? as usize;
            }
            PclnVersion::V116 => {
                table.funcname_off = word(2)?;
                table.cu_off = word(3)?;
                table.filetab_off = word(4)?;
                table.pctab_off = word(5)?;
                table.functab_off = word(6)?;
            }
            PclnVersion::V118 | PclnVersion::V120 => {
                table.text_start = endian.ptr(data, 8 + 2 * ptr_size, ptr_size)?;
                table.funcname_off = word(3)?;
                table.cu_off = word(4)?;
                table.filetab_off = word(5)?;
                table.pctab_off = word(6)?;
                table.functab_off = word(7)?;
            }
        }

        let functab_len = nfunc.checked_mul(2)?.checked_add(1)?.checked_mul(table.field_size())?;
        if nfunc == 0 || table.functab_off.checked_add(functab_len)? > data.len() {
            return None;
        }
        Some(table)
    }

    pub(crate) fn version(&self) -> PclnVersion {
        self.version
    }

    /// Offset of the function name table from the start of the table.
    pub(crate) fn funcname_offset(&self) -> usize {
        self.funcname_off
    }

    /// Offset of the function table from the start of the table.
    pub(crate) fn functab_offset(&self) -> usize {
        self.functab_off
    }

    fn field_size(&self) -> usize {
        if self.version.relative_entries() {
            4
        } else {
            self.ptr_size
        }
    }

    fn functab_field(&self, index: usize) -> Option<u64> {
        let size = self.field_size();
        let at = index.checked_mul(size)?.checked_add(self.functab_off)?;
        self.endian.ptr(self.data, at, size)
    }

    fn entry(&self, index: usize) -> Option<u64> {
        let raw = self.functab_field(2 * index)?;
        if self.version.relative_entries() {
            Some(self.text_start.wrapping_add(raw))
        } else {
            Some(raw)
        }
    }

    fn c_string(&self, off: usize) -> Option<String> {
        let bytes = self.data.get(off..)?;
        let end = memchr::memchr(0, bytes)?;
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// First value of the pc-value table at `off`, i.e. the value at the entry pc.
    fn first_pc_value(&self, off: usize) -> Option<i64> {
        let (delta, _) = uvarint(self.data.get(off..)?)?;
        if delta == 0 {
            return None;
        }
        let delta = if delta & 1 != 0 { !((delta >> 1) as i64) } else { (delta >> 1) as i64 };
        (-1i64).checked_add(delta)
    }

    fn file_name(&self, file_index: i64, cu_offset: u32) -> Option<String> {
        let index = usize::try_from(file_index).ok()?;
        match self.version {
            PclnVersion::V12 => {
                let count = self.endian.u32(self.data, self.filetab_off)? as usize;
                if index == 0 || index >= count {
                    return None;
                }
                let at = index.checked_mul(4)?.checked_add(self.filetab_off)?;
                let name_off = self.endian.u32(self.data, at)?;
                self.c_string(name_off as usize)
            }
            _ => {
                let slot = (cu_offset as usize).checked_add(index)?;
                let at = slot.checked_mul(4)?.checked_add(self.cu_off)?;
                let name_off = self.endian.u32(self.data, at)?;
                if name_off == u32::MAX {
                    return None;
                }
                self.c_string(self.filetab_off.checked_add(name_off as usize)?)
            }
        }
    }

    fn function(&self, index: usize) -> Option<RawFunction> {
        let entry = self.entry(index)?;
        let end = self.entry(index.checked_add(1)?)?;
        let func_off = usize::try_from(self.functab_field(index.checked_mul(2)? + 1)?).ok()?;
        let base = match self.version {
            PclnVersion::V12 => func_off,
            _ => self.functab_off.checked_add(func_off)?,
        };
        // The _func record starts with the entry, then 32-bit fields:
        // nameoff, args, frame/deferreturn, pcsp, pcfile, pcln, npcdata, cuOffset.
        let fields = base.checked_add(self.field_size())?;
        let name_off = self.endian.u32(self.data, fields)? as usize;
        let name = self.c_string(self.funcname_off.checked_add(name_off)?)?;
        if name.is_empty() {
            return None;
        }

        let pcfile = self.endian.u32(self.data, fields.checked_add(16)?)? as usize;
        let file = if pcfile == 0 {
            None
        } else {
            let cu_offset = match self.version {
                PclnVersion::V12 => 0,
                _ => self.endian.u32(self.data, fields.checked_add(28)?)?,
            };
            self.pctab_off
                .checked_add(pcfile)
                .and_then(|off| self.first_pc_value(off))
                .and_then(|fno| self.file_name(fno, cu_offset))
        };

        Some(RawFunction { name, entry, end: end.max(entry), file })
    }

    /// Every readable function, in table order.
    pub(crate) fn functions(&self) -> Vec<RawFunction> {
        (0..self.nfunc).filter_map(|i| self.function(i)).collect()
    }
}

/// File offset of the line table in `data`.
///
/// Uses the dedicated section when the container has one; PE files keep the
/// table inside `.rdata`/`.text`, so the file is scanned for a valid header.
pub(crate) fn locate(data: &[u8], container: &Container) -> Option<usize> {
    if let Some(section) = container.section(&[".gopclntab", "__gopclntab"]) {
        let bytes = data.get(section.offset..section.offset.checked_add(section.size)?)?;
        if LineTable::parse(bytes).is_some() {
            return Some(section.offset);
        }
    }

    for magic in [MAGIC_120, MAGIC_118, MAGIC_116, MAGIC_12] {
        let needle = match container.endian {
            Endian::Little => magic.to_le_bytes(),
            Endian::Big => magic.to_be_bytes(),
        };
        for pos in memmem::find_iter(data, &needle) {
            let Some(table) = LineTable::parse(&data[pos..]) else { continue };
            if table.function(0).is_some() {
                return Some(pos);
            }
        }
    }
    None
}
