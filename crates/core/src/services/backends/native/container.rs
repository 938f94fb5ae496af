use goblin::{elf, mach, pe, Hint};

use crate::services::analyzer::AnalyzerError;

/// Byte order of the target the binary was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endian {
    Little,
    Big,
}

impl Endian {
    pub(crate) fn u16(self, data: &[u8], off: usize) -> Option<u16> {
        let bytes: [u8; 2] = data.get(off..off.checked_add(2)?)?.try_into().ok()?;
        Some(match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    pub(crate) fn u32(self, data: &[u8], off: usize) -> Option<u32> {
        let bytes: [u8; 4] = data.get(off..off.checked_add(4)?)?.try_into().ok()?;
        Some(match self {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    pub(crate) fn u64(self, data: &[u8], off: usize) -> Option<u64> {
        let bytes: [u8; 8] = data.get(off..off.checked_add(8)?)?.try_into().ok()?;
        Some(match self {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    /// Encode `value` as a target pointer of `size` bytes (4 or 8).
    pub(crate) fn ptr_bytes(self, value: u64, size: usize) -> Option<Vec<u8>> {
        let bytes = match (size, self) {
            (4, Endian::Little) => u32::try_from(value).ok()?.to_le_bytes().to_vec(),
            (4, Endian::Big) => u32::try_from(value).ok()?.to_be_bytes().to_vec(),
            (8, Endian::Little) => value.to_le_bytes().to_vec(),
            (8, Endian::Big) => value.to_be_bytes().to_vec(),
            _ => return None,
        };
        Some(bytes)
    }

    /// Read a target pointer of `size` bytes (4 or 8).
    pub(crate) fn ptr(self, data: &[u8], off: usize, size: usize) -> Option<u64> {
        match size {
            4 => self.u32(data, off).map(u64::from),
            8 => self.u64(data, off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Elf,
    Pe,
    MachO,
}

impl Format {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Format::Elf => "ELF",
            Format::Pe => "PE",
            Format::MachO => "Mach-O",
        }
    }
}

/// A file-backed section.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

/// Mapping of a virtual address range onto file bytes.
#[derive(Debug, Clone, Copy)]
struct Region {
    vaddr: u64,
    size: u64,
    offset: u64,
}

/// What the native analyzer needs to know about an executable container.
#[derive(Debug, Clone)]
pub(crate) struct Container {
    pub format: Format,
    pub endian: Endian,
    pub ptr_size: usize,
    pub sections: Vec<Section>,
    regions: Vec<Region>,
}

impl Container {
    pub(crate) fn parse(data: &[u8]) -> Result<Container, AnalyzerError> {
        let Some(head) = data.get(..16) else {
            return Err(AnalyzerError::UnsupportedFile);
        };
        let mut magic = [0u8; 16];
        magic.copy_from_slice(head);
        match goblin::peek_bytes(&magic) {
            Ok(Hint::Elf(_)) => parse_elf(data),
            Ok(Hint::Mach(_)) => parse_macho(data),
            Ok(Hint::PE) => parse_pe(data),
            _ => Err(AnalyzerError::UnsupportedFile),
        }
    }

    /// First non-empty section with one of `names`.
    pub(crate) fn section(&self, names: &[&str]) -> Option<&Section> {
        self.sections.iter().find(|s| s.size > 0 && names.contains(&s.name.as_str()))
    }

    /// File bytes backing `len` bytes at virtual address `vaddr`.
    pub(crate) fn read_vaddr<'d>(&self, data: &'d [u8], vaddr: u64, len: usize) -> Option<&'d [u8]> {
        let end = vaddr.checked_add(len as u64)?;
        let region = self
            .regions
            .iter()
            .find(|r| vaddr >= r.vaddr && end <= r.vaddr.saturating_add(r.size))?;
        let start = usize::try_from(region.offset.checked_add(vaddr - region.vaddr)?).ok()?;
        data.get(start..start.checked_add(len)?)
    }

    /// Virtual address at which the byte at file offset `offset` is mapped.
    pub(crate) fn vaddr_of(&self, offset: usize) -> Option<u64> {
        let offset = offset as u64;
        self.regions
            .iter()
            .find(|r| offset >= r.offset && offset - r.offset < r.size)
            .and_then(|r| r.vaddr.checked_add(offset - r.offset))
    }
}

fn parse_error(format: Format, err: goblin::error::Error) -> AnalyzerError {
    AnalyzerError::Parse { format: format.as_str(), message: err.to_string() }
}

fn parse_elf(data: &[u8]) -> Result<Container, AnalyzerError> {
    let elf = elf::Elf::parse(data).map_err(|e| parse_error(Format::Elf, e))?;
    match elf.header.e_machine {
        elf::header::EM_386
        | elf::header::EM_X86_64
        | elf::header::EM_ARM
        | elf::header::EM_AARCH64
        | elf::header::EM_PPC64
        | elf::header::EM_MIPS
        | elf::header::EM_RISCV
        | elf::header::EM_S390 => {}
        _ => return Err(AnalyzerError::UnsupportedArchitecture),
    }

    let mut sections = Vec::new();
    let mut regions = Vec::new();
    for sh in &elf.section_headers {
        if sh.sh_type == elf::section_header::SHT_NOBITS || sh.sh_size == 0 {
            continue;
        }
        let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();
        sections.push(Section { name, offset: sh.sh_offset as usize, size: sh.sh_size as usize });
        if sh.sh_addr != 0 {
            regions.push(Region { vaddr: sh.sh_addr, size: sh.sh_size, offset: sh.sh_offset });
        }
    }
    for ph in &elf.program_headers {
        if ph.p_type == elf::program_header::PT_LOAD && ph.p_filesz > 0 {
            regions.push(Region { vaddr: ph.p_vaddr, size: ph.p_filesz, offset: ph.p_offset });
        }
    }

    Ok(Container {
        format: Format::Elf,
        endian: if elf.little_endian { Endian::Little } else { Endian::Big },
        ptr_size: if elf.is_64 { 8 } else { 4 },
        sections,
        regions,
    })
}

/// Size of one COFF symbol table entry.
const COFF_SYMBOL_SIZE: u64 = 18;

/// Check that the COFF string table length is readable.
///
/// Go's `debug/pe` reads this before anything else and refuses the file when
/// it cannot, so a truncated symbol table is reported the same way here.
fn check_coff_string_table(data: &[u8]) -> Result<(), AnalyzerError> {
    let le = Endian::Little;
    let Some(pe_offset) = le.u32(data, 0x3c).map(|o| o as usize) else {
        return Ok(());
    };
    if data.get(pe_offset..pe_offset + 4) != Some(b"PE\0\0".as_slice()) {
        return Ok(());
    }
    let coff = pe_offset + 4;
    let (Some(symbols_at), Some(symbol_count)) = (le.u32(data, coff + 8), le.u32(data, coff + 12))
    else {
        return Ok(());
    };
    if symbols_at == 0 {
        return Ok(());
    }
    let table = u64::from(symbols_at) + COFF_SYMBOL_SIZE * u64::from(symbol_count);
    let len = data.len() as u64;
    if table + 4 > len {
        let message = if table >= len {
            "fail to read string table length: EOF"
        } else {
            "fail to read string table length: unexpected EOF"
        };
        return Err(AnalyzerError::Parse { format: Format::Pe.as_str(), message: message.into() });
    }
    Ok(())
}

fn parse_pe(data: &[u8]) -> Result<Container, AnalyzerError> {
    check_coff_string_table(data)?;
    let pe = pe::PE::parse(data).map_err(|e| parse_error(Format::Pe, e))?;
    match pe.header.coff_header.machine {
        pe::header::COFF_MACHINE_X86
        | pe::header::COFF_MACHINE_X86_64
        | pe::header::COFF_MACHINE_ARM
        | pe::header::COFF_MACHINE_ARMNT
        | pe::header::COFF_MACHINE_ARM64 => {}
        _ => return Err(AnalyzerError::UnsupportedArchitecture),
    }

    let image_base = pe.image_base as u64;
    let mut sections = Vec::new();
    let mut regions = Vec::new();
    for sec in &pe.sections {
        let raw_size = u64::from(sec.size_of_raw_data);
        if raw_size == 0 {
            continue;
        }
        let name = sec.name().unwrap_or("").to_string();
        sections.push(Section {
            name,
            offset: sec.pointer_to_raw_data as usize,
            size: sec.size_of_raw_data as usize,
        });
        let mapped = match u64::from(sec.virtual_size) {
            0 => raw_size,
            virtual_size => virtual_size.min(raw_size),
        };
        regions.push(Region {
            vaddr: image_base + u64::from(sec.virtual_address),
            size: mapped,
            offset: u64::from(sec.pointer_to_raw_data),
        });
    }

    Ok(Container {
        format: Format::Pe,
        endian: Endian::Little,
        ptr_size: if pe.is_64 { 8 } else { 4 },
        sections,
        regions,
    })
}

fn parse_macho(data: &[u8]) -> Result<Container, AnalyzerError> {
    let macho = mach::MachO::parse(data, 0).map_err(|e| parse_error(Format::MachO, e))?;
    match macho.header.cputype() {
        mach::cputype::CPU_TYPE_X86
        | mach::cputype::CPU_TYPE_X86_64
        | mach::cputype::CPU_TYPE_ARM
        | mach::cputype::CPU_TYPE_ARM64 => {}
        _ => return Err(AnalyzerError::UnsupportedArchitecture),
    }

    let mut sections = Vec::new();
    let mut regions = Vec::new();
    for seg in &macho.segments {
        let Ok(secs) = seg.sections() else { continue };
        for (sec, _) in secs {
            // Zero-fill sections have no file bytes.
            if sec.offset == 0 || sec.size == 0 {
                continue;
            }
            let name = sec.name().unwrap_or("").to_string();
            sections.push(Section { name, offset: sec.offset as usize, size: sec.size as usize });
            regions.push(Region { vaddr: sec.addr, size: sec.size, offset: u64::from(sec.offset) });
        }
    }

    Ok(Container {
        format: Format::MachO,
        endian: if macho.little_endian { Endian::Little } else { Endian::Big },
        ptr_size: if macho.is_64 { 8 } else { 4 },
        sections,
        regions,
    })
}
