//! Pure-Rust Go binary analyzer.
//!
//! Parses the executable container with goblin, then reads the structures the
//! Go linker leaves behind: the build info blob, the build id marker, and the
//! pclntab. Package and vendor lists are derived from the pclntab function
//! names; classification uses module information when the build info has it.
//! Type descriptors come from the typelinks of the module data record.

mod buildinfo;
mod catalog;
mod container;
mod moduledata;
mod pclntab;
mod symbols;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use memchr::memmem;
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::bytes::Regex;
use tracing::{debug, trace};

use self::buildinfo::{read_build_info, BuildInfo};
use self::container::Container;
use self::moduledata::TypeReader;
use self::pclntab::{LineTable, RawFunction};
use self::symbols::{ModuleContext, PackageIndex};
use crate::model::{BuildSetting, CompilerIdentity, Package, TypeDescriptor, VendorPackage};
use crate::services::analyzer::{AnalyzerBackend, AnalyzerError, GoBinary};

pub use self::catalog::{CompilerCatalog, GoRelease};

const BUILD_ID_PREFIX: &[u8] = b"\xff Go build ID: \"";
const MAX_BUILD_ID_LEN: usize = 512;

static VERSION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"go1\.\d{1,2}(?:\.\d{1,2})?(?:beta\d|rc\d)?").expect("valid version pattern")
});

/// Analyzer that needs nothing beyond the binary's bytes.
#[derive(Debug, Clone)]
pub struct NativeAnalyzer {
    catalog: Arc<CompilerCatalog>,
}

impl Default for NativeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeAnalyzer {
    pub fn new() -> Self {
        Self::with_catalog(CompilerCatalog::builtin())
    }

    pub fn with_catalog(catalog: CompilerCatalog) -> Self {
        Self { catalog: Arc::new(catalog) }
    }

    /// Open an in-memory image.
    pub fn open_bytes(&self, data: Vec<u8>) -> Result<NativeGoBinary, AnalyzerError> {
        let container = Container::parse(&data)?;
        let build_info = read_build_info(&data, &container);
        let pclntab = pclntab::locate(&data, &container);
        debug!(
            format = container.format.as_str(),
            ptr_size = container.ptr_size,
            has_build_info = build_info.is_some(),
            pclntab_offset = ?pclntab,
            "parsed container"
        );
        Ok(NativeGoBinary {
            data,
            container,
            build_info,
            pclntab,
            catalog: Arc::clone(&self.catalog),
            functions: OnceCell::new(),
        })
    }
}

impl AnalyzerBackend for NativeAnalyzer {
    fn open(&self, path: &Path) -> Result<Box<dyn GoBinary>, AnalyzerError> {
        let data = fs::read(path)?;
        Ok(Box::new(self.open_bytes(data)?))
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// A binary opened by [`NativeAnalyzer`].
pub struct NativeGoBinary {
    data: Vec<u8>,
    container: Container,
    build_info: Option<BuildInfo>,
    pclntab: Option<usize>,
    catalog: Arc<CompilerCatalog>,
    functions: OnceCell<Vec<RawFunction>>,
}

impl NativeGoBinary {
    fn line_table(&self) -> Result<LineTable<'_>, AnalyzerError> {
        let offset = self.pclntab.ok_or(AnalyzerError::NoPclntab)?;
        self.data.get(offset..).and_then(LineTable::parse).ok_or(AnalyzerError::NoPclntab)
    }

    fn functions(&self) -> Result<&[RawFunction], AnalyzerError> {
        let functions = self.functions.get_or_try_init(|| {
            let table = self.line_table()?;
            let functions = table.functions();
            trace!(version = ?table.version(), count = functions.len(), "read line table");
            Ok::<_, AnalyzerError>(functions)
        })?;
        Ok(functions)
    }

    fn index(&self) -> Result<PackageIndex, AnalyzerError> {
        let functions = self.functions()?;
        let module = self.build_info.as_ref().and_then(|info| info.module.as_ref());
        let ctx = ModuleContext::new(module, functions);
        Ok(PackageIndex::build(functions, &ctx))
    }

    /// Version marker embedded in the runtime when build info is absent.
    fn scan_version(&self) -> Option<String> {
        let found = VERSION_MARKER.find(&self.data)?;
        Some(String::from_utf8_lossy(found.as_bytes()).into_owned())
    }
}

impl GoBinary for NativeGoBinary {
    fn compiler_version(&self) -> Result<Option<String>, AnalyzerError> {
        if let Some(info) = &self.build_info {
            return Ok(Some(info.version.clone()));
        }
        // Without a line table this is not a Go binary at all.
        if self.pclntab.is_none() {
            return Ok(None);
        }
        self.scan_version().map(Some).ok_or(AnalyzerError::NoGoVersion)
    }

    fn build_settings(&self) -> Result<Vec<BuildSetting>, AnalyzerError> {
        let info = self.build_info.as_ref().ok_or(AnalyzerError::NoBuildInfo)?;
        Ok(info.module.as_ref().map(|m| m.settings.clone()).unwrap_or_default())
    }

    fn build_id(&self) -> String {
        let Some(start) = memmem::find(&self.data, BUILD_ID_PREFIX) else {
            return String::new();
        };
        let body = &self.data[start + BUILD_ID_PREFIX.len()..];
        let body = &body[..body.len().min(MAX_BUILD_ID_LEN)];
        match memchr::memchr(b'"', body) {
            Some(end) => String::from_utf8_lossy(&body[..end]).into_owned(),
            None => String::new(),
        }
    }

    fn compiler(&self) -> Option<CompilerIdentity> {
        let version = self.compiler_version().ok()??;
        // `go1.21.0 X:loopvar` style markers carry experiments after a space.
        let name = version.split_whitespace().next()?;
        self.catalog.lookup(name)
    }

    fn packages(&self) -> Result<Vec<Package>, AnalyzerError> {
        Ok(self.index()?.packages)
    }

    fn vendors(&self) -> Result<Vec<VendorPackage>, AnalyzerError> {
        Ok(self.index()?.vendors)
    }

    fn types(&self) -> Result<Vec<TypeDescriptor>, AnalyzerError> {
        let table = self.line_table()?;
        let module = self
            .pclntab
            .and_then(|offset| self.container.vaddr_of(offset))
            .and_then(|addr| moduledata::locate(&self.data, &self.container, &table, addr))
            .ok_or(AnalyzerError::NoModuleData)?;
        let version = self.compiler_version().ok().flatten();
        let minor = version.as_deref().and_then(moduledata::go_minor);
        let reader = TypeReader::new(&self.data, &self.container, module, table.version(), minor);
        let types = reader.types();
        debug!(count = types.len(), typelinks = module.ntypelinks, "read type descriptors");
        Ok(types)
    }

    fn close(&mut self) {
        trace!(format = self.container.format.as_str(), "closing binary");
        self.data = Vec::new();
        self.functions = OnceCell::new();
    }
}

#[cfg(test)]
mod tests {
    use super::moduledata::fixture::{moduledata_v118, RType, TypeBlob};
    use super::pclntab::fixture::{build_v118, Func};
    use super::*;

    const TEXT_ADDR: u64 = 0x40_1000;
    const TABLE_ADDR: u64 = 0x50_0000;
    const TYPES_ADDR: u64 = 0x60_0000;
    const TYPELINK_ADDR: u64 = 0x68_0000;
    const MODULE_ADDR: u64 = 0x70_0000;
    const BUILDINFO_ADDR: u64 = 0x71_0000;

    fn elf64(sections: &[(&str, &[u8])]) -> Vec<u8> {
        use object::write::{Object, StandardSection};
        use object::{Architecture, BinaryFormat, Endianness, SectionKind};

        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = obj.section_id(StandardSection::Text);
        obj.append_section_data(text, &[0xc3; 16], 16);
        for (name, bytes) in sections {
            let id =
                obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::ReadOnlyData);
            obj.append_section_data(id, bytes, 8);
        }
        obj.write().unwrap()
    }

    /// Executable x86-64 ELF whose sections carry load addresses.
    fn linked_elf64(sections: &[(&str, u64, &[u8])]) -> Vec<u8> {
        let mut out = vec![0u8; 64];
        let mut placed = Vec::new();
        for (_, _, bytes) in sections {
            out.resize((out.len() + 15) & !15, 0);
            placed.push(out.len());
            out.extend_from_slice(bytes);
        }

        let mut shstrtab = vec![0u8];
        let mut name_offs = Vec::new();
        for (name, _, _) in sections {
            name_offs.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        let shstrtab_off = out.len();
        out.extend_from_slice(&shstrtab);
        out.resize((out.len() + 7) & !7, 0);

        let header = |name: u32, kind: u32, flags: u64, addr: u64, offset: usize, size: usize| {
            let mut sh = Vec::with_capacity(64);
            sh.extend_from_slice(&name.to_le_bytes());
            sh.extend_from_slice(&kind.to_le_bytes());
            sh.extend_from_slice(&flags.to_le_bytes());
            sh.extend_from_slice(&addr.to_le_bytes());
            sh.extend_from_slice(&(offset as u64).to_le_bytes());
            sh.extend_from_slice(&(size as u64).to_le_bytes());
            sh.extend_from_slice(&[0u8; 8]); // link, info
            sh.extend_from_slice(&1u64.to_le_bytes()); // addralign
            sh.extend_from_slice(&0u64.to_le_bytes()); // entsize
            sh
        };
        let shoff = out.len();
        out.extend_from_slice(&[0u8; 64]);
        for (i, (_, addr, bytes)) in sections.iter().enumerate() {
            // SHT_PROGBITS, SHF_ALLOC
            out.extend(header(name_offs[i], 1, 0x2, *addr, placed[i], bytes.len()));
        }
        out.extend(header(shstrtab_name, 3, 0, 0, shstrtab_off, shstrtab.len()));
        let shnum = sections.len() as u16 + 2;

        out[..4].copy_from_slice(b"\x7fELF");
        out[4..7].copy_from_slice(&[2, 1, 1]); // 64-bit, little endian, version
        out[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        out[52..54].copy_from_slice(&64u16.to_le_bytes());
        out[54..56].copy_from_slice(&56u16.to_le_bytes());
        out[58..60].copy_from_slice(&64u16.to_le_bytes());
        out[60..62].copy_from_slice(&shnum.to_le_bytes());
        out[62..64].copy_from_slice(&(shnum - 1).to_le_bytes());
        out
    }

    /// A named struct type whose printed name carries the pointer star.
    fn named_struct(name: u32, pkg: u32, methods: &[u32]) -> RType<'_> {
        RType { kind: 25, name, extra_star: true, body: &[0; 4], uncommon: Some((pkg, methods)) }
    }

    /// A linked Go 1.18-layout program with user, standard library and
    /// unnamed types behind its module data.
    fn linked_go_image(version: &str) -> Vec<u8> {
        let table = build_v118(
            TEXT_ADDR,
            &[
                Func { name: "main.main", entry_off: 0, file_index: Some(0) },
                Func { name: "main.(*Server).Serve", entry_off: 0x20, file_index: Some(0) },
                Func { name: "fmt.Println", entry_off: 0x60, file_index: Some(1) },
                Func { name: "github.com/acme/lib.Do", entry_off: 0x80, file_index: None },
            ],
            0xa0,
            &["/src/app/main.go", "/usr/local/go/src/fmt/print.go"],
        );

        let mut blob = TypeBlob::new();
        let main = blob.name("main");
        let fmt = blob.name("fmt");
        let server_name = blob.name("*main.Server");
        let config_name = blob.name("*main.config");
        let pp_name = blob.name("*fmt.pp");
        let array_name = blob.name("[4]int");
        let serve = blob.name("Serve");
        let shutdown = blob.name("shutdown");
        let write = blob.name("Write");

        let server = blob.rtype(named_struct(server_name, main, &[]));
        let server_body = [TYPES_ADDR + u64::from(server)];
        let server_ptr = blob.rtype(RType {
            kind: 22,
            name: server_name,
            extra_star: false,
            body: &server_body,
            uncommon: Some((main, &[serve, shutdown])),
        });
        let pp = blob.rtype(named_struct(pp_name, fmt, &[write]));
        let config = blob.rtype(named_struct(config_name, main, &[]));
        let config_body = [TYPES_ADDR + u64::from(config)];
        let config_ptr = blob.rtype(RType {
            kind: 22,
            name: config_name,
            extra_star: false,
            body: &config_body,
            uncommon: None,
        });
        let array = blob.rtype(RType {
            kind: 17,
            name: array_name,
            extra_star: false,
            body: &[0, 0, 4],
            uncommon: None,
        });

        let links: Vec<u8> = [server, server_ptr, pp, config, config_ptr, array]
            .iter()
            .flat_map(|off| off.to_le_bytes())
            .collect();
        let module = moduledata_v118(
            TABLE_ADDR,
            72,
            (TYPES_ADDR, TYPES_ADDR + blob.bytes.len() as u64),
            (TYPELINK_ADDR, 6),
        );
        let info = inline_build_info(
            version,
            "path\texample.com/app\nmod\texample.com/app\t(devel)\t\n\
             dep\tgithub.com/acme/lib\tv1.0.0\th1:x=\nbuild\t-trimpath=true\n",
        );
        linked_elf64(&[
            (".gopclntab", TABLE_ADDR, &table),
            (".rodata", TYPES_ADDR, &blob.bytes),
            (".typelink", TYPELINK_ADDR, &links),
            (".noptrdata", MODULE_ADDR, &module),
            (".go.buildinfo", BUILDINFO_ADDR, &info),
        ])
    }

    fn inline_build_info(version: &str, modinfo: &str) -> Vec<u8> {
        let mut blob = buildinfo::BUILDINFO_MAGIC.to_vec();
        blob.push(8);
        blob.push(0x2);
        blob.resize(32, 0);
        for s in [version, modinfo] {
            let mut len = s.len();
            while len >= 0x80 {
                blob.push((len as u8) | 0x80);
                len >>= 7;
            }
            blob.push(len as u8);
            blob.extend_from_slice(s.as_bytes());
        }
        blob
    }

    #[test]
    fn reads_version_settings_and_packages_from_elf() {
        let table = build_v118(
            0x40_1000,
            &[
                Func { name: "main.main", entry_off: 0, file_index: Some(0) },
                Func { name: "fmt.Println", entry_off: 0x40, file_index: Some(1) },
                Func { name: "github.com/acme/lib.Do", entry_off: 0x80, file_index: None },
            ],
            0xc0,
            &["/src/app/main.go", "/usr/local/go/src/fmt/print.go"],
        );
        let info = inline_build_info(
            "go1.18",
            "path\texample.com/app\nmod\texample.com/app\t(devel)\t\n\
             dep\tgithub.com/acme/lib\tv1.0.0\th1:x=\nbuild\tGOOS=linux\n",
        );
        let data = elf64(&[(".go.buildinfo", &info), (".gopclntab", &table)]);

        let binary = NativeAnalyzer::new().open_bytes(data).unwrap();
        assert_eq!(binary.compiler_version().unwrap().as_deref(), Some("go1.18"));
        assert_eq!(binary.build_settings().unwrap(), vec![BuildSetting::new("GOOS", "linux")]);
        assert!(binary.compiler().is_none());

        let packages = binary.packages().unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "main");
        assert_eq!(packages[0].file_path, "/src/app");
        assert_eq!(packages[0].functions[0].size(), 0x40);
        assert_eq!(binary.vendors().unwrap(), vec![VendorPackage::new("github.com/acme/lib")]);
        // Relocatable objects carry no addresses, so no module data is reachable.
        assert!(matches!(binary.types(), Err(AnalyzerError::NoModuleData)));
    }

    #[test]
    fn types_are_read_through_module_data() {
        let binary = NativeAnalyzer::new().open_bytes(linked_go_image("go1.18.3")).unwrap();
        let types = binary.types().unwrap();
        let summary: Vec<(&str, &str, &str)> = types
            .iter()
            .map(|t| (t.name.as_str(), t.kind.as_str(), t.package_path.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("main.Server", "struct", "main"),
                ("*main.Server", "ptr", "main"),
                ("fmt.pp", "struct", "fmt"),
                ("main.config", "struct", "main"),
                ("*main.config", "ptr", "main"),
                ("[4]int", "array", ""),
            ]
        );
        let methods: Vec<&str> = types[1].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["Serve", "shutdown"]);
        assert_eq!(types[2].methods.len(), 1);
        assert_eq!(types[2].methods[0].name, "Write");
        assert!(types[0].address > TYPES_ADDR && types[1].address > types[0].address);
        assert_eq!(types[5].length, 4);
        assert_eq!(types[1].length, 0);
    }

    #[test]
    fn version_pattern_finds_release_candidates() {
        let found = VERSION_MARKER.find(b"\0runtime\0go1.21rc2\0").unwrap();
        assert_eq!(found.as_bytes(), b"go1.21rc2");
        assert!(!VERSION_MARKER.is_match(b"go2.0 golang"));
    }

    #[test]
    fn non_go_elf_reports_no_version() {
        let binary = NativeAnalyzer::new().open_bytes(elf64(&[])).unwrap();
        assert_eq!(binary.compiler_version().unwrap(), None);
        assert!(matches!(binary.build_settings(), Err(AnalyzerError::NoBuildInfo)));
        assert!(matches!(binary.packages(), Err(AnalyzerError::NoPclntab)));
        assert_eq!(binary.build_id(), "");
    }

    #[test]
    fn build_id_and_catalog_identity_are_resolved() {
        let mut marker = BUILD_ID_PREFIX.to_vec();
        marker.extend_from_slice(b"abc/def\"\n \xff");
        let table = build_v118(
            0x40_1000,
            &[Func { name: "main.main", entry_off: 0, file_index: None }],
            0x10,
            &[],
        );
        let mut runtime = b"\0\0go1.15\0".to_vec();
        runtime.extend_from_slice(&marker);
        let data = elf64(&[(".rodata.rt", &runtime), (".gopclntab", &table)]);

        let binary = NativeAnalyzer::new().open_bytes(data).unwrap();
        assert_eq!(binary.build_id(), "abc/def");
        assert_eq!(binary.compiler_version().unwrap().as_deref(), Some("go1.15"));
        let identity = binary.compiler().unwrap();
        assert_eq!(identity.name, "go1.15");
        assert_eq!(identity.timestamp, "2020-08-11T19:01:57Z");
    }

    #[test]
    fn unrecognised_bytes_are_unsupported() {
        let pdf = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj".to_vec();
        let result = NativeAnalyzer::new().open_bytes(pdf);
        assert!(matches!(result, Err(AnalyzerError::UnsupportedFile)));
    }

    #[test]
    fn plugin_reports_features_for_go_elf() {
        use crate::config::PluginSettings;
        use crate::features::{FeatureBuffer, FeatureName};
        use crate::services::loader::{AnalysisOutcome, GoInfoPlugin};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app");
        std::fs::write(&path, linked_go_image("go1.18.3")).unwrap();

        let settings = PluginSettings::default();
        let analyzer = NativeAnalyzer::new();
        let mut sink = FeatureBuffer::new();
        let outcome = GoInfoPlugin::new(&settings, &analyzer).execute(&path, &mut sink);

        assert!(matches!(outcome, AnalysisOutcome::Success), "{outcome:?}");
        assert_eq!(sink.values(FeatureName::GoCompilerFlag), vec!["true"]);
        assert_eq!(sink.values(FeatureName::GoBuildId), vec![""]);
        assert_eq!(sink.values(FeatureName::GoCompilerVersion), vec!["go1.18.3"]);
        assert_eq!(sink.values(FeatureName::GoCompilerTimestamp), vec!["2022-06-01T16:38:24Z"]);
        assert_eq!(sink.values(FeatureName::GoPackage), vec!["main"]);
        assert_eq!(sink.values(FeatureName::GoFile), vec!["/src/app"]);
        assert_eq!(sink.values(FeatureName::GoPackageFunction), vec!["main"]);
        assert_eq!(sink.values(FeatureName::GoPackageMethod), vec!["Serve"]);
        assert_eq!(sink.values(FeatureName::GoVendorPackage), vec!["github.com/acme/lib"]);
        let method = sink.by_name(FeatureName::GoPackageMethod).next().unwrap();
        assert_eq!((method.offset, method.size), (Some(TEXT_ADDR + 0x20), Some(0x40)));

        // Only types from user packages survive; `fmt.pp` and `[4]int` do not.
        assert_eq!(
            sink.values(FeatureName::GoType),
            vec!["main.Server", "*main.Server", "main.config", "*main.config"]
        );
        let labels: Vec<_> =
            sink.by_name(FeatureName::GoType).map(|r| r.label.as_deref().unwrap()).collect();
        assert_eq!(labels, vec!["struct", "ptr", "struct", "ptr"]);
        assert_eq!(sink.values(FeatureName::GoTypeMethod), vec!["Serve", "shutdown"]);
        assert!(sink
            .by_name(FeatureName::GoTypeMethod)
            .all(|r| r.label.as_deref() == Some("*main.Server") && r.offset.is_none()));
    }

    #[test]
    fn uncatalogued_release_has_no_compiler_identity() {
        let binary = NativeAnalyzer::new().open_bytes(linked_go_image("go1.20.3")).unwrap();
        assert_eq!(binary.compiler_version().unwrap().as_deref(), Some("go1.20.3"));
        assert!(binary.compiler().is_none());

        let catalog = CompilerCatalog::from_releases([GoRelease {
            name: "go1.20.3".into(),
            timestamp: "2000-01-01T00:00:00Z".into(),
        }]);
        let binary = NativeAnalyzer::with_catalog(catalog)
            .open_bytes(linked_go_image("go1.20.3"))
            .unwrap();
        let identity = binary.compiler().unwrap();
        assert_eq!(identity.name, "go1.20.3");
        assert_eq!(identity.timestamp, "2000-01-01T00:00:00Z");
    }

    #[test]
    fn unsupported_machine_is_an_open_error() {
        use crate::config::PluginSettings;
        use crate::features::FeatureBuffer;
        use crate::services::loader::{AnalysisOutcome, GoInfoPlugin};

        let mut data = linked_elf64(&[]);
        data[18..20].copy_from_slice(&2u16.to_le_bytes()); // EM_SPARC
        let result = NativeAnalyzer::new().open_bytes(data.clone());
        assert!(matches!(result, Err(AnalyzerError::UnsupportedArchitecture)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparc");
        std::fs::write(&path, data).unwrap();
        let settings = PluginSettings::default();
        let analyzer = NativeAnalyzer::new();
        let mut sink = FeatureBuffer::new();
        match GoInfoPlugin::new(&settings, &analyzer).execute(&path, &mut sink) {
            AnalysisOutcome::OptOut(reason) => assert_eq!(
                reason,
                "File could not be opened by pygore with message unsupported architecture"
            ),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn close_releases_the_image() {
        let mut binary = NativeAnalyzer::new().open_bytes(elf64(&[])).unwrap();
        binary.close();
        assert!(binary.data.is_empty());
    }
}
