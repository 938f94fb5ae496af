//! Scripted analyzer used to drive the plugin through every outcome.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use goinfo_core::features::{FeatureName, FeatureRecord, FeatureSink, SinkError};
use goinfo_core::model::{
    BuildSetting, CompilerIdentity, FunctionSymbol, Package, TypeDescriptor, TypeMethod,
    VendorPackage,
};
use goinfo_core::services::analyzer::{AnalyzerBackend, AnalyzerError, GoBinary};

/// How `open` behaves.
#[derive(Clone)]
pub enum OpenScript {
    Binary(Script),
    Unsupported,
    UnsupportedArchitecture,
    CorruptedPe,
    Other(String),
    PanicStatic(&'static str),
    PanicString(String),
    PanicOpaque,
}

/// What an opened binary reports. `Err` entries fail the matching query.
#[derive(Clone)]
pub struct Script {
    pub version: Result<Option<String>, String>,
    pub settings: Result<Vec<BuildSetting>, String>,
    pub build_id: String,
    pub compiler: Option<CompilerIdentity>,
    pub packages: Result<Vec<Package>, String>,
    pub vendors: Result<Vec<VendorPackage>, String>,
    pub types: Result<Vec<TypeDescriptor>, String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            version: Ok(Some("go1.15".into())),
            settings: Ok(Vec::new()),
            build_id: String::new(),
            compiler: None,
            packages: Ok(Vec::new()),
            vendors: Ok(Vec::new()),
            types: Ok(Vec::new()),
        }
    }
}

/// The binary from the shellcode loader sample: a go1.15 PE32 with one
/// user package and no third-party dependencies.
pub fn go115_sample() -> Script {
    let mut main = Package::new("main", "D:/渗透/go_shellcode_xor");
    main.functions.push(FunctionSymbol::new("main", "main", 4638816, 4638816 + 800));
    main.functions.push(FunctionSymbol::new("init", "main", 4639616, 4639616 + 342));
    Script {
        version: Ok(Some("go1.15".into())),
        settings: Err("not a Go executable: no build info found".into()),
        build_id: "THyJCsrrxDurShR_lQa-/NLfIvSXE3EVr4GaK6lHd/ym0JcumGoh8PSe7LgwLL/\
                   t31lXGfMUAPhGc-8ehfM"
            .into(),
        compiler: Some(CompilerIdentity {
            name: "go1.15".into(),
            timestamp: "2020-08-11T19:01:57Z".into(),
        }),
        packages: Ok(vec![main]),
        vendors: Ok(Vec::new()),
        types: Ok(Vec::new()),
    }
}

pub fn type_descriptor(name: &str, package_path: &str, methods: &[&str]) -> TypeDescriptor {
    TypeDescriptor {
        name: name.into(),
        package_path: package_path.into(),
        kind: "struct".into(),
        address: 0x4c_0000,
        length: 24,
        methods: methods.iter().map(|m| TypeMethod { name: (*m).into() }).collect(),
    }
}

/// Shared observation points for one analyzer and the binaries it opens.
#[derive(Clone, Default)]
pub struct CallLog {
    pub closes: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<&'static str>>>,
}

impl CallLog {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct ScriptedAnalyzer {
    pub open: OpenScript,
    pub log: CallLog,
}

impl ScriptedAnalyzer {
    pub fn new(open: OpenScript) -> Self {
        Self { open, log: CallLog::default() }
    }

    pub fn binary(script: Script) -> Self {
        Self::new(OpenScript::Binary(script))
    }
}

impl AnalyzerBackend for ScriptedAnalyzer {
    fn open(&self, _path: &Path) -> Result<Box<dyn GoBinary>, AnalyzerError> {
        match &self.open {
            OpenScript::Binary(script) => {
                Ok(Box::new(ScriptedBinary { script: script.clone(), log: self.log.clone() }))
            }
            OpenScript::Unsupported => Err(AnalyzerError::UnsupportedFile),
            OpenScript::UnsupportedArchitecture => Err(AnalyzerError::UnsupportedArchitecture),
            OpenScript::CorruptedPe => Err(AnalyzerError::Parse {
                format: "PE",
                message: "fail to read string table length: EOF".into(),
            }),
            OpenScript::Other(message) => Err(AnalyzerError::Other(message.clone())),
            OpenScript::PanicStatic(message) => std::panic::panic_any(*message),
            OpenScript::PanicString(message) => std::panic::panic_any(message.clone()),
            OpenScript::PanicOpaque => std::panic::panic_any(7u8),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedBinary {
    script: Script,
    log: CallLog,
}

fn replay<T: Clone>(result: &Result<T, String>) -> Result<T, AnalyzerError> {
    result.clone().map_err(AnalyzerError::Other)
}

impl GoBinary for ScriptedBinary {
    fn compiler_version(&self) -> Result<Option<String>, AnalyzerError> {
        self.log.record("compiler_version");
        replay(&self.script.version)
    }

    fn build_settings(&self) -> Result<Vec<BuildSetting>, AnalyzerError> {
        self.log.record("build_settings");
        replay(&self.script.settings)
    }

    fn build_id(&self) -> String {
        self.log.record("build_id");
        self.script.build_id.clone()
    }

    fn compiler(&self) -> Option<CompilerIdentity> {
        self.log.record("compiler");
        self.script.compiler.clone()
    }

    fn packages(&self) -> Result<Vec<Package>, AnalyzerError> {
        self.log.record("packages");
        replay(&self.script.packages)
    }

    fn vendors(&self) -> Result<Vec<VendorPackage>, AnalyzerError> {
        self.log.record("vendors");
        replay(&self.script.vendors)
    }

    fn types(&self) -> Result<Vec<TypeDescriptor>, AnalyzerError> {
        self.log.record("types");
        replay(&self.script.types)
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that refuses every record with a given name.
#[derive(Default)]
pub struct RefusingSink {
    pub refuse: Option<FeatureName>,
    pub accepted: Vec<FeatureRecord>,
}

impl FeatureSink for RefusingSink {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<(), SinkError> {
        if Some(record.name) == self.refuse {
            return Err(SinkError::Rejected { name: record.name, reason: "sink closed".into() });
        }
        self.accepted.push(record);
        Ok(())
    }
}
