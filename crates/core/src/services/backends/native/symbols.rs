//! Grouping of line-table functions into packages.

use std::collections::{HashMap, HashSet};

use super::buildinfo::ModuleInfo;
use super::pclntab::RawFunction;
use crate::model::{FunctionSymbol, Package, VendorPackage};

/// A Go symbol name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SymbolName<'a> {
    pub package: &'a str,
    pub receiver: Option<&'a str>,
    pub name: &'a str,
}

fn is_generated(symbol: &str) -> bool {
    symbol.is_empty()
        || ["type:", "type.", "go:", "go.", "gclocals"].iter().any(|p| symbol.starts_with(p))
}

/// True for the suffixes the compiler gives closures and init blocks.
fn is_closure_suffix(name: &str) -> bool {
    name.split('.').any(|segment| {
        let numbered = |prefix: &str| {
            segment
                .strip_prefix(prefix)
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        };
        numbered("func")
            || numbered("gowrap")
            || numbered("deferwrap")
            || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Split `pkg/path.(*T).Method`, `pkg.T.Method`, or `pkg.func` into parts.
pub(crate) fn split_symbol(symbol: &str) -> Option<SymbolName<'_>> {
    if is_generated(symbol) {
        return None;
    }
    // Type arguments may contain dots and slashes; only look before them.
    let head = &symbol[..symbol.find('[').unwrap_or(symbol.len())];
    let last_slash = head.rfind('/').map_or(0, |i| i + 1);
    let dot = last_slash + head[last_slash..].find('.')?;
    let package = &symbol[..dot];
    let rest = &symbol[dot + 1..];
    if package.is_empty() || rest.is_empty() {
        return None;
    }

    if rest.starts_with('(') {
        let close = rest.find(").")?;
        return Some(SymbolName {
            package,
            receiver: Some(&rest[..=close]),
            name: &rest[close + 2..],
        });
    }
    match rest.split_once('.') {
        Some((receiver, name)) if !receiver.is_empty() && !is_closure_suffix(name) => {
            Some(SymbolName { package, receiver: Some(receiver), name })
        }
        _ => Some(SymbolName { package, receiver: None, name: rest }),
    }
}

/// Directory part of a source path, `.` when there is none.
pub(crate) fn dir_of(file: &str) -> &str {
    match file.rfind(['/', '\\']) {
        Some(0) => &file[..1],
        Some(i) => &file[..i],
        None => ".",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PackageClass {
    User,
    Vendor(String),
    Std,
}

/// What is known about the main module when classifying packages.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleContext {
    pub main_module: Option<String>,
    pub deps: Vec<String>,
    /// Source directory of the `main` package.
    pub main_root: Option<String>,
}

impl ModuleContext {
    pub(crate) fn new(module: Option<&ModuleInfo>, functions: &[RawFunction]) -> Self {
        let main_root = functions
            .iter()
            .filter(|f| split_symbol(&f.name).is_some_and(|s| s.package == "main"))
            .find_map(|f| f.file.as_deref())
            .map(|file| dir_of(file).to_string())
            .filter(|dir| dir != "." && dir != "/");
        Self {
            main_module: module.and_then(|m| m.main_module_path()).map(str::to_string),
            deps: module
                .map(|m| m.deps.iter().map(|d| d.path.clone()).collect())
                .unwrap_or_default(),
            main_root,
        }
    }

    pub(crate) fn classify(&self, package: &str, file_dir: Option<&str>) -> PackageClass {
        let within = |root: &str| package == root || package.starts_with(&format!("{root}/"));

        if package == "main" {
            return PackageClass::User;
        }
        if let Some(idx) = package.rfind("vendor/") {
            // The standard library vendors its own dependencies at the top level.
            if idx == 0 {
                return PackageClass::Std;
            }
            if package.as_bytes()[idx - 1] == b'/' {
                return PackageClass::Vendor(package[idx + "vendor/".len()..].to_string());
            }
        }
        if self.main_module.as_deref().is_some_and(within) {
            return PackageClass::User;
        }
        if self.deps.iter().any(|dep| within(dep)) {
            return PackageClass::Vendor(package.to_string());
        }
        if let (Some(root), Some(dir)) = (self.main_root.as_deref(), file_dir) {
            if dir == root || dir.starts_with(&format!("{root}/")) {
                return PackageClass::User;
            }
        }
        let first = package.split('/').next().unwrap_or(package);
        if !first.contains('.') {
            return PackageClass::Std;
        }
        PackageClass::Vendor(package.to_string())
    }
}

/// User packages and vendor names derived from the line table.
#[derive(Debug, Clone, Default)]
pub(crate) struct PackageIndex {
    pub packages: Vec<Package>,
    pub vendors: Vec<VendorPackage>,
}

impl PackageIndex {
    pub(crate) fn build(functions: &[RawFunction], ctx: &ModuleContext) -> Self {
        let mut index = PackageIndex::default();
        let mut classes: HashMap<&str, PackageClass> = HashMap::new();
        let mut user_slots: HashMap<&str, usize> = HashMap::new();
        let mut seen_vendors: HashSet<String> = HashSet::new();

        for func in functions {
            let Some(symbol) = split_symbol(&func.name) else { continue };
            let file_dir = func.file.as_deref().map(dir_of);
            let class = classes
                .entry(symbol.package)
                .or_insert_with(|| ctx.classify(symbol.package, file_dir))
                .clone();

            match class {
                PackageClass::Std => {}
                PackageClass::Vendor(name) => {
                    if seen_vendors.insert(name.clone()) {
                        index.vendors.push(VendorPackage::new(name));
                    }
                }
                PackageClass::User => {
                    let slot = *user_slots.entry(symbol.package).or_insert_with(|| {
                        index.packages.push(Package::new(symbol.package, "."));
                        index.packages.len() - 1
                    });
                    let package = &mut index.packages[slot];
                    if package.file_path == "." {
                        if let Some(dir) = file_dir {
                            package.file_path = dir.to_string();
                        }
                    }
                    let entry =
                        FunctionSymbol::new(symbol.name, symbol.package, func.entry, func.end);
                    if symbol.receiver.is_some() {
                        package.methods.push(entry);
                    } else {
                        package.functions.push(entry);
                    }
                }
            }
        }
        index
    }
}
