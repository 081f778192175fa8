//! Static module table (spec §9 "dynamic module registry" redesign flag):
//! built-in module specifiers resolve to embedded shim sources; anything
//! else resolves against the extracted package directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::rc::Rc;

use deno_core::{
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier, ModuleType,
    RequestedModuleType, ResolutionKind,
};

/// Built-in modules available to user code without touching the package
/// directory. Each is a minimal shim over the bridged ops registered by
/// [`super::ops::edgefn_bridge`] — not a port of Node's internals.
fn builtin_modules() -> HashMap<&'static str, &'static str> {
    let mut m = HashMap::new();
    m.insert("node:events", include_str!("shims/events.js"));
    m.insert("events", include_str!("shims/events.js"));
    m.insert("node:url", include_str!("shims/url.js"));
    m.insert("url", include_str!("shims/url.js"));
    m.insert("node:querystring", include_str!("shims/querystring.js"));
    m.insert("querystring", include_str!("shims/querystring.js"));
    m.insert("node:util", include_str!("shims/util.js"));
    m.insert("util", include_str!("shims/util.js"));
    m.insert("node:buffer", include_str!("shims/buffer.js"));
    m.insert("buffer", include_str!("shims/buffer.js"));
    m.insert("node:stream", include_str!("shims/stream.js"));
    m.insert("stream", include_str!("shims/stream.js"));
    m.insert("node:string_decoder", include_str!("shims/string_decoder.js"));
    m.insert("string_decoder", include_str!("shims/string_decoder.js"));
    m.insert("node:path", include_str!("shims/path.js"));
    m.insert("path", include_str!("shims/path.js"));
    m.insert("node:crypto", include_str!("shims/crypto.js"));
    m.insert("crypto", include_str!("shims/crypto.js"));
    m.insert("node:zlib", include_str!("shims/zlib.js"));
    m.insert("zlib", include_str!("shims/zlib.js"));
    m.insert("node:timers/promises", include_str!("shims/timers_promises.js"));
    m.insert("timers/promises", include_str!("shims/timers_promises.js"));
    m.insert("node:fs", include_str!("shims/fs.js"));
    m.insert("fs", include_str!("shims/fs.js"));
    m.insert("node:net", include_str!("shims/net.js"));
    m.insert("net", include_str!("shims/net.js"));
    m.insert("node:tls", include_str!("shims/tls.js"));
    m.insert("tls", include_str!("shims/tls.js"));
    m.insert("node:http", include_str!("shims/http.js"));
    m.insert("http", include_str!("shims/http.js"));
    m.insert("node:https", include_str!("shims/http.js"));
    m.insert("https", include_str!("shims/http.js"));
    m.insert("mime-types", include_str!("shims/mime_types.js"));
    m.insert("ws", include_str!("shims/websocket.js"));
    m
}

pub struct PackageModuleLoader {
    package_root: PathBuf,
    builtins: HashMap<&'static str, &'static str>,
}

impl PackageModuleLoader {
    pub fn new(package_root: PathBuf) -> Self {
        Self { package_root, builtins: builtin_modules() }
    }
}

impl ModuleLoader for PackageModuleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, deno_core::error::AnyError> {
        if self.builtins.contains_key(specifier) {
            return ModuleSpecifier::parse(&format!("builtin:{specifier}"))
                .map_err(|e| deno_core::error::generic_error(e.to_string()));
        }
        if let Some(rest) = specifier.strip_prefix("./").or_else(|| specifier.strip_prefix("../")) {
            let _ = rest;
            let referrer_url = ModuleSpecifier::parse(referrer)
                .unwrap_or_else(|_| ModuleSpecifier::parse("file:///index.js").unwrap());
            return referrer_url
                .join(specifier)
                .map_err(|e| deno_core::error::generic_error(e.to_string()));
        }
        Err(deno_core::error::generic_error(format!(
            "module not found in the static registry or package: {specifier}"
        )))
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let specifier = module_specifier.clone();

        if let Some(name) = specifier.as_str().strip_prefix("builtin:") {
            let Some(source) = self.builtins.get(name) else {
                return ModuleLoadResponse::Sync(Err(deno_core::error::generic_error(format!(
                    "builtin module disappeared: {name}"
                ))));
            };
            return ModuleLoadResponse::Sync(Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String((*source).into()),
                &specifier,
                None,
            )));
        }

        let package_root = self.package_root.clone();
        let fut: Pin<Box<dyn std::future::Future<Output = _>>> = Box::pin(async move {
            let path = specifier
                .to_file_path()
                .map_err(|_| deno_core::error::generic_error("invalid package module path"))?;
            if !path.starts_with(&package_root) {
                return Err(deno_core::error::generic_error(
                    "module path escapes the package directory",
                ));
            }
            let code = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| deno_core::error::generic_error(format!("module read failed: {e}")))?;
            Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                &specifier,
                None,
            ))
        });
        ModuleLoadResponse::Async(fut)
    }
}

pub type LoaderRc = Rc<PackageModuleLoader>;
