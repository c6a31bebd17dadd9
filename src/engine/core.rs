//! Pluggable compression core: a dynamically loaded shared library exposing
//! a frozen C ABI, mirroring the reference crate's own `plugin.rs` frozen
//! codec-plugin pattern — a stable symbol set, callee-allocated output
//! buffers paired with an explicit free function, and the library treated
//! as a trust boundary that is validated once at load time and never
//! unloaded while any output it produced might still be in use.
//!
//! ```c
//! size_t h4_compress   (const void* in, size_t n, void** out);
//! size_t h4_decompress (const void* in, size_t n, void** out);
//! void   h4_free       (void* ptr);
//! const char*          h4_engine_id(void);  // optional
//! const unsigned char* h4_engine_fp(void);  // optional, 32 bytes
//! ```

use super::{CompressionEngine, EngineError, EngineInfo, EngineKind};
use libloading::{Library, Symbol};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};

type CompressFn = unsafe extern "C" fn(*const u8, usize, *mut *mut u8) -> usize;
type DecompressFn = unsafe extern "C" fn(*const u8, usize, *mut *mut u8) -> usize;
type FreeFn = unsafe extern "C" fn(*mut u8);
type EngineIdFn = unsafe extern "C" fn() -> *const c_char;
type EngineFpFn = unsafe extern "C" fn() -> *const u8;

/// A loaded dynamic compression core. The owning `Library` is kept alive for
/// the lifetime of this value; the raw function pointers resolved from it
/// remain valid as long as it is, which `CoreEngine` guarantees by never
/// exposing or dropping `_lib` early.
pub struct CoreEngine {
    _lib: Library,
    path: PathBuf,
    compress_fn: CompressFn,
    decompress_fn: DecompressFn,
    free_fn: FreeFn,
    engine_id: Option<String>,
    fingerprint: Option<[u8; 32]>,
}

impl CoreEngine {
    /// Open `path` and resolve the mandatory symbols. Fails `CoreMissing` if
    /// the library cannot be opened or any of `h4_compress`/`h4_decompress`/
    /// `h4_free` is absent. The metadata symbols are optional here; whether
    /// their absence is acceptable is a sealing-policy decision made by the
    /// caller (see `crate::sealing`).
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let lib = unsafe { Library::new(path) }.map_err(|_| EngineError::CoreMissing(path.to_path_buf()))?;

        let compress_fn = unsafe {
            let sym: Symbol<CompressFn> = lib
                .get(b"h4_compress\0")
                .map_err(|_| EngineError::CoreMissing(path.to_path_buf()))?;
            *sym
        };
        let decompress_fn = unsafe {
            let sym: Symbol<DecompressFn> = lib
                .get(b"h4_decompress\0")
                .map_err(|_| EngineError::CoreMissing(path.to_path_buf()))?;
            *sym
        };
        let free_fn = unsafe {
            let sym: Symbol<FreeFn> = lib
                .get(b"h4_free\0")
                .map_err(|_| EngineError::CoreMissing(path.to_path_buf()))?;
            *sym
        };

        let engine_id = unsafe {
            lib.get(b"h4_engine_id\0").ok().map(|sym: Symbol<EngineIdFn>| {
                let f = *sym;
                let ptr = f();
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            })
        };
        let fingerprint = unsafe {
            lib.get(b"h4_engine_fp\0").ok().map(|sym: Symbol<EngineFpFn>| {
                let f = *sym;
                let ptr = f();
                let mut buf = [0u8; 32];
                buf.copy_from_slice(std::slice::from_raw_parts(ptr, 32));
                buf
            })
        };

        Ok(Self {
            _lib: lib,
            path: path.to_path_buf(),
            compress_fn,
            decompress_fn,
            free_fn,
            engine_id,
            fingerprint,
        })
    }

    pub fn engine_id(&self) -> Option<&str> {
        self.engine_id.as_deref()
    }

    pub fn fingerprint(&self) -> Option<[u8; 32]> {
        self.fingerprint
    }

    fn call(&self, f: unsafe extern "C" fn(*const u8, usize, *mut *mut u8) -> usize, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut out_ptr: *mut u8 = std::ptr::null_mut();
        let len = unsafe { f(data.as_ptr(), data.len(), &mut out_ptr) };
        if len == 0 {
            return Ok(Vec::new());
        }
        if out_ptr.is_null() {
            return Err(EngineError::CompressionFailed(format!(
                "core at {:?} returned length {len} with a null buffer",
                self.path
            )));
        }
        let result = unsafe { std::slice::from_raw_parts(out_ptr, len) }.to_vec();
        unsafe { (self.free_fn)(out_ptr) };
        Ok(result)
    }
}

impl CompressionEngine for CoreEngine {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.call(self.compress_fn, data)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.call(self.decompress_fn, data)
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            engine: EngineKind::Core,
            engine_id: self.engine_id.clone().unwrap_or_default(),
            fingerprint: hex::encode(self.fingerprint.unwrap_or([0u8; 32])),
            deterministic: true,
            sealed: false,
            identity_safe: true,
            opaque: true,
        }
    }
}

// Safety: the spec's core ABI requires compress/decompress to be reentrant
// pure functions of their input, the same contract the reference crate's
// plugin descriptor documents for its own codec plugins.
unsafe impl Send for CoreEngine {}
unsafe impl Sync for CoreEngine {}
