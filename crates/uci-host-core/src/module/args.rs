//! Startup arguments handed to an engine's `initialize` and `run_loop`.

use std::ffi::{CStr, CString, c_char, c_int};
use std::marker::PhantomData;

use crate::error::HarnessError;

/// An argument vector for an engine entry point.
///
/// The first element is the program name the engine sees as `argv[0]`.
/// Every element has already been checked for interior NUL bytes, so
/// building the C view cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineArgs {
    argv: Vec<CString>,
}

impl EngineArgs {
    /// Build an argument vector from a program name and caller arguments.
    pub fn new(program: &str, args: &[String]) -> Result<Self, HarnessError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(to_cstring(program)?);
        for arg in args {
            argv.push(to_cstring(arg)?);
        }
        Ok(Self { argv })
    }

    /// Number of elements including the program name.
    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// The program name (`argv[0]`).
    pub fn program(&self) -> &CStr {
        &self.argv[0]
    }

    /// Arguments after the program name, lossily decoded.
    pub fn args_lossy(&self) -> Vec<String> {
        self.argv[1..]
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Borrow a NULL-terminated `char **` view for a C entry point.
    pub(crate) fn c_argv(&self) -> CArgv<'_> {
        let mut ptrs: Vec<*mut c_char> = self
            .argv
            .iter()
            .map(|a| a.as_ptr() as *mut c_char)
            .collect();
        ptrs.push(std::ptr::null_mut());
        CArgv {
            ptrs,
            _args: PhantomData,
        }
    }
}

/// C view of an [`EngineArgs`]; valid while the args are borrowed.
pub(crate) struct CArgv<'a> {
    ptrs: Vec<*mut c_char>,
    _args: PhantomData<&'a EngineArgs>,
}

impl CArgv<'_> {
    pub(crate) fn argc(&self) -> c_int {
        c_int::try_from(self.ptrs.len() - 1).unwrap_or(c_int::MAX)
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.ptrs.as_mut_ptr()
    }
}

pub(crate) fn to_cstring(s: &str) -> Result<CString, HarnessError> {
    CString::new(s).map_err(|_| HarnessError::InvalidArgument(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_is_argv_zero() {
        let args = EngineArgs::new("stockfish", &["bench".to_string()]).unwrap();
        assert_eq!(args.argc(), 2);
        assert_eq!(args.program().to_str().unwrap(), "stockfish");
        assert_eq!(args.args_lossy(), vec!["bench".to_string()]);
    }

    #[test]
    fn c_argv_is_null_terminated() {
        let args = EngineArgs::new("engine", &["a".to_string(), "b".to_string()]).unwrap();
        let mut c = args.c_argv();
        assert_eq!(c.argc(), 3);

        let ptr = c.as_mut_ptr();
        let (first, last) = unsafe { (CStr::from_ptr(*ptr), *ptr.add(3)) };
        assert_eq!(first.to_str().unwrap(), "engine");
        assert!(last.is_null());
    }

    #[test]
    fn interior_nul_is_rejected() {
        let err = EngineArgs::new("engine", &["bad\0arg".to_string()]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidArgument(ref s) if s == "bad\0arg"));
    }
}
