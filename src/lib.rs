//! A front end for the WebAssembly Text Format.
//!
//! watfront reads WAT source and produces a typed, index-resolved
//! [`Module`](ir::Module), or a list of [`Diagnostics`](diagnostic::Diagnostics)
//! saying why it could not.
//!
//! # Modules
//!
//! - [`wat`] -- Lexer, S-expression reader, name resolution and parser.
//! - [`ir`] -- The Module IR: types, functions, instructions.
//! - [`validate`] -- Stack-typing validation of function bodies and module checks.
//! - [`print`] -- Writes a `Module` back out as WAT.
//! - [`diagnostic`] -- The error report every stage feeds into.
//! - [`limits`] -- Implementation limits.
//!
//! # Example
//!
//! ```
//! let module = watfront::compile(r#"
//!     (module
//!         (func $add (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add))
//! "#).unwrap();
//! assert_eq!(module.exports[0].name, "add");
//!
//! let errors = watfront::compile("(func (result i32) f32.const 1)").unwrap_err();
//! assert_eq!(errors.0[0].message, "type mismatch in end of function: expected [i32], found [f32]");
//! ```

pub mod diagnostic;
pub mod ir;
pub mod limits;
pub mod print;
pub mod validate;
pub mod wat;

use diagnostic::{Diagnostic, Diagnostics};
use ir::Module;

/// Parse and validate `source`.
///
/// Validation only runs on a module that parsed cleanly; otherwise the
/// lexical, reader and parse diagnostics are returned alone.
pub fn compile(source: &str) -> Result<Module, Diagnostics> {
    let module = wat::parse(source)?;
    validate::validate(module).map_err(|errors| {
        log::debug!("validation failed with {} errors", errors.len());
        Diagnostics(errors.into_iter().map(Diagnostic::from).collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;

    #[test]
    fn compiles_valid_module() {
        let module = compile("(module (func (export \"f\") (result i32) i32.const 7))").unwrap();
        assert_eq!(module.functions.len(), 1);
    }

    #[test]
    fn parse_errors_skip_validation() {
        // the body is also ill-typed, but only the unresolved name is reported
        let errors = compile("(func (result i32) call $missing)").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.has(DiagnosticKind::UnresolvedIdentifier));
        assert!(!errors.has(DiagnosticKind::TypeMismatch));
    }

    #[test]
    fn validation_errors_become_diagnostics() {
        let errors = compile("(func (param i64) (result i32) local.get 0)").unwrap_err();
        assert_eq!(errors.len(), 1);
        let diagnostic = &errors.0[0];
        assert_eq!(diagnostic.kind, DiagnosticKind::TypeMismatch);
        assert_eq!(diagnostic.line(), 1);
    }
}
