//! Decompiler for CPython 3.7 wordcode.
//!
//! The input is a [`CodeObject`] tree as serialized by an external
//! container decoder (see [`code_object_from_json`]); the output is
//! Python source text, or a disassembly listing in
//! [`DecompileMode::Disasm`].

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod analysis;
pub mod ast;
pub mod code;
pub mod decompile;
pub mod instr;

pub use code::{Code, CodeObject, Const};
pub use instr::{Instr, Op};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    Source,
    Disasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    /// Spaces per indentation level in the emitted source.
    pub indent: usize,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: DecompileMode::Source,
            indent: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum DepyoError {
    #[error("truncated instruction at byte {offset}")]
    TruncatedInstruction { offset: usize },

    #[error("unknown opcode {opcode} at byte {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("jump at byte {offset} targets invalid offset {target}")]
    BadJumpTarget { offset: u32, target: u32 },

    #[error("instruction at byte {offset} indexes {table}[{index}] but it has {len} entries")]
    BadOperandIndex {
        offset: u32,
        table: &'static str,
        index: usize,
        len: usize,
    },

    #[error("invalid code object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Progress callbacks invoked while decompiling. Every method defaults
/// to a no-op.
pub trait Observer {
    /// A code unit (module, function body, class body, comprehension)
    /// is about to be walked.
    fn enter_scope(&self, _name: &str) {}

    /// The named code unit has been fully walked.
    fn exit_scope(&self, _name: &str) {}

    /// An unrecognised shape was papered over with a placeholder.
    fn diagnostic(&self, _message: &str) {}
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Parses the JSON form of a serialized code object tree.
pub fn code_object_from_json(json: &str) -> Result<CodeObject, DepyoError> {
    Ok(serde_json::from_str(json)?)
}

/// Decompiles a module-level code object to source text with default
/// options.
pub fn decompile_module(obj: CodeObject) -> Result<String, DepyoError> {
    decompile_module_with_options(obj, DecompileOptions::default())
}

pub fn decompile_module_with_options(
    obj: CodeObject,
    options: DecompileOptions,
) -> Result<String, DepyoError> {
    let observer: Rc<dyn Observer> = Rc::new(NullObserver);
    decompile_module_with_observer(obj, options, &observer)
}

pub fn decompile_module_with_observer(
    obj: CodeObject,
    options: DecompileOptions,
    observer: &Rc<dyn Observer>,
) -> Result<String, DepyoError> {
    let code = Rc::new(Code::new(obj, None)?);
    Ok(match options.mode {
        DecompileMode::Source => {
            decompile::module_suite_with(&code, observer).to_source(options.indent)
        }
        DecompileMode::Disasm => code.disassemble(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use pretty_assertions::assert_eq;

    use super::*;

    const ASSIGN_JSON: &str = r#"{
        "name": "<module>",
        "first_line": 1,
        "bytecode": [100, 0, 90, 0, 100, 1, 83, 0],
        "consts": [{"kind": "int", "value": 1}, {"kind": "none"}],
        "names": ["x"]
    }"#;

    #[test]
    fn decompiles_module_from_json() {
        let obj = code_object_from_json(ASSIGN_JSON).unwrap();
        assert_eq!(decompile_module(obj).unwrap(), "x = 1\n");
    }

    #[test]
    fn disasm_mode_lists_instructions() {
        let obj = code_object_from_json(ASSIGN_JSON).unwrap();
        let options = DecompileOptions {
            mode: DecompileMode::Disasm,
            ..DecompileOptions::default()
        };
        let listing = decompile_module_with_options(obj, options).unwrap();
        assert!(listing.contains("LOAD_CONST"), "{listing}");
        assert!(listing.contains("STORE_NAME"), "{listing}");
    }

    #[test]
    fn rejects_malformed_json() {
        let err = code_object_from_json("{").unwrap_err();
        assert!(matches!(err, DepyoError::Json(_)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let obj = CodeObject {
            name: "<module>".to_owned(),
            bytecode: vec![255, 0],
            ..CodeObject::default()
        };
        let err = decompile_module(obj).unwrap_err();
        assert_eq!(err.to_string(), "unknown opcode 255 at byte 0");
    }

    #[derive(Default)]
    struct Recording {
        events: RefCell<Vec<String>>,
    }

    impl Observer for Recording {
        fn enter_scope(&self, name: &str) {
            self.events.borrow_mut().push(format!("enter {name}"));
        }

        fn exit_scope(&self, name: &str) {
            self.events.borrow_mut().push(format!("exit {name}"));
        }
    }

    #[test]
    fn observer_sees_scope_transitions() {
        let obj = code_object_from_json(ASSIGN_JSON).unwrap();
        let recording = Rc::new(Recording::default());
        let observer: Rc<dyn Observer> = recording.clone();
        decompile_module_with_observer(obj, DecompileOptions::default(), &observer).unwrap();
        assert_eq!(
            *recording.events.borrow(),
            vec!["enter <module>".to_owned(), "exit <module>".to_owned()]
        );
    }
}
