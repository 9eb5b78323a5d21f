use std::ffi::CStr;
use std::io::stdin;
use std::mem::MaybeUninit;
use std::process;
use std::ptr::null_mut;

use llvm_sys::core::{LLVMDeleteFunction, LLVMDisposeMessage, LLVMDumpValue};
use llvm_sys::execution_engine::{
    LLVMCreateExecutionEngineForModule, LLVMDisposeExecutionEngine, LLVMDisposeGenericValue,
    LLVMExecutionEngineRef, LLVMGenericValueToFloat, LLVMRemoveModule, LLVMRunFunction,
};
use llvm_sys::prelude::LLVMPassManagerRef;

use super::codegen::{self, Context};
use super::error::{Error, Result};
use super::lexer;
use super::ops::BinopPrecedence;
use super::parser::Parser;
use super::token::Token;

/// MCJIT cannot resolve an unnamed symbol, so top-level expressions are
/// lowered under this module-level name and deleted after evaluation.
const ANONYMOUS_FUNCTION_NAME: &str = "__anon_expr";

pub(crate) unsafe fn main_loop(
    c: &mut Context,
    ops: &mut BinopPrecedence,
    the_fpm: LLVMPassManagerRef,
    mut the_execution_engine: LLVMExecutionEngineRef,
) {
    let stdin = stdin();
    loop {
        eprint!("k> ");
        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading input: {}", e);
                return;
            }
        }

        let tokens = match lexer::tokenize(&line) {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let mut pos = 0;
        while pos < tokens.len() {
            pos += match tokens[pos] {
                // Ignore top-level semicolons.
                Token::Kwd(';') => 1,
                Token::Def => handle_definition(c, ops, the_fpm, &tokens[pos..]),
                Token::Extern => handle_extern(c, ops, &tokens[pos..]),
                _ => handle_top_level(c, ops, the_fpm, &mut the_execution_engine, &tokens[pos..]),
            };
        }
    }
}

/// Returns how many tokens the form consumed; a failed parse consumes its
/// prefix plus one token for resynchronization.
fn handle_definition(
    c: &mut Context,
    ops: &mut BinopPrecedence,
    the_fpm: LLVMPassManagerRef,
    tokens: &[Token],
) -> usize {
    let mut parser = Parser::new(tokens, ops);
    match parser.parse_definition() {
        Ok(func) => {
            let consumed = parser.position();
            unsafe {
                match codegen::codegen_func(c, ops, the_fpm, &func) {
                    Ok(f) => {
                        eprintln!("Read function definition:");
                        LLVMDumpValue(f);
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            consumed
        }
        Err(e) => {
            eprintln!("{}", e);
            parser.position() + 1
        }
    }
}

fn handle_extern(c: &mut Context, ops: &BinopPrecedence, tokens: &[Token]) -> usize {
    let mut parser = Parser::new(tokens, ops);
    match parser.parse_extern() {
        Ok(proto) => {
            let consumed = parser.position();
            unsafe {
                match codegen::codegen_proto(c, &proto) {
                    Ok(f) => {
                        eprintln!("Read extern:");
                        LLVMDumpValue(f);
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            consumed
        }
        Err(e) => {
            eprintln!("{}", e);
            parser.position() + 1
        }
    }
}

fn handle_top_level(
    c: &mut Context,
    ops: &mut BinopPrecedence,
    the_fpm: LLVMPassManagerRef,
    the_execution_engine: &mut LLVMExecutionEngineRef,
    tokens: &[Token],
) -> usize {
    let mut parser = Parser::new(tokens, ops);
    match parser.parse_top_level() {
        Ok(mut func) => {
            let consumed = parser.position();
            func.0.name = ANONYMOUS_FUNCTION_NAME.to_owned();
            unsafe {
                match codegen::codegen_func(c, ops, the_fpm, &func) {
                    Ok(the_function) => {
                        LLVMDumpValue(the_function);

                        let result =
                            LLVMRunFunction(*the_execution_engine, the_function, 0, null_mut());
                        let value = LLVMGenericValueToFloat(c.double_type, result);
                        LLVMDisposeGenericValue(result);
                        eprintln!("Evaluated to {:.6}", value);

                        // The engine compiled a snapshot of the module; hand
                        // the module to a fresh engine so later definitions
                        // are picked up, and drop the evaluated expression.
                        *the_execution_engine =
                            match refresh_engine(c, *the_execution_engine) {
                                Ok(engine) => engine,
                                Err(e) => {
                                    eprintln!("{}", e);
                                    process::exit(1);
                                }
                            };
                        LLVMDeleteFunction(the_function);
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            consumed
        }
        Err(e) => {
            eprintln!("{}", e);
            parser.position() + 1
        }
    }
}

unsafe fn refresh_engine(
    c: &Context,
    engine: LLVMExecutionEngineRef,
) -> Result<LLVMExecutionEngineRef> {
    let mut out_module = null_mut();
    let mut err_msg = null_mut();
    LLVMRemoveModule(engine, c.module, &mut out_module, &mut err_msg);
    LLVMDisposeExecutionEngine(engine);

    let mut new_engine = MaybeUninit::<LLVMExecutionEngineRef>::uninit();
    if LLVMCreateExecutionEngineForModule(new_engine.as_mut_ptr(), c.module, &mut err_msg) != 0 {
        let msg = CStr::from_ptr(err_msg).to_string_lossy().into_owned();
        LLVMDisposeMessage(err_msg);
        return Err(Error::Jit(msg));
    }
    Ok(new_engine.assume_init())
}
