mod ast;
mod codegen;
mod error;
mod lexer;
mod ops;
mod parser;
mod token;
mod toplevel;

use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::process;
use std::ptr::null_mut;

use llvm_sys::core::LLVMDisposeMessage;
use llvm_sys::execution_engine::{self, LLVMLinkInMCJIT};
use llvm_sys::support::LLVMAddSymbol;
use llvm_sys::target::{
    LLVM_InitializeNativeAsmParser, LLVM_InitializeNativeAsmPrinter, LLVM_InitializeNativeTarget,
};

/// putchar that takes a double and returns 0. Reachable from Kaleidoscope
/// after `extern putchard(x)`.
#[no_mangle]
pub extern "C" fn putchard(x: f64) -> f64 {
    unsafe { libc::putchar(x as u8 as libc::c_int) };
    0.0
}

/// printf("%f\n") that takes a double, returning 0.
#[no_mangle]
pub extern "C" fn printd(x: f64) -> f64 {
    println!("{:.6}", x);
    0.0
}

fn main() {
    let mut ops = ops::BinopPrecedence::default();

    unsafe {
        LLVMLinkInMCJIT();
        LLVM_InitializeNativeTarget();
        LLVM_InitializeNativeAsmPrinter();
        LLVM_InitializeNativeAsmParser();

        // Make the host runtime functions visible to the JIT.
        LLVMAddSymbol(
            b"putchard\0".as_ptr() as *const _,
            putchard as usize as *mut _,
        );
        LLVMAddSymbol(
            b"printd\0".as_ptr() as *const _,
            printd as usize as *mut _,
        );

        let mut c = codegen::Context::new();

        let mut eengine = MaybeUninit::<execution_engine::LLVMExecutionEngineRef>::uninit();
        let mut err_msg = null_mut::<libc::c_char>();
        if execution_engine::LLVMCreateExecutionEngineForModule(
            eengine.as_mut_ptr(),
            c.module,
            &mut err_msg,
        ) != 0
        {
            let msg = CStr::from_ptr(err_msg).to_string_lossy().into_owned();
            LLVMDisposeMessage(err_msg);
            eprintln!("Could not create ExecutionEngine: {}", msg);
            process::exit(1);
        }
        let the_execution_engine = eengine.assume_init();

        let the_fpm = codegen::create_pass_manager(&c);

        toplevel::main_loop(&mut c, &mut ops, the_fpm, the_execution_engine);
    }
}
