use std::collections::HashMap;
use std::ffi::CString;

use llvm_sys::prelude::*;
use llvm_sys::transforms::{instcombine, scalar, util};
use llvm_sys::{analysis, core, LLVMRealPredicate};

use super::ast::{Expr, Function, ProtoKind, Prototype};
use super::error::{Error, Result};
use super::ops::BinopPrecedence;

/// Owns the LLVM objects a REPL session lowers into: context, module,
/// builder, the cached double type, and the symbol table mapping variable
/// names to their entry-block alloca slots.
pub(crate) struct Context {
    context: LLVMContextRef,
    pub(crate) module: LLVMModuleRef,
    builder: LLVMBuilderRef,
    pub(crate) double_type: LLVMTypeRef,
    named_values: HashMap<String, LLVMValueRef>,
}

impl Context {
    pub(crate) unsafe fn new() -> Context {
        let context = core::LLVMContextCreate();
        let module =
            core::LLVMModuleCreateWithNameInContext(b"my cool jit\0".as_ptr() as *const _, context);
        let builder = core::LLVMCreateBuilderInContext(context);
        let double_type = core::LLVMDoubleTypeInContext(context);

        Context {
            context,
            module,
            builder,
            double_type,
            named_values: HashMap::new(),
        }
    }
}

/// The per-function optimization pipeline run after each successful lowering.
pub(crate) unsafe fn create_pass_manager(c: &Context) -> LLVMPassManagerRef {
    let the_fpm = core::LLVMCreateFunctionPassManagerForModule(c.module);
    // Promote allocas to registers first; the scalar passes clean up after it.
    util::LLVMAddPromoteMemoryToRegisterPass(the_fpm);
    instcombine::LLVMAddInstructionCombiningPass(the_fpm);
    scalar::LLVMAddReassociatePass(the_fpm);
    scalar::LLVMAddGVNPass(the_fpm);
    scalar::LLVMAddCFGSimplificationPass(the_fpm);
    core::LLVMInitializeFunctionPassManager(the_fpm);
    the_fpm
}

/// Mutable slots always live at the top of the entry block so the
/// promote-memory-to-register pass can lift them into SSA.
unsafe fn create_entry_block_alloca(c: &Context, function: LLVMValueRef, name: &str) -> LLVMValueRef {
    let builder = core::LLVMCreateBuilderInContext(c.context);
    let entry = core::LLVMGetEntryBasicBlock(function);
    let first = core::LLVMGetFirstInstruction(entry);
    if first.is_null() {
        core::LLVMPositionBuilderAtEnd(builder, entry);
    } else {
        core::LLVMPositionBuilder(builder, entry, first);
    }

    let cname = CString::new(name).unwrap_or_default();
    let alloca = core::LLVMBuildAlloca(builder, c.double_type, cname.as_ptr());
    core::LLVMDisposeBuilder(builder);
    alloca
}

unsafe fn codegen_expr(c: &mut Context, e: &Expr) -> Result<LLVMValueRef> {
    match e {
        Expr::Number(n) => Ok(core::LLVMConstReal(c.double_type, *n)),

        Expr::Variable(name) => match c.named_values.get(name) {
            Some(slot) => {
                let cname = CString::new(name.as_str()).unwrap_or_default();
                Ok(core::LLVMBuildLoad(c.builder, *slot, cname.as_ptr()))
            }
            None => Err(Error::Codegen(format!("unknown variable name: {}", name))),
        },

        Expr::Unary(op, operand) => {
            let operand_val = codegen_expr(c, operand)?;

            let fname = CString::new(format!("unary{}", op)).unwrap_or_default();
            let func = core::LLVMGetNamedFunction(c.module, fname.as_ptr());
            if func.is_null() {
                return Err(Error::Codegen("Unknown unary operator".to_owned()));
            }

            let mut args = [operand_val];
            Ok(core::LLVMBuildCall(
                c.builder,
                func,
                args.as_mut_ptr(),
                1,
                b"unop\0".as_ptr() as *const _,
            ))
        }

        Expr::Binary(op, lhs, rhs) => {
            // '=' stores into the LHS slot instead of evaluating the LHS.
            if *op == '=' {
                let name = match lhs.as_ref() {
                    Expr::Variable(name) => name,
                    _ => {
                        return Err(Error::Codegen(
                            "destination of '=' must be a variable".to_owned(),
                        ))
                    }
                };
                let val = codegen_expr(c, rhs)?;
                let slot = match c.named_values.get(name) {
                    Some(slot) => *slot,
                    None => {
                        return Err(Error::Codegen(format!("unknown variable name: {}", name)))
                    }
                };
                core::LLVMBuildStore(c.builder, val, slot);
                return Ok(val);
            }

            let lhs_val = codegen_expr(c, lhs)?;
            let rhs_val = codegen_expr(c, rhs)?;
            match *op {
                '+' => Ok(core::LLVMBuildFAdd(
                    c.builder,
                    lhs_val,
                    rhs_val,
                    b"addtmp\0".as_ptr() as *const _,
                )),
                '-' => Ok(core::LLVMBuildFSub(
                    c.builder,
                    lhs_val,
                    rhs_val,
                    b"subtmp\0".as_ptr() as *const _,
                )),
                '*' => Ok(core::LLVMBuildFMul(
                    c.builder,
                    lhs_val,
                    rhs_val,
                    b"multmp\0".as_ptr() as *const _,
                )),
                '<' => {
                    let cmp = core::LLVMBuildFCmp(
                        c.builder,
                        LLVMRealPredicate::LLVMRealULT,
                        lhs_val,
                        rhs_val,
                        b"cmptmp\0".as_ptr() as *const _,
                    );
                    // Only doubles exist, so widen the i1 back to 0.0/1.0.
                    Ok(core::LLVMBuildUIToFP(
                        c.builder,
                        cmp,
                        c.double_type,
                        b"booltmp\0".as_ptr() as *const _,
                    ))
                }
                _ => {
                    let fname = CString::new(format!("binary{}", op)).unwrap_or_default();
                    let func = core::LLVMGetNamedFunction(c.module, fname.as_ptr());
                    if func.is_null() {
                        return Err(Error::Codegen("invalid binary operator".to_owned()));
                    }

                    let mut args = [lhs_val, rhs_val];
                    Ok(core::LLVMBuildCall(
                        c.builder,
                        func,
                        args.as_mut_ptr(),
                        2,
                        b"binop\0".as_ptr() as *const _,
                    ))
                }
            }
        }

        Expr::Call(callee, args) => {
            let cname = CString::new(callee.as_str()).unwrap_or_default();
            let func = core::LLVMGetNamedFunction(c.module, cname.as_ptr());
            if func.is_null() {
                return Err(Error::Codegen(format!("unknown function: {}", callee)));
            }

            let param_cnt = core::LLVMCountParams(func);
            if param_cnt as usize != args.len() {
                return Err(Error::Codegen("incorrect # arguments passed".to_owned()));
            }

            let mut arg_vals = args
                .iter()
                .map(|arg| codegen_expr(c, arg))
                .collect::<Result<Vec<_>>>()?;

            Ok(core::LLVMBuildCall(
                c.builder,
                func,
                arg_vals.as_mut_ptr(),
                param_cnt,
                b"calltmp\0".as_ptr() as *const _,
            ))
        }

        Expr::If(cond, then_expr, else_expr) => {
            let cond_val = codegen_expr(c, cond)?;
            let zero = core::LLVMConstReal(c.double_type, 0.0);
            let cond_bool = core::LLVMBuildFCmp(
                c.builder,
                LLVMRealPredicate::LLVMRealONE,
                cond_val,
                zero,
                b"ifcond\0".as_ptr() as *const _,
            );

            let function = core::LLVMGetBasicBlockParent(core::LLVMGetInsertBlock(c.builder));
            let then_bb = core::LLVMAppendBasicBlockInContext(
                c.context,
                function,
                b"then\0".as_ptr() as *const _,
            );
            let else_bb = core::LLVMAppendBasicBlockInContext(
                c.context,
                function,
                b"else\0".as_ptr() as *const _,
            );
            let merge_bb = core::LLVMAppendBasicBlockInContext(
                c.context,
                function,
                b"ifcont\0".as_ptr() as *const _,
            );
            core::LLVMBuildCondBr(c.builder, cond_bool, then_bb, else_bb);

            core::LLVMPositionBuilderAtEnd(c.builder, then_bb);
            let then_val = codegen_expr(c, then_expr)?;
            core::LLVMBuildBr(c.builder, merge_bb);
            // The arm may have moved the insertion block; the phi needs the
            // block control flow actually arrives from.
            let then_end = core::LLVMGetInsertBlock(c.builder);

            core::LLVMPositionBuilderAtEnd(c.builder, else_bb);
            let else_val = codegen_expr(c, else_expr)?;
            core::LLVMBuildBr(c.builder, merge_bb);
            let else_end = core::LLVMGetInsertBlock(c.builder);

            core::LLVMPositionBuilderAtEnd(c.builder, merge_bb);
            let phi = core::LLVMBuildPhi(c.builder, c.double_type, b"iftmp\0".as_ptr() as *const _);
            let mut incoming_vals = [then_val, else_val];
            let mut incoming_blocks = [then_end, else_end];
            core::LLVMAddIncoming(phi, incoming_vals.as_mut_ptr(), incoming_blocks.as_mut_ptr(), 2);
            Ok(phi)
        }

        Expr::For(name, start, end, step, body) => {
            let function = core::LLVMGetBasicBlockParent(core::LLVMGetInsertBlock(c.builder));
            let alloca = create_entry_block_alloca(c, function, name);

            // Start value is lowered with the loop variable not yet in scope.
            let start_val = codegen_expr(c, start)?;
            core::LLVMBuildStore(c.builder, start_val, alloca);

            let loop_bb = core::LLVMAppendBasicBlockInContext(
                c.context,
                function,
                b"loop\0".as_ptr() as *const _,
            );
            core::LLVMBuildBr(c.builder, loop_bb);
            core::LLVMPositionBuilderAtEnd(c.builder, loop_bb);

            let shadowed = c.named_values.insert(name.clone(), alloca);

            // Body value is discarded.
            codegen_expr(c, body)?;

            let step_val = match step {
                Some(step) => codegen_expr(c, step)?,
                None => core::LLVMConstReal(c.double_type, 1.0),
            };

            let end_val = codegen_expr(c, end)?;

            // Reload rather than reuse the start value: the body may have
            // assigned to the loop variable.
            let cname = CString::new(name.as_str()).unwrap_or_default();
            let cur = core::LLVMBuildLoad(c.builder, alloca, cname.as_ptr());
            let next = core::LLVMBuildFAdd(
                c.builder,
                cur,
                step_val,
                b"nextvar\0".as_ptr() as *const _,
            );
            core::LLVMBuildStore(c.builder, next, alloca);

            let zero = core::LLVMConstReal(c.double_type, 0.0);
            let end_cond = core::LLVMBuildFCmp(
                c.builder,
                LLVMRealPredicate::LLVMRealONE,
                end_val,
                zero,
                b"loopcond\0".as_ptr() as *const _,
            );

            let after_bb = core::LLVMAppendBasicBlockInContext(
                c.context,
                function,
                b"afterloop\0".as_ptr() as *const _,
            );
            core::LLVMBuildCondBr(c.builder, end_cond, loop_bb, after_bb);
            core::LLVMPositionBuilderAtEnd(c.builder, after_bb);

            match shadowed {
                Some(old) => {
                    c.named_values.insert(name.clone(), old);
                }
                None => {
                    c.named_values.remove(name);
                }
            }

            // A for loop always evaluates to 0.0.
            Ok(core::LLVMConstReal(c.double_type, 0.0))
        }

        Expr::Var(bindings, body) => {
            let function = core::LLVMGetBasicBlockParent(core::LLVMGetInsertBlock(c.builder));

            // Each binding becomes visible as soon as its own initializer has
            // been lowered, so later initializers in the same 'var' see it.
            let mut shadowed = Vec::with_capacity(bindings.len());
            for (name, init) in bindings {
                let init_val = match init {
                    Some(init) => codegen_expr(c, init)?,
                    None => core::LLVMConstReal(c.double_type, 0.0),
                };
                let alloca = create_entry_block_alloca(c, function, name);
                core::LLVMBuildStore(c.builder, init_val, alloca);
                shadowed.push((name.clone(), c.named_values.insert(name.clone(), alloca)));
            }

            let body_val = codegen_expr(c, body)?;

            for (name, old) in shadowed.into_iter().rev() {
                match old {
                    Some(old) => {
                        c.named_values.insert(name, old);
                    }
                    None => {
                        c.named_values.remove(&name);
                    }
                }
            }

            Ok(body_val)
        }
    }
}

pub(crate) unsafe fn codegen_proto(c: &mut Context, proto: &Prototype) -> Result<LLVMValueRef> {
    let cname = CString::new(proto.name.as_str()).unwrap_or_default();
    let existing = core::LLVMGetNamedFunction(c.module, cname.as_ptr());

    let func = if existing.is_null() {
        let mut doubles = vec![c.double_type; proto.args.len()];
        let fn_type = core::LLVMFunctionType(
            c.double_type,
            doubles.as_mut_ptr(),
            proto.args.len() as u32,
            0, /* not vararg */
        );
        core::LLVMAddFunction(c.module, cname.as_ptr(), fn_type)
    } else {
        // A prior declaration is reused; a prior definition is rejected.
        if core::LLVMCountBasicBlocks(existing) != 0 {
            return Err(Error::Codegen("Redefinition of function".to_owned()));
        }
        if core::LLVMCountParams(existing) as usize != proto.args.len() {
            return Err(Error::Codegen(
                "Redefinition of function with different # args".to_owned(),
            ));
        }
        existing
    };

    for (i, arg) in proto.args.iter().enumerate() {
        let param = core::LLVMGetParam(func, i as u32);
        core::LLVMSetValueName2(param, arg.as_ptr() as *const _, arg.len());
    }

    Ok(func)
}

pub(crate) unsafe fn codegen_func(
    c: &mut Context,
    ops: &mut BinopPrecedence,
    the_fpm: LLVMPassManagerRef,
    Function(proto, body): &Function,
) -> Result<LLVMValueRef> {
    c.named_values.clear();

    let the_function = codegen_proto(c, proto)?;

    // A binary operator becomes visible before its body is lowered and is
    // rolled back again if the body fails.
    let installed_op = match proto.kind {
        ProtoKind::BinaryOp => proto.operator_char().map(|op| {
            ops.install(op, proto.precedence);
            op
        }),
        _ => None,
    };

    let bb = core::LLVMAppendBasicBlockInContext(
        c.context,
        the_function,
        b"entry\0".as_ptr() as *const _,
    );
    core::LLVMPositionBuilderAtEnd(c.builder, bb);

    for (i, arg) in proto.args.iter().enumerate() {
        let param = core::LLVMGetParam(the_function, i as u32);
        let alloca = create_entry_block_alloca(c, the_function, arg);
        core::LLVMBuildStore(c.builder, param, alloca);
        c.named_values.insert(arg.clone(), alloca);
    }

    match codegen_expr(c, body) {
        Ok(ret_val) => {
            core::LLVMBuildRet(c.builder, ret_val);

            // A verifier failure is a lowering bug, not a user error.
            analysis::LLVMVerifyFunction(
                the_function,
                analysis::LLVMVerifierFailureAction::LLVMAbortProcessAction,
            );

            core::LLVMRunFunctionPassManager(the_fpm, the_function);

            Ok(the_function)
        }
        Err(e) => {
            core::LLVMDeleteFunction(the_function);
            if let Some(op) = installed_op {
                ops.remove(op);
            }
            Err(e)
        }
    }
}
