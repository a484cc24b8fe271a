//! The interpreter's execution core: a per-call value stack of 64-bit slots
//! walked over the resolved IR of one function.
//!
//! Numeric operators follow two's-complement modulo-2ⁿ arithmetic and
//! round-to-nearest-ties-to-even floating point, with NaN canonicalization
//! at min/max as the specification dictates. The cancellation token is
//! polled at function entry and at every backward branch.

use {
    super::{InterpFunc, InterpModuleEngine, CALL_STACK_LIMIT},
    crate::{
        call_ctx::CallCtx,
        engine::call_host,
        error::{check, Result, RuntimeError, TrapKind},
        impl_bug,
        instance::{FuncKind, FunctionInstance, ModuleInstance},
        ir::{
            BranchTarget, Float, InclusiveRange, MemArg, Operation, SignedInt, SignedType,
            UnsignedInt, UnsignedType,
        },
        values::{Value, NULL_REF},
    },
    std::sync::Arc,
};

pub(super) fn exec_function(
    ctx: &CallCtx,
    engine: &InterpModuleEngine,
    instance: &Arc<ModuleInstance>,
    func: &InterpFunc,
    mut stack: Vec<u64>,
    depth: usize,
) -> Result<Vec<u64>> {
    if depth >= CALL_STACK_LIMIT {
        return Err(TrapKind::CallStackExhausted.into());
    }
    ctx.check_cancelled()?;

    // Parameters arrive on the stack; locals follow, zero-initialized.
    stack.resize(stack.len() + func.locals, 0);

    let mut pc = 0usize;
    while pc < func.ops.len() {
        match &func.ops[pc] {
            Operation::Unreachable => return Err(TrapKind::Unreachable.into()),
            Operation::Label(_) => {}

            Operation::Br(target) => {
                match take_branch(ctx, func, &mut stack, target, pc)? {
                    Some(next) => {
                        pc = next;
                        continue;
                    }
                    None => return Ok(stack),
                }
            }
            Operation::BrIf { then, els } => {
                let cond = pop(&mut stack)? as u32;
                let taken = if cond != 0 { Some(then) } else { els.as_ref() };
                if let Some(target) = taken {
                    match take_branch(ctx, func, &mut stack, target, pc)? {
                        Some(next) => {
                            pc = next;
                            continue;
                        }
                        None => return Ok(stack),
                    }
                }
            }
            Operation::BrTable { targets, default } => {
                let index = pop(&mut stack)? as u32 as usize;
                let target = targets.get(index).unwrap_or(default);
                match take_branch(ctx, func, &mut stack, target, pc)? {
                    Some(next) => {
                        pc = next;
                        continue;
                    }
                    None => return Ok(stack),
                }
            }

            Operation::Call { func_index } => {
                let callee = instance.func(*func_index)?;
                call_function(ctx, engine, instance, &callee, &mut stack, depth)?;
            }
            Operation::CallIndirect {
                type_index,
                table_index,
            } => {
                let table = instance.table(*table_index)?;
                let i = pop(&mut stack)? as u32;
                let slot = table.get(i)?;
                if slot == NULL_REF {
                    return Err(TrapKind::UninitializedElement.into());
                }
                let callee = ctx.store()?.func_by_addr((slot - 1) as u32)?;
                let expected = instance
                    .type_ids
                    .get(*type_index as usize)
                    .ok_or_else(|| impl_bug!("no type id {}", type_index))?;
                check(
                    callee.type_id == *expected,
                    TrapKind::IndirectCallTypeMismatch,
                )?;
                call_function(ctx, engine, instance, &callee, &mut stack, depth)?;
            }

            Operation::Pick { depth } => {
                let v = *stack
                    .get(stack.len() - 1 - *depth as usize)
                    .ok_or_else(|| impl_bug!("pick past the stack bottom"))?;
                stack.push(v);
            }
            Operation::Swap { depth } => {
                let top = stack.len() - 1;
                stack.swap(top, top - *depth as usize);
            }
            Operation::Drop(range) => drop_range(&mut stack, *range)?,
            Operation::Select => {
                let cond = pop(&mut stack)? as u32;
                let v2 = pop(&mut stack)?;
                let v1 = pop(&mut stack)?;
                stack.push(if cond != 0 { v1 } else { v2 });
            }

            Operation::GlobalGet { index } => {
                let g = instance.global(*index)?;
                stack.push(g.raw());
            }
            Operation::GlobalSet { index } => {
                let v = pop(&mut stack)?;
                instance.global(*index)?.set_raw(v);
            }

            Operation::Load { ty, arg } => {
                let ea = effective_address(&mut stack, arg)?;
                let n = match ty {
                    UnsignedType::I32 | UnsignedType::F32 => 4,
                    UnsignedType::I64 | UnsignedType::F64 => 8,
                };
                let v = instance.memory()?.load_le(ea, n)?;
                stack.push(v);
            }
            Operation::Load8 { ty, arg } => {
                let ea = effective_address(&mut stack, arg)?;
                let v = instance.memory()?.load_le(ea, 1)?;
                stack.push(extend_loaded(v, 8, *ty));
            }
            Operation::Load16 { ty, arg } => {
                let ea = effective_address(&mut stack, arg)?;
                let v = instance.memory()?.load_le(ea, 2)?;
                stack.push(extend_loaded(v, 16, *ty));
            }
            Operation::Load32 { signed, arg } => {
                let ea = effective_address(&mut stack, arg)?;
                let v = instance.memory()?.load_le(ea, 4)?;
                stack.push(if *signed {
                    v as u32 as i32 as i64 as u64
                } else {
                    v
                });
            }
            Operation::Store { ty, arg } => {
                let v = pop(&mut stack)?;
                let ea = effective_address(&mut stack, arg)?;
                let n = match ty {
                    UnsignedType::I32 | UnsignedType::F32 => 4,
                    UnsignedType::I64 | UnsignedType::F64 => 8,
                };
                instance.memory()?.store_le(ea, n, v)?;
            }
            Operation::Store8 { arg } => {
                let v = pop(&mut stack)?;
                let ea = effective_address(&mut stack, arg)?;
                instance.memory()?.store_le(ea, 1, v)?;
            }
            Operation::Store16 { arg } => {
                let v = pop(&mut stack)?;
                let ea = effective_address(&mut stack, arg)?;
                instance.memory()?.store_le(ea, 2, v)?;
            }
            Operation::Store32 { arg } => {
                let v = pop(&mut stack)?;
                let ea = effective_address(&mut stack, arg)?;
                instance.memory()?.store_le(ea, 4, v)?;
            }

            Operation::MemorySize => {
                stack.push(instance.memory()?.size() as u64);
            }
            Operation::MemoryGrow => {
                let delta = pop(&mut stack)? as u32;
                let old = instance.memory()?.grow(delta);
                stack.push(old.map_or(u32::MAX as u64, |pages| pages as u64));
            }
            Operation::MemoryInit { data_index } => {
                let n = pop(&mut stack)?;
                let src = pop(&mut stack)?;
                let dst = pop(&mut stack)?;
                let data = instance.data_instance(*data_index)?;
                data.with_bytes(|bytes| instance.memory()?.init(dst, bytes, src, n))?;
            }
            Operation::DataDrop { data_index } => {
                instance.data_instance(*data_index)?.drop_bytes();
            }
            Operation::MemoryCopy => {
                let n = pop(&mut stack)?;
                let src = pop(&mut stack)?;
                let dst = pop(&mut stack)?;
                instance.memory()?.copy_within(dst, src, n)?;
            }
            Operation::MemoryFill => {
                let n = pop(&mut stack)?;
                let val = pop(&mut stack)? as u8;
                let dst = pop(&mut stack)?;
                instance.memory()?.fill(dst, val, n)?;
            }

            Operation::TableInit {
                elem_index,
                table_index,
            } => {
                let n = pop(&mut stack)? as u32;
                let src = pop(&mut stack)? as u32;
                let dst = pop(&mut stack)? as u32;
                let elem = instance.element_instance(*elem_index)?;
                let table = instance.table(*table_index)?;
                elem.with_refs(|refs| table.init(dst, refs, src, n))?;
            }
            Operation::ElemDrop { elem_index } => {
                instance.element_instance(*elem_index)?.drop_elems();
            }
            Operation::TableCopy {
                dst_index,
                src_index,
            } => {
                let n = pop(&mut stack)? as u32;
                let src = pop(&mut stack)? as u32;
                let dst = pop(&mut stack)? as u32;
                let dst_table = instance.table(*dst_index)?;
                let src_table = instance.table(*src_index)?;
                // Two indices may alias one imported table; copying within
                // one instance must not take its lock twice.
                if Arc::ptr_eq(&dst_table, &src_table) {
                    dst_table.copy_within(dst, src, n)?;
                } else {
                    dst_table.copy_from(&src_table, dst, src, n)?;
                }
            }
            Operation::TableGet { table_index } => {
                let i = pop(&mut stack)? as u32;
                stack.push(instance.table(*table_index)?.get(i)?);
            }
            Operation::TableSet { table_index } => {
                let v = pop(&mut stack)?;
                let i = pop(&mut stack)? as u32;
                instance.table(*table_index)?.set(i, v)?;
            }
            Operation::TableSize { table_index } => {
                stack.push(instance.table(*table_index)?.size() as u64);
            }
            Operation::TableGrow { table_index } => {
                let delta = pop(&mut stack)? as u32;
                let init = pop(&mut stack)?;
                let old = instance.table(*table_index)?.grow(delta, init);
                stack.push(old.map_or(u32::MAX as u64, |size| size as u64));
            }
            Operation::TableFill { table_index } => {
                let n = pop(&mut stack)? as u32;
                let val = pop(&mut stack)?;
                let i = pop(&mut stack)? as u32;
                instance.table(*table_index)?.fill(i, val, n)?;
            }

            Operation::RefFunc { func_index } => {
                let addr = instance.func(*func_index)?.addr;
                stack.push(Value::FuncRef(Some(addr)).to_raw());
            }
            Operation::RefNull { .. } => stack.push(NULL_REF),
            Operation::RefIsNull => {
                let v = pop(&mut stack)?;
                stack.push((v == NULL_REF) as u64);
            }

            Operation::ConstI32(v) => stack.push(*v as u64),
            Operation::ConstI64(v) => stack.push(*v),
            Operation::ConstF32(bits) => stack.push(*bits as u64),
            Operation::ConstF64(bits) => stack.push(*bits),

            Operation::Eqz(ty) => {
                let v = pop(&mut stack)?;
                let zero = match ty {
                    UnsignedInt::I32 => v as u32 == 0,
                    UnsignedInt::I64 => v == 0,
                };
                stack.push(zero as u64);
            }
            Operation::Eq(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(untyped_eq(*ty, a, b) as u64);
            }
            Operation::Ne(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(!untyped_eq(*ty, a, b) as u64);
            }
            Operation::Lt(ty) => {
                let (a, b) = pop2(&mut stack)?;
                let r = matches!(signed_cmp(*ty, a, b), Some(std::cmp::Ordering::Less));
                stack.push(r as u64);
            }
            Operation::Gt(ty) => {
                let (a, b) = pop2(&mut stack)?;
                let r = matches!(signed_cmp(*ty, a, b), Some(std::cmp::Ordering::Greater));
                stack.push(r as u64);
            }
            Operation::Le(ty) => {
                let (a, b) = pop2(&mut stack)?;
                use std::cmp::Ordering::{Equal, Less};
                let r = matches!(signed_cmp(*ty, a, b), Some(Less | Equal));
                stack.push(r as u64);
            }
            Operation::Ge(ty) => {
                let (a, b) = pop2(&mut stack)?;
                use std::cmp::Ordering::{Equal, Greater};
                let r = matches!(signed_cmp(*ty, a, b), Some(Greater | Equal));
                stack.push(r as u64);
            }

            Operation::Add(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(arith(*ty, a, b, u32::wrapping_add, u64::wrapping_add, |x, y| x + y, |x, y| x + y));
            }
            Operation::Sub(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(arith(*ty, a, b, u32::wrapping_sub, u64::wrapping_sub, |x, y| x - y, |x, y| x - y));
            }
            Operation::Mul(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(arith(*ty, a, b, u32::wrapping_mul, u64::wrapping_mul, |x, y| x * y, |x, y| x * y));
            }
            Operation::Div(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(divide(*ty, a, b)?);
            }
            Operation::Rem(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(remainder(*ty, a, b)?);
            }

            Operation::Clz(ty) => {
                let v = pop(&mut stack)?;
                stack.push(match ty {
                    UnsignedInt::I32 => (v as u32).leading_zeros() as u64,
                    UnsignedInt::I64 => v.leading_zeros() as u64,
                });
            }
            Operation::Ctz(ty) => {
                let v = pop(&mut stack)?;
                stack.push(match ty {
                    UnsignedInt::I32 => (v as u32).trailing_zeros() as u64,
                    UnsignedInt::I64 => v.trailing_zeros() as u64,
                });
            }
            Operation::Popcnt(ty) => {
                let v = pop(&mut stack)?;
                stack.push(match ty {
                    UnsignedInt::I32 => (v as u32).count_ones() as u64,
                    UnsignedInt::I64 => v.count_ones() as u64,
                });
            }

            Operation::And(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(int_bits(*ty, a & b));
            }
            Operation::Or(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(int_bits(*ty, a | b));
            }
            Operation::Xor(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(int_bits(*ty, a ^ b));
            }
            Operation::Shl(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(match ty {
                    UnsignedInt::I32 => ((a as u32) << (b as u32 & 31)) as u64,
                    UnsignedInt::I64 => a << (b & 63),
                });
            }
            Operation::Shr(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(match ty {
                    SignedInt::Int32 => (((a as i32) >> (b as u32 & 31)) as u32) as u64,
                    SignedInt::Uint32 => ((a as u32) >> (b as u32 & 31)) as u64,
                    SignedInt::Int64 => ((a as i64) >> (b & 63)) as u64,
                    SignedInt::Uint64 => a >> (b & 63),
                });
            }
            Operation::Rotl(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(match ty {
                    UnsignedInt::I32 => (a as u32).rotate_left(b as u32 & 31) as u64,
                    UnsignedInt::I64 => a.rotate_left((b & 63) as u32),
                });
            }
            Operation::Rotr(ty) => {
                let (a, b) = pop2(&mut stack)?;
                stack.push(match ty {
                    UnsignedInt::I32 => (a as u32).rotate_right(b as u32 & 31) as u64,
                    UnsignedInt::I64 => a.rotate_right((b & 63) as u32),
                });
            }

            Operation::Abs(ty) => float_unop(&mut stack, *ty, f32::abs, f64::abs)?,
            Operation::Neg(ty) => float_unop(&mut stack, *ty, |x| -x, |x| -x)?,
            Operation::Ceil(ty) => float_unop(&mut stack, *ty, f32::ceil, f64::ceil)?,
            Operation::Floor(ty) => float_unop(&mut stack, *ty, f32::floor, f64::floor)?,
            Operation::Trunc(ty) => float_unop(&mut stack, *ty, f32::trunc, f64::trunc)?,
            Operation::Nearest(ty) => {
                float_unop(&mut stack, *ty, f32::round_ties_even, f64::round_ties_even)?
            }
            Operation::Sqrt(ty) => float_unop(&mut stack, *ty, f32::sqrt, f64::sqrt)?,
            Operation::Min(ty) => float_binop(&mut stack, *ty, fmin32, fmin64)?,
            Operation::Max(ty) => float_binop(&mut stack, *ty, fmax32, fmax64)?,
            Operation::Copysign(ty) => {
                float_binop(&mut stack, *ty, f32::copysign, f64::copysign)?
            }

            Operation::I32WrapFromI64 => {
                let v = pop(&mut stack)?;
                stack.push(v as u32 as u64);
            }
            Operation::ITruncFromF {
                input,
                output,
                non_trapping,
            } => {
                let v = pop(&mut stack)?;
                let x = match input {
                    Float::F32 => f32::from_bits(v as u32) as f64,
                    Float::F64 => f64::from_bits(v),
                };
                stack.push(trunc_float_to_int(x, *output, *non_trapping)?);
            }
            Operation::FConvertFromI { input, output } => {
                let v = pop(&mut stack)?;
                let x = match input {
                    SignedInt::Int32 => v as i32 as f64,
                    SignedInt::Uint32 => v as u32 as f64,
                    SignedInt::Int64 => v as i64 as f64,
                    SignedInt::Uint64 => v as f64,
                };
                stack.push(match output {
                    Float::F32 => {
                        // Convert from the source width directly so rounding
                        // happens once.
                        let f = match input {
                            SignedInt::Int32 => v as i32 as f32,
                            SignedInt::Uint32 => v as u32 as f32,
                            SignedInt::Int64 => v as i64 as f32,
                            SignedInt::Uint64 => v as f32,
                        };
                        f.to_bits() as u64
                    }
                    Float::F64 => x.to_bits(),
                });
            }
            Operation::F32DemoteFromF64 => {
                let v = pop(&mut stack)?;
                stack.push((f64::from_bits(v) as f32).to_bits() as u64);
            }
            Operation::F64PromoteFromF32 => {
                let v = pop(&mut stack)?;
                stack.push((f32::from_bits(v as u32) as f64).to_bits());
            }
            // Reinterpretations are no-ops on the raw slot: the bit pattern
            // is already the value.
            Operation::I32ReinterpretFromF32
            | Operation::I64ReinterpretFromF64
            | Operation::F32ReinterpretFromI32
            | Operation::F64ReinterpretFromI64 => {}

            Operation::ExtendI64FromI32 { signed } => {
                let v = pop(&mut stack)?;
                stack.push(if *signed {
                    v as u32 as i32 as i64 as u64
                } else {
                    v as u32 as u64
                });
            }
            Operation::SignExtend32From8 => {
                let v = pop(&mut stack)?;
                stack.push((v as u8 as i8 as i32) as u32 as u64);
            }
            Operation::SignExtend32From16 => {
                let v = pop(&mut stack)?;
                stack.push((v as u16 as i16 as i32) as u32 as u64);
            }
            Operation::SignExtend64From8 => {
                let v = pop(&mut stack)?;
                stack.push((v as u8 as i8 as i64) as u64);
            }
            Operation::SignExtend64From16 => {
                let v = pop(&mut stack)?;
                stack.push((v as u16 as i16 as i64) as u64);
            }
            Operation::SignExtend64From32 => {
                let v = pop(&mut stack)?;
                stack.push((v as u32 as i32 as i64) as u64);
            }
        }
        pc += 1;
    }
    Err(impl_bug!("function body ran past its return"))
}

/// Apply a branch target: shed the drop range, then jump or return. A
/// backward jump polls the cancellation token.
fn take_branch(
    ctx: &CallCtx,
    func: &InterpFunc,
    stack: &mut Vec<u64>,
    target: &BranchTarget,
    pc: usize,
) -> Result<Option<usize>> {
    if let Some(range) = target.drop {
        drop_range(stack, range)?;
    }
    match target.label {
        None => Ok(None),
        Some(label) => {
            let next = *func
                .labels
                .get(&label)
                .ok_or_else(|| impl_bug!("unresolved label {:?}", label))?;
            if next <= pc {
                ctx.check_cancelled()?;
            }
            Ok(Some(next))
        }
    }
}

fn call_function(
    ctx: &CallCtx,
    engine: &InterpModuleEngine,
    instance: &Arc<ModuleInstance>,
    callee: &Arc<FunctionInstance>,
    stack: &mut Vec<u64>,
    depth: usize,
) -> Result<()> {
    let n = callee.ty.params.len();
    if stack.len() < n {
        return Err(impl_bug!("call with too few stack values"));
    }
    let raw_args = stack.split_off(stack.len() - n);

    match &callee.kind {
        FuncKind::Host(host) => {
            // The host trampoline: decode each slot as its declared type
            // (floats bit-reinterpreted), invoke with the call context, and
            // push the results back as slots.
            let params: Vec<Value> = raw_args
                .iter()
                .zip(callee.ty.params.iter())
                .map(|(r, t)| Value::from_raw(*r, *t))
                .collect();
            let results = call_host(ctx, instance, host, &params)?;
            if results.len() != callee.ty.results.len() {
                return Err(RuntimeError::host(format!(
                    "host function {} returned {} results, expected {}",
                    callee.debug_name,
                    results.len(),
                    callee.ty.results.len()
                )));
            }
            for (v, t) in results.iter().zip(callee.ty.results.iter()) {
                if v.value_type() != *t {
                    return Err(RuntimeError::host(format!(
                        "host function {} returned a {}, expected {}",
                        callee.debug_name,
                        v.value_type(),
                        t
                    )));
                }
                stack.push(v.to_raw());
            }
            Ok(())
        }
        FuncKind::Wasm { module, index } => {
            let owner = module
                .upgrade()
                .ok_or_else(|| RuntimeError::ModuleClosed(callee.debug_name.clone()))?;
            if Arc::ptr_eq(&owner, instance) {
                let ifunc = engine.local_func(*index)?.clone();
                let results = exec_function(ctx, engine, &owner, &ifunc, raw_args, depth + 1)?;
                stack.extend(results);
            } else {
                let params: Vec<Value> = raw_args
                    .iter()
                    .zip(callee.ty.params.iter())
                    .map(|(r, t)| Value::from_raw(*r, *t))
                    .collect();
                let results = owner
                    .engine()?
                    .call_with_depth(ctx, callee, &params, depth + 1)?;
                stack.extend(results.iter().map(|v| v.to_raw()));
            }
            Ok(())
        }
    }
}

fn pop(stack: &mut Vec<u64>) -> Result<u64> {
    stack
        .pop()
        .ok_or_else(|| impl_bug!("value stack underflow"))
}

/// Pop the right then the left operand.
fn pop2(stack: &mut Vec<u64>) -> Result<(u64, u64)> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

/// Remove the slots at depths `start..=end` below the top.
fn drop_range(stack: &mut Vec<u64>, range: InclusiveRange) -> Result<()> {
    let len = stack.len();
    let hi = len
        .checked_sub(range.start as usize)
        .ok_or_else(|| impl_bug!("drop range past the stack bottom"))?;
    let lo = len
        .checked_sub(range.end as usize + 1)
        .ok_or_else(|| impl_bug!("drop range past the stack bottom"))?;
    stack.drain(lo..hi);
    Ok(())
}

fn effective_address(stack: &mut Vec<u64>, arg: &MemArg) -> Result<u64> {
    let base = pop(stack)? as u32;
    Ok(base as u64 + arg.offset as u64)
}

fn extend_loaded(v: u64, bits: u32, ty: SignedInt) -> u64 {
    match ty {
        SignedInt::Uint32 | SignedInt::Uint64 => v,
        SignedInt::Int32 => {
            let shifted = ((v as u32) << (32 - bits)) as i32 >> (32 - bits);
            shifted as u32 as u64
        }
        SignedInt::Int64 => {
            let shifted = ((v) << (64 - bits)) as i64 >> (64 - bits);
            shifted as u64
        }
    }
}

fn untyped_eq(ty: UnsignedType, a: u64, b: u64) -> bool {
    match ty {
        UnsignedType::I32 => a as u32 == b as u32,
        UnsignedType::I64 => a == b,
        UnsignedType::F32 => f32::from_bits(a as u32) == f32::from_bits(b as u32),
        UnsignedType::F64 => f64::from_bits(a) == f64::from_bits(b),
    }
}

fn signed_cmp(ty: SignedType, a: u64, b: u64) -> Option<std::cmp::Ordering> {
    match ty {
        SignedType::Int32 => Some((a as i32).cmp(&(b as i32))),
        SignedType::Uint32 => Some((a as u32).cmp(&(b as u32))),
        SignedType::Int64 => Some((a as i64).cmp(&(b as i64))),
        SignedType::Uint64 => Some(a.cmp(&b)),
        SignedType::Float32 => f32::from_bits(a as u32).partial_cmp(&f32::from_bits(b as u32)),
        SignedType::Float64 => f64::from_bits(a).partial_cmp(&f64::from_bits(b)),
    }
}

fn arith(
    ty: UnsignedType,
    a: u64,
    b: u64,
    i32_op: fn(u32, u32) -> u32,
    i64_op: fn(u64, u64) -> u64,
    f32_op: fn(f32, f32) -> f32,
    f64_op: fn(f64, f64) -> f64,
) -> u64 {
    match ty {
        UnsignedType::I32 => i32_op(a as u32, b as u32) as u64,
        UnsignedType::I64 => i64_op(a, b),
        UnsignedType::F32 => f32_op(f32::from_bits(a as u32), f32::from_bits(b as u32)).to_bits() as u64,
        UnsignedType::F64 => f64_op(f64::from_bits(a), f64::from_bits(b)).to_bits(),
    }
}

fn divide(ty: SignedType, a: u64, b: u64) -> Result<u64> {
    Ok(match ty {
        SignedType::Int32 => {
            let (a, b) = (a as i32, b as i32);
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            check(!(a == i32::MIN && b == -1), TrapKind::IntegerOverflow)?;
            (a / b) as u32 as u64
        }
        SignedType::Uint32 => {
            let (a, b) = (a as u32, b as u32);
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            (a / b) as u64
        }
        SignedType::Int64 => {
            let (a, b) = (a as i64, b as i64);
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            check(!(a == i64::MIN && b == -1), TrapKind::IntegerOverflow)?;
            (a / b) as u64
        }
        SignedType::Uint64 => {
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            a / b
        }
        SignedType::Float32 => {
            (f32::from_bits(a as u32) / f32::from_bits(b as u32)).to_bits() as u64
        }
        SignedType::Float64 => (f64::from_bits(a) / f64::from_bits(b)).to_bits(),
    })
}

fn remainder(ty: SignedInt, a: u64, b: u64) -> Result<u64> {
    Ok(match ty {
        SignedInt::Int32 => {
            let (a, b) = (a as i32, b as i32);
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            a.wrapping_rem(b) as u32 as u64
        }
        SignedInt::Uint32 => {
            let (a, b) = (a as u32, b as u32);
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            (a % b) as u64
        }
        SignedInt::Int64 => {
            let (a, b) = (a as i64, b as i64);
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            a.wrapping_rem(b) as u64
        }
        SignedInt::Uint64 => {
            check(b != 0, TrapKind::IntegerDivideByZero)?;
            a % b
        }
    })
}

fn int_bits(ty: UnsignedInt, v: u64) -> u64 {
    match ty {
        UnsignedInt::I32 => v as u32 as u64,
        UnsignedInt::I64 => v,
    }
}

fn float_unop(
    stack: &mut Vec<u64>,
    ty: Float,
    f32_op: fn(f32) -> f32,
    f64_op: fn(f64) -> f64,
) -> Result<()> {
    let v = pop(stack)?;
    stack.push(match ty {
        Float::F32 => f32_op(f32::from_bits(v as u32)).to_bits() as u64,
        Float::F64 => f64_op(f64::from_bits(v)).to_bits(),
    });
    Ok(())
}

fn float_binop(
    stack: &mut Vec<u64>,
    ty: Float,
    f32_op: fn(f32, f32) -> f32,
    f64_op: fn(f64, f64) -> f64,
) -> Result<()> {
    let (a, b) = pop2(stack)?;
    stack.push(match ty {
        Float::F32 => f32_op(f32::from_bits(a as u32), f32::from_bits(b as u32)).to_bits() as u64,
        Float::F64 => f64_op(f64::from_bits(a), f64::from_bits(b)).to_bits(),
    });
    Ok(())
}

/// min with the WebAssembly NaN and signed-zero rules: any NaN operand
/// yields a canonical NaN, and −0 beats +0.
fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        f32::from_bits(a.to_bits() | b.to_bits())
    } else if a < b {
        a
    } else {
        b
    }
}

fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        f32::from_bits(a.to_bits() & b.to_bits())
    } else if a > b {
        a
    } else {
        b
    }
}

fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        f64::from_bits(a.to_bits() | b.to_bits())
    } else if a < b {
        a
    } else {
        b
    }
}

fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        f64::from_bits(a.to_bits() & b.to_bits())
    } else if a > b {
        a
    } else {
        b
    }
}

/// Truncate a float (already widened to f64) to an integer type, trapping or
/// saturating. Bounds are checked on the truncated value: the boundary the
/// specification draws is representability of trunc(x).
fn trunc_float_to_int(x: f64, output: SignedInt, non_trapping: bool) -> Result<u64> {
    if non_trapping {
        // Rust's saturating float-to-int cast implements exactly the
        // trunc_sat semantics, including NaN to zero.
        return Ok(match output {
            SignedInt::Int32 => (x as i32) as u32 as u64,
            SignedInt::Uint32 => (x as u32) as u64,
            SignedInt::Int64 => (x as i64) as u64,
            SignedInt::Uint64 => x as u64,
        });
    }
    check(!x.is_nan(), TrapKind::InvalidConversionToInteger)?;
    let t = x.trunc();
    Ok(match output {
        SignedInt::Int32 => {
            check(
                (-2147483648.0..=2147483647.0).contains(&t),
                TrapKind::IntegerOverflow,
            )?;
            (t as i32) as u32 as u64
        }
        SignedInt::Uint32 => {
            check((0.0..=4294967295.0).contains(&t), TrapKind::IntegerOverflow)?;
            (t as u32) as u64
        }
        SignedInt::Int64 => {
            check(
                (-9223372036854775808.0..9223372036854775808.0).contains(&t),
                TrapKind::IntegerOverflow,
            )?;
            (t as i64) as u64
        }
        SignedInt::Uint64 => {
            check(
                (0.0..18446744073709551616.0).contains(&t),
                TrapKind::IntegerOverflow,
            )?;
            t as u64
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn min_max_canonicalize_nan_and_order_zeroes() {
        assert!(fmin32(f32::NAN, 1.0).is_nan());
        assert!(fmax64(2.0, f64::NAN).is_nan());
        assert!(fmin32(-0.0, 0.0).is_sign_negative());
        assert!(fmax32(-0.0, 0.0).is_sign_positive());
        assert_eq!(fmin64(1.0, 2.0), 1.0);
        assert_eq!(fmax64(1.0, 2.0), 2.0);
    }

    #[test]
    fn trapping_truncation_boundaries() {
        assert_eq!(
            trunc_float_to_int(-2147483648.9, SignedInt::Int32, false).unwrap(),
            (-2147483648i32) as u32 as u64
        );
        assert!(matches!(
            trunc_float_to_int(2147483648.0, SignedInt::Int32, false)
                .unwrap_err()
                .as_trap(),
            Some(TrapKind::IntegerOverflow)
        ));
        assert!(matches!(
            trunc_float_to_int(f64::NAN, SignedInt::Int32, false)
                .unwrap_err()
                .as_trap(),
            Some(TrapKind::InvalidConversionToInteger)
        ));
        assert_eq!(
            trunc_float_to_int(-0.9, SignedInt::Uint32, false).unwrap(),
            0
        );
    }

    #[test]
    fn saturating_truncation_edges() {
        assert_eq!(
            trunc_float_to_int(f64::INFINITY, SignedInt::Int32, true).unwrap(),
            i32::MAX as u32 as u64
        );
        assert_eq!(
            trunc_float_to_int(f64::NEG_INFINITY, SignedInt::Int32, true).unwrap(),
            i32::MIN as u32 as u64
        );
        assert_eq!(trunc_float_to_int(f64::NAN, SignedInt::Int32, true).unwrap(), 0);
    }

    #[test]
    fn drop_range_removes_a_span_below_the_top() {
        let mut stack = vec![10, 20, 30, 40];
        drop_range(&mut stack, InclusiveRange { start: 1, end: 2 }).unwrap();
        assert_eq!(stack, vec![10, 40]);
        let mut stack = vec![1, 2];
        drop_range(&mut stack, InclusiveRange { start: 0, end: 0 }).unwrap();
        assert_eq!(stack, vec![1]);
    }

    #[test]
    fn sign_extension_of_loaded_bytes() {
        assert_eq!(extend_loaded(0x80, 8, SignedInt::Int32), 0xFFFF_FF80);
        assert_eq!(extend_loaded(0x80, 8, SignedInt::Uint32), 0x80);
        assert_eq!(extend_loaded(0x8000, 16, SignedInt::Int64), 0xFFFF_FFFF_FFFF_8000);
    }
}
