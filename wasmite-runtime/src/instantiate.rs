//! Instantiation: binding a compiled module to imports and mutable state.
//!
//! The algorithm is strictly ordered and transactional. The module name is
//! reserved before any heavy work; any failure up to publication releases
//! the reservation and the engine's compiled code, leaving the store as if
//! the attempt never happened.

use {
    crate::{
        call_ctx::CallCtx,
        config::ModuleConfig,
        engine::TableInit,
        error::{InstantiationError, LinkError, Result, RuntimeError},
        features,
        host::HostModuleBuilder,
        impl_bug,
        instance::{
            DataInstance, ElementInstance, ExportInstance, FuncKind, FunctionInstance,
            GlobalInstance, MemoryInstance, ModuleInstance, TableInstance,
        },
        module::{
            types::{ExternKind, FunctionType},
            ConstExpr, ElementMode, ExportDesc, Import, ImportDesc, Module, ModuleId,
        },
        store::{CompiledModule, FuncAddr, FunctionTypeId, Store},
        values::{Value, NULL_REF},
    },
    std::{collections::HashMap, sync::Arc},
    tracing::debug,
};

/// Imports resolved against the store, in module index-space order.
#[derive(Default)]
struct ResolvedImports {
    funcs:   Vec<Arc<FunctionInstance>>,
    tables:  Vec<Arc<TableInstance>>,
    memory:  Option<Arc<MemoryInstance>>,
    globals: Vec<Arc<GlobalInstance>>,
}

impl Store {
    /// Instantiate `compiled` under the configuration's name (falling back
    /// to the module's name section), resolve its imports, run its start
    /// function, then the configured start functions, and publish it.
    pub fn instantiate(
        self: &Arc<Store>,
        compiled: &CompiledModule,
        config: &ModuleConfig,
    ) -> Result<Arc<CallCtx>> {
        let module = compiled.module();
        let sys = config.to_sys_context()?;
        let name = config
            .name
            .clone()
            .or_else(|| module.names.module_name.clone())
            .unwrap_or_default();

        // (1.) Reserve the name before any heavy work.
        self.reserve_name(&name)?;
        let ctx = match self.instantiate_reserved(module, &name, config, sys) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.release_name(&name);
                self.engine.delete_compiled_module(module.id);
                return Err(e);
            }
        };

        // Post-publication: the configured start functions, default
        // `_start`. Functions that are not exported are silently skipped.
        for start in config.start_functions() {
            match ctx.instance().get_export(&start, ExternKind::Func) {
                Ok(export) => {
                    let f = ctx.instance().func(export.index)?;
                    ctx.call_func(&f, &[])?;
                }
                Err(RuntimeError::ExportNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ctx)
    }

    fn instantiate_reserved(
        self: &Arc<Store>,
        module: &Arc<Module>,
        name: &str,
        config: &ModuleConfig,
        sys: crate::sys::SysContext,
    ) -> Result<Arc<CallCtx>> {
        debug!(target: "wasmite::instantiate", name, "instantiating module");
        let bulk = self.features.is_enabled(features::BULK_MEMORY_OPERATIONS);

        // (2.) Intern every type in the module's type section.
        let type_ids = self.intern_types(&module.types)?;

        // (3.) Resolve imports, applying the configured rewrites.
        let rewritten = config.replace_imports(module);
        let import_list = rewritten.as_deref().unwrap_or(&module.imports);
        let resolved = self.resolve_imports(module, import_list)?;

        // Local functions get store addresses up front so constant
        // expressions can encode references to them.
        let addr_base = self.reserve_func_addrs(module.functions.len());
        let imported_funcs = resolved.funcs.len() as u32;

        // (4.) Build tables and stage active element-segment writes. Under
        // 1.0 semantics every destination is checked here, before any write.
        let mut tables = resolved.tables.clone();
        for tt in &module.tables {
            tables.push(Arc::new(TableInstance::new(tt.clone())));
        }
        let mut table_init = Vec::new();
        for elem in &module.elements {
            if let ElementMode::Active {
                table_index,
                offset,
            } = &elem.mode
            {
                let offset =
                    eval_const(offset, &resolved.globals, &resolved.funcs, addr_base, imported_funcs)? as u32;
                let refs = elem
                    .init
                    .iter()
                    .map(|e| eval_const(e, &resolved.globals, &resolved.funcs, addr_base, imported_funcs))
                    .collect::<Result<Vec<u64>>>()?;
                let table = tables
                    .get(*table_index as usize)
                    .cloned()
                    .ok_or_else(|| impl_bug!("no table {}", table_index))?;
                if !bulk
                    && (offset as u64 + refs.len() as u64) > table.size() as u64
                {
                    return Err(InstantiationError::ElementSegmentOutOfBounds.into());
                }
                table_init.push(TableInit {
                    table,
                    offset,
                    refs,
                });
            }
        }

        // (5.) Build globals, evaluating initializers against imported
        // globals only.
        let mut globals = resolved.globals.clone();
        for g in &module.globals {
            let raw = eval_const(&g.init, &resolved.globals, &resolved.funcs, addr_base, imported_funcs)?;
            globals.push(Arc::new(GlobalInstance::new(
                g.global_type.clone(),
                Value::from_raw(raw, g.global_type.value_type),
            )));
        }

        // (6.) Build the memory at its declared min, reserving the
        // configured capacity.
        let memory = match (&resolved.memory, &module.memory) {
            (Some(imported), _) => Some(imported.clone()),
            (None, Some(mt)) => {
                let capacity = self.memory_capacity_for(mt)?;
                Some(Arc::new(MemoryInstance::new(
                    mt.clone(),
                    capacity,
                    self.limit_pages,
                )))
            }
            (None, None) => None,
        };

        // (7.) Function instances: metadata first, creation inside the
        // cyclic assembly below so each local function can hold a back
        // reference to its instance.
        struct LocalFunc {
            ty:         FunctionType,
            type_id:    FunctionTypeId,
            index:      u32,
            addr:       FuncAddr,
            debug_name: String,
        }
        let mut local_funcs = Vec::with_capacity(module.functions.len());
        for (i, ti) in module.functions.iter().enumerate() {
            let ty = module
                .types
                .get(*ti as usize)
                .cloned()
                .ok_or_else(|| impl_bug!("no type {}", ti))?;
            let type_id = *type_ids
                .get(*ti as usize)
                .ok_or_else(|| impl_bug!("no type id {}", ti))?;
            let index = imported_funcs + i as u32;
            local_funcs.push(LocalFunc {
                ty,
                type_id,
                index,
                addr: addr_base + i as u32,
                debug_name: format!("{name}.{}", module.func_desc(index)),
            });
        }

        let mut exports = HashMap::with_capacity(module.exports.len());
        for export in &module.exports {
            let (kind, index) = match export.desc {
                ExportDesc::Func(i) => (ExternKind::Func, i),
                ExportDesc::Table(i) => (ExternKind::Table, i),
                ExportDesc::Memory(i) => (ExternKind::Memory, i),
                ExportDesc::Global(i) => (ExternKind::Global, i),
            };
            exports.insert(export.name.clone(), ExportInstance { kind, index });
        }

        let data_instances: Vec<Arc<DataInstance>> = module
            .data
            .iter()
            .map(|d| Arc::new(DataInstance::new(d.init.clone())))
            .collect();

        // (8.) Assemble the instance and create its engine, the point at
        // which the back-end lowers function bodies and applies the staged
        // table writes.
        let instance = Arc::new_cyclic(|weak| {
            let mut functions = resolved.funcs.clone();
            for lf in local_funcs {
                functions.push(Arc::new(FunctionInstance {
                    kind:       FuncKind::Wasm {
                        module: weak.clone(),
                        index:  lf.index,
                    },
                    ty:         lf.ty,
                    type_id:    lf.type_id,
                    addr:       lf.addr,
                    debug_name: lf.debug_name,
                }));
            }
            ModuleInstance::new(
                name.to_string(),
                module.id,
                module.types.clone(),
                type_ids.clone(),
                functions,
                tables.clone(),
                memory.clone(),
                globals.clone(),
                exports,
                data_instances,
                Arc::downgrade(self),
            )
        });
        for (i, f) in instance.functions[imported_funcs as usize..].iter().enumerate() {
            self.register_func(addr_base + i as u32, f);
        }

        // (10, first half.) Under 1.0 semantics every active data segment
        // destination is validated before any byte is copied.
        let mut data_inits = Vec::new();
        for data in &module.data {
            if let crate::module::DataMode::Active { offset, .. } = &data.mode {
                let offset =
                    eval_const(offset, &resolved.globals, &resolved.funcs, addr_base, imported_funcs)? as u32;
                let mem = memory
                    .as_ref()
                    .ok_or_else(|| impl_bug!("active data segment without memory"))?;
                if !bulk && (offset as u64 + data.init.len() as u64) > mem.byte_len() as u64 {
                    return Err(InstantiationError::DataSegmentOutOfBounds.into());
                }
                data_inits.push((offset, &data.init));
            }
        }

        let engine =
            self.engine
                .new_module_engine(name, module, &instance, &table_init, !bulk)?;
        instance.set_engine(engine);

        // (9.) Passive funcref element segments become element instances;
        // everything else is born empty (dropped).
        let mut element_instances = Vec::with_capacity(module.elements.len());
        for elem in &module.elements {
            let passive_funcref = matches!(elem.mode, ElementMode::Passive)
                && elem.ref_type == crate::module::types::RefType::Func;
            if passive_funcref {
                let refs = elem
                    .init
                    .iter()
                    .map(|e| eval_const(e, &resolved.globals, &resolved.funcs, addr_base, imported_funcs))
                    .collect::<Result<Vec<u64>>>()?;
                element_instances.push(self.engine.create_func_element_instance(refs.into()));
            } else {
                element_instances.push(Arc::new(ElementInstance::default()));
            }
        }
        instance.set_element_instances(element_instances);

        // (10, second half.) Copy active data segments into memory. Under
        // post-1.0 semantics each segment checks its own bounds here.
        for (offset, bytes) in data_inits {
            let mem = instance.memory()?;
            mem.init(offset as u64, bytes, 0, bytes.len() as u64)
                .map_err(|_| InstantiationError::DataSegmentOutOfBounds)?;
        }

        // (11.) Bind the call context.
        let ctx = CallCtx::new(Arc::downgrade(self), instance.clone(), sys);

        // (12.) Run the start section's function.
        if let Some(start) = module.start {
            let f = instance.func(start)?;
            ctx.call_func(&f, &[]).map_err(|e| InstantiationError::Start {
                desc:   module.func_desc(start),
                source: Box::new(e),
            })?;
        }

        // (13.) Publish, making the module visible for import.
        self.publish(ctx.clone());
        debug!(target: "wasmite::instantiate", name, "instantiated module");
        Ok(ctx)
    }

    fn resolve_imports(&self, module: &Module, imports: &[Import]) -> Result<ResolvedImports> {
        let mut resolved = ResolvedImports::default();
        for (index, import) in imports.iter().enumerate() {
            let exporter = self
                .module_instance(&import.module)
                .ok_or_else(|| LinkError::ModuleNotInstantiated(import.module.clone()))?;
            let export = exporter
                .resolve(&import.name)
                .ok_or_else(|| LinkError::ImportNotFound {
                    module: import.module.clone(),
                    name:   import.name.clone(),
                })?;

            let mismatch = |expected: &'static str, actual: ExternKind| {
                LinkError::ImportKindMismatch {
                    index,
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected,
                    actual: actual.name(),
                }
            };

            match &import.desc {
                ImportDesc::Func(ti) => {
                    if export.kind != ExternKind::Func {
                        return Err(mismatch("func", export.kind).into());
                    }
                    let f = exporter.func(export.index)?;
                    let expected = module
                        .types
                        .get(*ti as usize)
                        .ok_or_else(|| impl_bug!("no type {}", ti))?;
                    if *expected != f.ty {
                        return Err(LinkError::SignatureMismatch {
                            index,
                            module: import.module.clone(),
                            name: import.name.clone(),
                            expected: expected.to_string(),
                            actual: f.ty.to_string(),
                        }
                        .into());
                    }
                    resolved.funcs.push(f);
                }
                ImportDesc::Table(expected) => {
                    if export.kind != ExternKind::Table {
                        return Err(mismatch("table", export.kind).into());
                    }
                    let t = exporter.table(export.index)?;
                    if t.table_type.ref_type != expected.ref_type {
                        return Err(LinkError::TableElementTypeMismatch {
                            index,
                            module: import.module.clone(),
                            name: import.name.clone(),
                        }
                        .into());
                    }
                    check_limits(
                        index,
                        import,
                        expected.limits.min,
                        expected.limits.max,
                        t.table_type.limits.min,
                        t.table_type.limits.max,
                    )?;
                    resolved.tables.push(t);
                }
                ImportDesc::Memory(expected) => {
                    if export.kind != ExternKind::Memory {
                        return Err(mismatch("memory", export.kind).into());
                    }
                    let m = exporter.memory()?.clone();
                    check_limits(
                        index,
                        import,
                        expected.limits.min,
                        expected.limits.max,
                        m.mem_type.limits.min,
                        m.mem_type.limits.max,
                    )?;
                    resolved.memory = Some(m);
                }
                ImportDesc::Global(expected) => {
                    if export.kind != ExternKind::Global {
                        return Err(mismatch("global", export.kind).into());
                    }
                    let g = exporter.global(export.index)?;
                    if expected.mutable != g.global_type.mutable {
                        return Err(LinkError::GlobalMutabilityMismatch {
                            index,
                            module: import.module.clone(),
                            name: import.name.clone(),
                            expected: expected.mutable,
                            actual: g.global_type.mutable,
                        }
                        .into());
                    }
                    if expected.value_type != g.global_type.value_type {
                        return Err(LinkError::GlobalTypeMismatch {
                            index,
                            module: import.module.clone(),
                            name: import.name.clone(),
                            expected: expected.value_type.to_string(),
                            actual: g.global_type.value_type.to_string(),
                        }
                        .into());
                    }
                    resolved.globals.push(g);
                }
            }
        }
        Ok(resolved)
    }

    /// Instantiate a module whose functions are all host-provided.
    pub(crate) fn instantiate_host_module(
        self: &Arc<Store>,
        name: String,
        builder: HostModuleBuilder,
    ) -> Result<Arc<CallCtx>> {
        let funcs = builder.into_funcs();
        self.reserve_name(&name)?;
        match self.instantiate_host_reserved(&name, funcs) {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                self.release_name(&name);
                Err(e)
            }
        }
    }

    fn instantiate_host_reserved(
        self: &Arc<Store>,
        name: &str,
        funcs: Vec<(String, crate::host::HostFunc)>,
    ) -> Result<Arc<CallCtx>> {
        let types: Vec<FunctionType> = funcs.iter().map(|(_, f)| f.ty.clone()).collect();
        let type_ids = self.intern_types(&types)?;
        let addr_base = self.reserve_func_addrs(funcs.len());

        let mut functions = Vec::with_capacity(funcs.len());
        let mut exports = HashMap::with_capacity(funcs.len());
        for (i, (fname, host)) in funcs.into_iter().enumerate() {
            exports.insert(
                fname.clone(),
                ExportInstance {
                    kind:  ExternKind::Func,
                    index: i as u32,
                },
            );
            functions.push(Arc::new(FunctionInstance {
                ty:         host.ty.clone(),
                kind:       FuncKind::Host(host),
                type_id:    type_ids[i],
                addr:       addr_base + i as u32,
                debug_name: format!("{name}.{fname}"),
            }));
        }
        let instance = Arc::new(ModuleInstance::new(
            name.to_string(),
            ModuleId::fresh(),
            types,
            type_ids,
            functions,
            Vec::new(),
            None,
            Vec::new(),
            exports,
            Vec::new(),
            Arc::downgrade(self),
        ));
        for (i, f) in instance.functions.iter().enumerate() {
            self.register_func(addr_base + i as u32, f);
        }
        let ctx = CallCtx::new(
            Arc::downgrade(self),
            instance,
            crate::sys::SysContext::default(),
        );
        self.publish(ctx.clone());
        Ok(ctx)
    }
}

/// Evaluate a constant expression to its 64-bit slot value. `global.get`
/// resolves against imported globals only; `ref.func` encodes the already
/// reserved store address of the target function.
fn eval_const(
    expr: &ConstExpr,
    imported_globals: &[Arc<GlobalInstance>],
    imported_funcs: &[Arc<FunctionInstance>],
    local_addr_base: FuncAddr,
    imported_func_count: u32,
) -> Result<u64> {
    Ok(match expr {
        ConstExpr::I32(v) => *v as u32 as u64,
        ConstExpr::I64(v) => *v as u64,
        ConstExpr::F32(bits) => *bits as u64,
        ConstExpr::F64(bits) => *bits,
        ConstExpr::GlobalGet(i) => imported_globals
            .get(*i as usize)
            .ok_or_else(|| impl_bug!("constant expression global {} not imported", i))?
            .raw(),
        ConstExpr::RefNull(_) => NULL_REF,
        ConstExpr::RefFunc(i) => {
            let addr = if *i < imported_func_count {
                imported_funcs
                    .get(*i as usize)
                    .ok_or_else(|| impl_bug!("no imported function {}", i))?
                    .addr
            } else {
                local_addr_base + (*i - imported_func_count)
            };
            Value::FuncRef(Some(addr)).to_raw()
        }
    })
}

fn check_limits(
    index: usize,
    import: &Import,
    expected_min: u32,
    expected_max: Option<u32>,
    actual_min: u32,
    actual_max: Option<u32>,
) -> Result<()> {
    if expected_min > actual_min {
        return Err(LinkError::MinSizeMismatch {
            index,
            module: import.module.clone(),
            name: import.name.clone(),
            expected: expected_min,
            actual: actual_min,
        }
        .into());
    }
    if let Some(expected) = expected_max {
        match actual_max {
            None => {
                return Err(LinkError::MissingMax {
                    index,
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected,
                }
                .into())
            }
            Some(actual) if actual > expected => {
                return Err(LinkError::MaxSizeMismatch {
                    index,
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected,
                    actual,
                }
                .into())
            }
            Some(_) => {}
        }
    }
    Ok(())
}
