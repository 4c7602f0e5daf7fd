//! Wasmtime backend.

use tracing::{debug, warn};
use wasmtime::{
    Caller, Engine, Extern, ExternType, FuncType, Linker, Memory, MemoryType, Module, Store,
    StoreLimits, StoreLimitsBuilder, Val, ValType,
};

use chainvm_common::{EngineConfig, HostError, RuntimeError, Span};

use super::{
    HEAP_BASE_NAME, MEMORY_NAME, Vm, dispatch, extra_heap_pages, grow_failed, heap_base,
    no_memory, record_failure, trap_error,
};
use crate::allocator::HeapAllocator;
use crate::context::Context;
use crate::function::{FunctionContext, HOST_MODULE, HostFunction, HostFunctions, Value, ValueType};
use crate::memory::GuestMemoryMut;

/// Data attached to the Wasmtime store.
pub(crate) struct HostState {
    context: Context,
    memory: Option<Memory>,
    heap_limit: u32,
    limits: StoreLimits,
}

/// A runtime instantiated on Wasmtime.
pub(crate) struct WasmtimeVm {
    store: Store<HostState>,
    instance: wasmtime::Instance,
    memory: Memory,
}

impl WasmtimeVm {
    pub(crate) fn instantiate(
        engine: &Engine,
        module: &Module,
        config: &EngineConfig,
        functions: &HostFunctions,
        context: Context,
    ) -> Result<Self, RuntimeError> {
        let heap_limit = config.heap_limit();
        let limits = StoreLimitsBuilder::new()
            .memory_size(heap_limit as usize)
            .build();
        let mut store = Store::new(
            engine,
            HostState {
                context,
                memory: None,
                heap_limit,
                limits,
            },
        );
        store.limiter(|state| &mut state.limits);

        let mut linker = Linker::new(engine);
        for function in functions.iter() {
            register(&mut linker, engine, *function).map_err(|e| {
                RuntimeError::instantiation(format!("Failed to register {}: {e}", function.name))
            })?;
        }

        if let Some(ty) = imported_memory(module) {
            let memory = Memory::new(&mut store, ty).map_err(|e| {
                RuntimeError::instantiation(format!("Failed to create imported memory: {e}"))
            })?;
            let extra = extra_heap_pages(config, memory.size(&store));
            if let Err(e) = memory.grow(&mut store, extra) {
                warn!(extra_pages = extra, error = %e, "Imported memory could not reserve heap pages");
            }
            linker
                .define(&store, HOST_MODULE, MEMORY_NAME, memory)
                .map_err(|e| RuntimeError::instantiation(e.to_string()))?;
            store.data_mut().memory = Some(memory);
        }

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| RuntimeError::instantiation(e.root_cause().to_string()))?;

        let memory = match store.data().memory {
            Some(memory) => memory,
            None => instance
                .get_memory(&mut store, MEMORY_NAME)
                .ok_or_else(|| RuntimeError::instantiation("runtime has no linear memory"))?,
        };
        store.data_mut().memory = Some(memory);

        let global = instance
            .get_global(&mut store, HEAP_BASE_NAME)
            .and_then(|global| global.get(&mut store).i32());
        let base = heap_base(global, memory.data_size(&store) as u64);
        store.data_mut().context.allocator = HeapAllocator::new(base, heap_limit);

        debug!(
            heap_base = base,
            memory_pages = memory.size(&store),
            "Wasmtime instance ready"
        );

        Ok(Self {
            store,
            instance,
            memory,
        })
    }
}

impl FunctionContext for WasmtimeVm {
    fn split(&mut self) -> (GuestMemoryMut<'_>, &mut Context) {
        let (data, state) = self.memory.data_and_store_mut(&mut self.store);
        (GuestMemoryMut::new(data), &mut state.context)
    }

    fn grow_memory(&mut self, pages: u32) -> Result<(), HostError> {
        let heap_limit = self.store.data().heap_limit;
        self.memory
            .grow(&mut self.store, u64::from(pages))
            .map(|_| ())
            .map_err(|_| grow_failed(pages, heap_limit))
    }
}

impl Vm for WasmtimeVm {
    #[allow(clippy::cast_possible_wrap)]
    fn call_export(&mut self, name: &str, args: Span) -> Result<i64, RuntimeError> {
        let func = self
            .instance
            .get_typed_func::<(i32, i32), i64>(&mut self.store, name)
            .map_err(|_| RuntimeError::missing_export(name))?;

        func.call(&mut self.store, (args.ptr as i32, args.len as i32))
            .map_err(|e| trap_error(&mut self.store.data_mut().context, e.root_cause().to_string()))
    }
}

/// [`FunctionContext`] over the caller of a host function.
struct CallerContext<'a, 'b> {
    caller: &'a mut Caller<'b, HostState>,
    memory: Memory,
}

impl FunctionContext for CallerContext<'_, '_> {
    fn split(&mut self) -> (GuestMemoryMut<'_>, &mut Context) {
        let (data, state) = self.memory.data_and_store_mut(&mut *self.caller);
        (GuestMemoryMut::new(data), &mut state.context)
    }

    fn grow_memory(&mut self, pages: u32) -> Result<(), HostError> {
        let heap_limit = self.caller.data().heap_limit;
        self.memory
            .grow(&mut *self.caller, u64::from(pages))
            .map(|_| ())
            .map_err(|_| grow_failed(pages, heap_limit))
    }
}

fn register(
    linker: &mut Linker<HostState>,
    engine: &Engine,
    function: HostFunction,
) -> wasmtime::Result<()> {
    let ty = FuncType::new(
        engine,
        function.params.iter().copied().map(val_type),
        function.result.map(val_type),
    );

    linker.func_new(HOST_MODULE, function.name, ty, move |mut caller, params, results| {
        let args: Vec<Value> = params.iter().filter_map(to_value).collect();

        let mut memory = caller.data().memory;
        if memory.is_none() {
            memory = caller.get_export(MEMORY_NAME).and_then(Extern::into_memory);
        }
        let Some(memory) = memory else {
            let message = record_failure(&mut caller.data_mut().context, function.name, no_memory());
            return Err(wasmtime::Error::msg(message));
        };

        let mut ctx = CallerContext {
            caller: &mut caller,
            memory,
        };
        match dispatch(&function, &mut ctx, &args) {
            Ok(value) => {
                if let (Some(value), Some(slot)) = (value, results.first_mut()) {
                    *slot = to_val(value);
                }
                Ok(())
            }
            Err(message) => Err(wasmtime::Error::msg(message)),
        }
    })?;

    Ok(())
}

fn imported_memory(module: &Module) -> Option<MemoryType> {
    module.imports().find_map(|import| match import.ty() {
        ExternType::Memory(ty) if import.module() == HOST_MODULE && import.name() == MEMORY_NAME => {
            Some(ty)
        }
        _ => None,
    })
}

fn val_type(ty: ValueType) -> ValType {
    match ty {
        ValueType::I32 => ValType::I32,
        ValueType::I64 => ValType::I64,
    }
}

fn to_value(val: &Val) -> Option<Value> {
    match val {
        Val::I32(v) => Some(Value::I32(*v)),
        Val::I64(v) => Some(Value::I64(*v)),
        _ => None,
    }
}

fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
    }
}
