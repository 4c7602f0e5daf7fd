//! wasmi backend.
//!
//! Mirrors the Wasmtime backend on top of the wasmi interpreter, so both
//! produce the same results for the same runtime.

use tracing::{debug, warn};
use wasmi::core::ValType;
use wasmi::{
    Caller, Engine, Extern, ExternType, FuncType, Linker, Memory, MemoryType, Module, Store,
    StoreLimits, StoreLimitsBuilder, Val,
};

use chainvm_common::{EngineConfig, HostError, RuntimeError, Span, WASM_PAGE_SIZE};

use super::{
    HEAP_BASE_NAME, MEMORY_NAME, Vm, dispatch, extra_heap_pages, grow_failed, heap_base,
    no_memory, record_failure, trap_error,
};
use crate::allocator::HeapAllocator;
use crate::context::Context;
use crate::function::{FunctionContext, HOST_MODULE, HostFunction, HostFunctions, Value, ValueType};
use crate::memory::GuestMemoryMut;

/// Data attached to the wasmi store.
pub(crate) struct HostState {
    context: Context,
    memory: Option<Memory>,
    heap_limit: u32,
    limits: StoreLimits,
}

/// A runtime instantiated on wasmi.
pub(crate) struct WasmiVm {
    store: Store<HostState>,
    instance: wasmi::Instance,
    memory: Memory,
}

impl WasmiVm {
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
            register(&mut linker, *function).map_err(|e| {
                RuntimeError::instantiation(format!("Failed to register {}: {e}", function.name))
            })?;
        }

        if let Some(ty) = imported_memory(module) {
            let memory = Memory::new(&mut store, ty).map_err(|e| {
                RuntimeError::instantiation(format!("Failed to create imported memory: {e}"))
            })?;
            let extra = extra_heap_pages(config, pages_of(&memory, &store));
            if let Err(e) = memory.grow(&mut store, extra as u32) {
                warn!(extra_pages = extra, error = %e, "Imported memory could not reserve heap pages");
            }
            linker
                .define(HOST_MODULE, MEMORY_NAME, memory)
                .map_err(|e| RuntimeError::instantiation(e.to_string()))?;
            store.data_mut().memory = Some(memory);
        }

        let instance = linker
            .instantiate(&mut store, module)
            .and_then(|pre| pre.start(&mut store))
            .map_err(|e| RuntimeError::instantiation(e.to_string()))?;

        let memory = match store.data().memory {
            Some(memory) => memory,
            None => instance
                .get_memory(&store, MEMORY_NAME)
                .ok_or_else(|| RuntimeError::instantiation("runtime has no linear memory"))?,
        };
        store.data_mut().memory = Some(memory);

        let global = instance
            .get_global(&store, HEAP_BASE_NAME)
            .and_then(|global| match global.get(&store) {
                Val::I32(base) => Some(base),
                _ => None,
            });
        let base = heap_base(global, memory.data(&store).len() as u64);
        store.data_mut().context.allocator = HeapAllocator::new(base, heap_limit);

        debug!(
            heap_base = base,
            memory_pages = pages_of(&memory, &store),
            "wasmi instance ready"
        );

        Ok(Self {
            store,
            instance,
            memory,
        })
    }
}

impl FunctionContext for WasmiVm {
    fn split(&mut self) -> (GuestMemoryMut<'_>, &mut Context) {
        let (data, state) = self.memory.data_and_store_mut(&mut self.store);
        (GuestMemoryMut::new(data), &mut state.context)
    }

    fn grow_memory(&mut self, pages: u32) -> Result<(), HostError> {
        let heap_limit = self.store.data().heap_limit;
        self.memory
            .grow(&mut self.store, pages)
            .map(|_| ())
            .map_err(|_| grow_failed(pages, heap_limit))
    }
}

impl Vm for WasmiVm {
    #[allow(clippy::cast_possible_wrap)]
    fn call_export(&mut self, name: &str, args: Span) -> Result<i64, RuntimeError> {
        let func = self
            .instance
            .get_typed_func::<(i32, i32), i64>(&self.store, name)
            .map_err(|_| RuntimeError::missing_export(name))?;

        func.call(&mut self.store, (args.ptr as i32, args.len as i32))
            .map_err(|e| trap_error(&mut self.store.data_mut().context, e.to_string()))
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
            .grow(&mut *self.caller, pages)
            .map(|_| ())
            .map_err(|_| grow_failed(pages, heap_limit))
    }
}

fn register(linker: &mut Linker<HostState>, function: HostFunction) -> Result<(), wasmi::Error> {
    let ty = FuncType::new(
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
            return Err(wasmi::Error::new(message));
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
            Err(message) => Err(wasmi::Error::new(message)),
        }
    })?;

    Ok(())
}

fn imported_memory(module: &Module) -> Option<MemoryType> {
    module.imports().find_map(|import| match import.ty() {
        ExternType::Memory(ty) if import.module() == HOST_MODULE && import.name() == MEMORY_NAME => {
            Some(*ty)
        }
        _ => None,
    })
}

fn pages_of(memory: &Memory, store: &Store<HostState>) -> u64 {
    memory.data(store).len() as u64 / u64::from(WASM_PAGE_SIZE)
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
