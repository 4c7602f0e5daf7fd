//! Engine-independent host function table.
//!
//! A host function is described once by a [`HostFunction`] record: its import
//! name, signature, whether it is a real implementation or a stub, and a plain
//! `fn` handler. Each backend registers the same records with its own linker
//! and hands the handler a [`FunctionContext`] over the calling instance.

use std::fmt;

use tracing::trace;

use chainvm_common::{HostError, Span, StubPolicy, WASM_PAGE_SIZE};

use crate::context::Context;
use crate::memory::{GuestMemory, GuestMemoryMut};

/// Module name every host function is imported from.
pub const HOST_MODULE: &str = "env";

/// Wasm value types used by the runtime interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
}

/// A Wasm value passed across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
}

impl Value {
    /// Type of this value.
    pub fn ty(self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
        }
    }

    /// Wrap an unsigned 32-bit value.
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_u32(value: u32) -> Self {
        Value::I32(value as i32)
    }

    /// Wrap a span.
    pub fn from_span(span: Span) -> Self {
        Value::I64(span.packed())
    }
}

/// Whether a catalogue entry does real work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// Fully implemented.
    Implemented,
    /// Returns a fixed sentinel; see [`StubPolicy`].
    Stub,
}

/// Signature of a host function handler.
pub type Handler = fn(&mut dyn FunctionContext, &[Value]) -> Result<Option<Value>, HostError>;

/// One importable host function.
#[derive(Clone, Copy)]
pub struct HostFunction {
    /// Import name, e.g. `ext_storage_get_version_1`.
    pub name: &'static str,
    /// Parameter types.
    pub params: &'static [ValueType],
    /// Result type, if any.
    pub result: Option<ValueType>,
    /// Implementation status.
    pub support: Support,
    /// The implementation.
    pub handler: Handler,
}

impl HostFunction {
    /// Describe an implemented function.
    pub const fn new(
        name: &'static str,
        params: &'static [ValueType],
        result: Option<ValueType>,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            params,
            result,
            support: Support::Implemented,
            handler,
        }
    }

    /// Describe a stub.
    pub const fn stub(
        name: &'static str,
        params: &'static [ValueType],
        result: Option<ValueType>,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            params,
            result,
            support: Support::Stub,
            handler,
        }
    }

    /// Whether this entry is a stub.
    pub fn is_stub(&self) -> bool {
        self.support == Support::Stub
    }

    /// Check the arguments, apply the stub policy and run the handler.
    ///
    /// Backends call this from their trampolines.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::WrongArgument`] on an arity or type mismatch,
    /// [`HostError::Unsupported`] for a stub under [`StubPolicy::Trap`], and
    /// whatever the handler returns.
    pub fn invoke(
        &self,
        ctx: &mut dyn FunctionContext,
        args: &[Value],
    ) -> Result<Option<Value>, HostError> {
        if args.len() != self.params.len() {
            return Err(HostError::WrongArgument {
                function: self.name.to_string(),
                index: args.len().min(self.params.len()),
            });
        }
        if let Some(index) = args
            .iter()
            .zip(self.params)
            .position(|(arg, ty)| arg.ty() != *ty)
        {
            return Err(HostError::WrongArgument {
                function: self.name.to_string(),
                index,
            });
        }

        if self.is_stub() && ctx.context().config.stub_policy == StubPolicy::Trap {
            return Err(HostError::unsupported(self.name));
        }

        trace!(function = self.name, "Host function called");
        (self.handler)(ctx, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("result", &self.result)
            .field("support", &self.support)
            .finish_non_exhaustive()
    }
}

/// The set of functions offered to the guest.
#[derive(Debug, Clone, Default)]
pub struct HostFunctions {
    functions: Vec<HostFunction>,
}

impl HostFunctions {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function, replacing any previous entry of the same name.
    pub fn register(&mut self, function: HostFunction) -> &mut Self {
        self.functions.retain(|f| f.name != function.name);
        self.functions.push(function);
        self
    }

    /// Add several functions.
    pub fn extend(&mut self, functions: impl IntoIterator<Item = HostFunction>) -> &mut Self {
        for function in functions {
            self.register(function);
        }
        self
    }

    /// Look up a function by import name.
    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Iterate over all functions.
    pub fn iter(&self) -> impl Iterator<Item = &HostFunction> {
        self.functions.iter()
    }

    /// Names of the functions that are stubs.
    pub fn stubs(&self) -> Vec<&'static str> {
        self.functions
            .iter()
            .filter(|f| f.is_stub())
            .map(|f| f.name)
            .collect()
    }

    /// Number of functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Access to the calling instance from inside a host function.
///
/// Backends implement the two required methods; everything else is shared.
pub trait FunctionContext {
    /// Borrow linear memory and the context at the same time.
    fn split(&mut self) -> (GuestMemoryMut<'_>, &mut Context);

    /// Grow linear memory by `pages` Wasm pages.
    ///
    /// # Errors
    ///
    /// Returns an allocation error if the engine refuses to grow.
    fn grow_memory(&mut self, pages: u32) -> Result<(), HostError>;

    /// The execution context.
    fn context(&mut self) -> &mut Context {
        self.split().1
    }

    /// Size of linear memory in bytes.
    fn memory_size(&mut self) -> u64 {
        self.split().0.size() as u64
    }

    /// Copy `len` bytes out of memory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::OutOfBounds`] for a range outside memory.
    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, HostError> {
        let (memory, _) = self.split();
        memory.view().slice(ptr, len).map(<[u8]>::to_vec)
    }

    /// Copy the bytes of a span out of memory.
    fn read_span(&mut self, span: Span) -> Result<Vec<u8>, HostError> {
        self.read(span.ptr, span.len)
    }

    /// Copy `bytes` into memory at `ptr`.
    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), HostError> {
        let (mut memory, _) = self.split();
        memory.write(ptr, bytes)
    }

    /// Allocate `size` bytes on the guest heap, growing memory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Allocation`] when the heap is exhausted.
    fn allocate(&mut self, size: u32) -> Result<u32, HostError> {
        let memory_size = self.memory_size();
        let plan = self.context().allocator.plan(size, memory_size)?;
        if plan.grow_pages > 0 {
            self.grow_memory(plan.grow_pages)?;
        }
        Ok(self.context().allocator.commit(plan))
    }

    /// Release a block obtained from [`allocate`](Self::allocate).
    fn deallocate(&mut self, ptr: u32) -> Result<(), HostError> {
        self.context().allocator.deallocate(ptr)?;
        Ok(())
    }

    /// Allocate a buffer, fill it with `bytes` and return its pointer.
    fn write_pointer(&mut self, bytes: &[u8]) -> Result<u32, HostError> {
        let len = buffer_len(bytes)?;
        let ptr = self.allocate(len)?;
        self.write(ptr, bytes)?;
        Ok(ptr)
    }

    /// Allocate a buffer, fill it with `bytes` and return its span.
    fn write_span(&mut self, bytes: &[u8]) -> Result<Span, HostError> {
        let len = buffer_len(bytes)?;
        let ptr = self.write_pointer(bytes)?;
        Ok(Span::new(ptr, len))
    }
}

/// Read a fixed-size array from memory.
///
/// # Errors
///
/// Returns [`HostError::OutOfBounds`] for a range outside memory.
pub fn read_array<const N: usize>(
    ctx: &mut dyn FunctionContext,
    ptr: u32,
) -> Result<[u8; N], HostError> {
    let (memory, _) = ctx.split();
    GuestMemory::array(&memory.view(), ptr)
}

fn buffer_len(bytes: &[u8]) -> Result<u32, HostError> {
    u32::try_from(bytes.len()).map_err(|_| {
        HostError::Allocation(chainvm_common::AllocationError::RequestTooLarge {
            requested: u32::MAX,
        })
    })
}

/// Number of whole pages covering `bytes`.
pub fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(u64::from(WASM_PAGE_SIZE))
}

/// Typed access to handler arguments.
///
/// Arity and types are checked in [`HostFunction::invoke`], so these only
/// fail when a handler disagrees with its own declared signature.
pub mod args {
    use super::{HostError, Span, Value};

    fn wrong(index: usize) -> HostError {
        HostError::WrongArgument {
            function: "<handler>".to_string(),
            index,
        }
    }

    /// Argument `index` as a span.
    pub fn span(args: &[Value], index: usize) -> Result<Span, HostError> {
        match args.get(index) {
            Some(Value::I64(packed)) => Ok(Span::from_packed(*packed)),
            _ => Err(wrong(index)),
        }
    }

    /// Argument `index` as an unsigned 32-bit value.
    #[allow(clippy::cast_sign_loss)]
    pub fn u32(args: &[Value], index: usize) -> Result<u32, HostError> {
        match args.get(index) {
            Some(Value::I32(v)) => Ok(*v as u32),
            _ => Err(wrong(index)),
        }
    }

    /// Argument `index` as a signed 64-bit value.
    pub fn i64(args: &[Value], index: usize) -> Result<i64, HostError> {
        match args.get(index) {
            Some(Value::I64(v)) => Ok(*v),
            _ => Err(wrong(index)),
        }
    }
}

/// A [`FunctionContext`] over a plain byte vector, for unit tests of handlers.
#[derive(Debug)]
pub struct MemoryContext {
    /// Linear memory.
    pub memory: Vec<u8>,
    /// Execution context.
    pub context: Context,
    /// Largest memory size in pages.
    pub max_pages: u32,
}

impl MemoryContext {
    /// Create a memory of `pages` pages whose heap starts at `heap_base`.
    pub fn new(pages: u32, heap_base: u32, mut context: Context) -> Self {
        let max_pages = 64;
        context.allocator =
            crate::allocator::HeapAllocator::new(heap_base, max_pages * WASM_PAGE_SIZE);
        Self {
            memory: vec![0; (pages * WASM_PAGE_SIZE) as usize],
            context,
            max_pages,
        }
    }
}

impl FunctionContext for MemoryContext {
    fn split(&mut self) -> (GuestMemoryMut<'_>, &mut Context) {
        (GuestMemoryMut::new(&mut self.memory), &mut self.context)
    }

    fn grow_memory(&mut self, pages: u32) -> Result<(), HostError> {
        let new_pages = pages_for(self.memory.len() as u64) + u64::from(pages);
        if new_pages > u64::from(self.max_pages) {
            return Err(HostError::Allocation(
                chainvm_common::AllocationError::OutOfMemory {
                    requested: pages.saturating_mul(WASM_PAGE_SIZE),
                    heap_limit: self.max_pages * WASM_PAGE_SIZE,
                },
            ));
        }
        self.memory
            .resize((new_pages * u64::from(WASM_PAGE_SIZE)) as usize, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(ctx: &mut dyn FunctionContext, args: &[Value]) -> Result<Option<Value>, HostError> {
        let span = args::span(args, 0)?;
        let bytes = ctx.read_span(span)?;
        let out = ctx.write_span(&bytes)?;
        Ok(Some(Value::from_span(out)))
    }

    fn nothing(_: &mut dyn FunctionContext, _: &[Value]) -> Result<Option<Value>, HostError> {
        Ok(Some(Value::I32(0)))
    }

    const ECHO: HostFunction =
        HostFunction::new("echo", &[ValueType::I64], Some(ValueType::I64), echo);
    const STUB: HostFunction = HostFunction::stub("stub", &[], Some(ValueType::I32), nothing);

    #[test]
    fn test_invoke_echo() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());
        ctx.write(16, b"hello").unwrap();

        let result = ECHO
            .invoke(&mut ctx, &[Value::from_span(Span::new(16, 5))])
            .unwrap();
        let Some(Value::I64(packed)) = result else {
            panic!("expected span result");
        };
        let span = Span::from_packed(packed);
        assert_eq!(span.ptr, 1024);
        assert_eq!(ctx.read_span(span).unwrap(), b"hello");
    }

    #[test]
    fn test_invoke_checks_arguments() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());

        let err = ECHO.invoke(&mut ctx, &[]).unwrap_err();
        assert!(matches!(err, HostError::WrongArgument { index: 0, .. }));

        let err = ECHO.invoke(&mut ctx, &[Value::I32(1)]).unwrap_err();
        assert!(matches!(err, HostError::WrongArgument { index: 0, .. }));
    }

    #[test]
    fn test_stub_policy() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());
        assert_eq!(STUB.invoke(&mut ctx, &[]).unwrap(), Some(Value::I32(0)));

        ctx.context.config.stub_policy = StubPolicy::Trap;
        assert_eq!(
            STUB.invoke(&mut ctx, &[]),
            Err(HostError::unsupported("stub"))
        );
    }

    #[test]
    fn test_allocate_grows_memory() {
        let mut ctx = MemoryContext::new(1, WASM_PAGE_SIZE - 16, Context::default());
        let ptr = ctx.allocate(1000).unwrap();

        assert_eq!(ptr, WASM_PAGE_SIZE - 16);
        assert_eq!(ctx.memory.len(), 2 * WASM_PAGE_SIZE as usize);
        ctx.write(ptr, &[1; 1000]).unwrap();
    }

    #[test]
    fn test_host_functions_table() {
        let mut table = HostFunctions::new();
        table.register(ECHO).register(STUB).register(ECHO);

        assert_eq!(table.len(), 2);
        assert!(table.get("echo").is_some());
        assert_eq!(table.stubs(), vec!["stub"]);
    }
}
