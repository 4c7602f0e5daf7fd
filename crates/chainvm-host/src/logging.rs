//! Logging host function implementation.
//!
//! This module provides the host-side implementation of the logging interface,
//! allowing the runtime to emit structured logs that are captured by the host.

use tracing::{debug, error, info, trace, warn};

use chainvm_core::{Context, FunctionContext, HostFunction, LogLevel, Value, ValueType, args};

use crate::codec::{HostResult, read_arg, return_u32};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Host implementation for the logging interface.
///
/// Guest logs are both:
/// 1. Stored in the [`Context`] for later retrieval
/// 2. Emitted via the `tracing` crate for observability
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    ///
    /// Messages above the configured `max_log_level` are dropped.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The execution context to store logs in
    /// * `level` - The log level
    /// * `target` - The guest-provided target, e.g. `runtime::system`
    /// * `message` - The log message
    pub fn log(ctx: &mut Context, level: LogLevel, target: &str, message: &str) {
        if level as u32 > ctx.config.max_log_level {
            return;
        }

        match level {
            LogLevel::Trace => trace!(guest_log = true, guest_target = target, "{}", message),
            LogLevel::Debug => debug!(guest_log = true, guest_target = target, "{}", message),
            LogLevel::Info => info!(guest_log = true, guest_target = target, "{}", message),
            LogLevel::Warn => warn!(guest_log = true, guest_target = target, "{}", message),
            LogLevel::Error => error!(guest_log = true, guest_target = target, "{}", message),
        }

        ctx.log(level, target, message.to_string());
    }

    /// Debug output from the `ext_misc_print_*` family.
    ///
    /// Printing is a development aid, so it bypasses `max_log_level`.
    pub fn print(ctx: &mut Context, message: &str) {
        debug!(guest_log = true, guest_target = "runtime::print", "{}", message);
        ctx.log(LogLevel::Debug, "runtime::print", message.to_string());
    }
}

fn log(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let level = LogLevel::from_u32(args::u32(args, 0)?);
    let target = read_arg(ctx, args, 1)?;
    let message = read_arg(ctx, args, 2)?;

    LoggingHost::log(
        ctx.context(),
        level,
        &String::from_utf8_lossy(&target),
        &String::from_utf8_lossy(&message),
    );
    Ok(None)
}

fn max_level(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_u32(ctx.context().config.max_log_level)
}

/// Logging functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_logging_log_version_1", &[I32, I64, I64], None, log),
    HostFunction::new("ext_logging_max_level_version_1", &[], Some(I32), max_level),
];
