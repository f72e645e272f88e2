//! Logic builtins.

use sheet_model::CellValue;

use crate::functions::{
    scalar_error, ArgValue, FunctionContext, FunctionSpec, Volatility, VAR_ARGS,
};

fn arg_truthy(arg: &ArgValue) -> bool {
    match arg {
        ArgValue::Scalar(v) => v.is_truthy(),
        ArgValue::Range(_) => true,
    }
}

/// An argument handed back as a function result. Ranges have no scalar
/// meaning outside builtin iteration and land as `Empty`.
fn arg_result(arg: &ArgValue) -> CellValue {
    match arg {
        ArgValue::Scalar(v) => v.clone(),
        ArgValue::Range(_) => CellValue::Empty,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "IF",
        min_args: 2,
        max_args: 3,
        volatility: Volatility::NonVolatile,
        implementation: if_fn,
    }
}

fn if_fn(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    if let Some(e) = scalar_error(&args[0]) {
        return CellValue::Error(e);
    }

    if arg_truthy(&args[0]) {
        return arg_result(&args[1]);
    }
    match args.get(2) {
        Some(other) => arg_result(other),
        None => CellValue::Bool(false),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "AND",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: and,
    }
}

fn and(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    for arg in args {
        if let Some(e) = scalar_error(arg) {
            return CellValue::Error(e);
        }
        if !arg_truthy(arg) {
            return CellValue::Bool(false);
        }
    }
    CellValue::Bool(true)
}

inventory::submit! {
    FunctionSpec {
        name: "OR",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: or,
    }
}

fn or(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    for arg in args {
        if let Some(e) = scalar_error(arg) {
            return CellValue::Error(e);
        }
        if arg_truthy(arg) {
            return CellValue::Bool(true);
        }
    }
    CellValue::Bool(false)
}

inventory::submit! {
    FunctionSpec {
        name: "NOT",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: not,
    }
}

fn not(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    if let Some(e) = scalar_error(&args[0]) {
        return CellValue::Error(e);
    }
    CellValue::Bool(!arg_truthy(&args[0]))
}
