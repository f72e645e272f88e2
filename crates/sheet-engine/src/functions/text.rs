//! Text builtins.

use sheet_model::CellValue;

use crate::functions::{
    scalar_error, value_error, ArgValue, FunctionContext, FunctionSpec, Volatility, VAR_ARGS,
};

/// The textual form of a direct argument. Ranges have no single textual
/// form.
fn arg_text(arg: &ArgValue) -> Option<String> {
    match arg {
        ArgValue::Scalar(v) => Some(v.coerce_to_text()),
        ArgValue::Range(_) => None,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "CONCATENATE",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: concatenate,
    }
}

fn concatenate(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let mut out = String::new();
    for arg in args {
        if let Some(e) = scalar_error(arg) {
            return CellValue::Error(e);
        }
        match arg_text(arg) {
            Some(s) => out.push_str(&s),
            None => return value_error("CONCATENATE requires text values"),
        }
    }
    CellValue::Text(out)
}

inventory::submit! {
    FunctionSpec {
        name: "LEN",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: len,
    }
}

fn len(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    if let Some(e) = scalar_error(&args[0]) {
        return CellValue::Error(e);
    }
    match arg_text(&args[0]) {
        Some(s) => CellValue::Number(s.len() as f64),
        None => value_error("LEN requires a text value"),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "UPPER",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: upper,
    }
}

fn upper(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    if let Some(e) = scalar_error(&args[0]) {
        return CellValue::Error(e);
    }
    match arg_text(&args[0]) {
        Some(s) => CellValue::Text(s.to_uppercase()),
        None => value_error("UPPER requires a text value"),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "LOWER",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: lower,
    }
}

fn lower(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    if let Some(e) = scalar_error(&args[0]) {
        return CellValue::Error(e);
    }
    match arg_text(&args[0]) {
        Some(s) => CellValue::Text(s.to_lowercase()),
        None => value_error("LOWER requires a text value"),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "TRIM",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: trim,
    }
}

fn trim(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    if let Some(e) = scalar_error(&args[0]) {
        return CellValue::Error(e);
    }
    match arg_text(&args[0]) {
        Some(s) => CellValue::Text(s.trim().to_string()),
        None => value_error("TRIM requires a text value"),
    }
}
