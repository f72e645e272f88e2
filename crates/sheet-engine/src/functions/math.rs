//! Math builtins.

use sheet_model::{CellError, CellValue, ErrorValue};

use crate::functions::{
    arg_number, num_error, scalar_error, value_error, ArgValue, FunctionContext, FunctionSpec,
    Volatility,
};

/// Check the error-first rule, then coerce every argument to a number.
fn numeric_args(name: &str, args: &[ArgValue]) -> Result<Vec<f64>, CellValue> {
    for arg in args {
        if let Some(e) = scalar_error(arg) {
            return Err(CellValue::Error(e));
        }
    }

    args.iter()
        .map(|arg| {
            arg_number(arg).ok_or_else(|| value_error(format!("{name} requires numeric arguments")))
        })
        .collect()
}

inventory::submit! {
    FunctionSpec {
        name: "ABS",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: abs,
    }
}

fn abs(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("ABS", args) {
        Ok(n) => CellValue::Number(n[0].abs()),
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "ROUND",
        min_args: 1,
        max_args: 2,
        volatility: Volatility::NonVolatile,
        implementation: round,
    }
}

fn round(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("ROUND", args) {
        Ok(n) => {
            let places = n.get(1).copied().unwrap_or(0.0);
            let multiplier = 10f64.powf(places);
            CellValue::Number((n[0] * multiplier).round() / multiplier)
        }
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "FLOOR",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: floor,
    }
}

fn floor(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("FLOOR", args) {
        Ok(n) => CellValue::Number(n[0].floor()),
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "CEILING",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: ceiling,
    }
}

fn ceiling(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("CEILING", args) {
        Ok(n) => CellValue::Number(n[0].ceil()),
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "SQRT",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: sqrt,
    }
}

fn sqrt(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("SQRT", args) {
        Ok(n) => {
            if n[0] < 0.0 {
                return num_error("SQRT requires a non-negative argument");
            }
            CellValue::Number(n[0].sqrt())
        }
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "POWER",
        min_args: 2,
        max_args: 2,
        volatility: Volatility::NonVolatile,
        implementation: power,
    }
}

fn power(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("POWER", args) {
        Ok(n) => CellValue::Number(n[0].powf(n[1])),
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "MOD",
        min_args: 2,
        max_args: 2,
        volatility: Volatility::NonVolatile,
        implementation: mod_fn,
    }
}

fn mod_fn(_ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    match numeric_args("MOD", args) {
        Ok(n) => {
            if n[1] == 0.0 {
                return CellValue::Error(CellError::new(ErrorValue::Div0, "division by zero"));
            }
            CellValue::Number(n[0] % n[1])
        }
        Err(e) => e,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "PI",
        min_args: 0,
        max_args: 0,
        volatility: Volatility::NonVolatile,
        implementation: pi,
    }
}

fn pi(_ctx: &dyn FunctionContext, _args: &[ArgValue]) -> CellValue {
    CellValue::Number(std::f64::consts::PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::call_function;
    use crate::functions::testing::*;

    #[test]
    fn rounding_family() {
        let ctx = GridContext::default();
        assert_eq!(call_function(&ctx, "ROUND", &[num(2.567)]), CellValue::Number(3.0));
        assert_eq!(
            call_function(&ctx, "ROUND", &[num(2.567), num(2.0)]),
            CellValue::Number(2.57)
        );
        assert_eq!(call_function(&ctx, "FLOOR", &[num(2.9)]), CellValue::Number(2.0));
        assert_eq!(call_function(&ctx, "CEILING", &[num(2.1)]), CellValue::Number(3.0));
        assert_eq!(call_function(&ctx, "ABS", &[num(-4.0)]), CellValue::Number(4.0));
    }

    #[test]
    fn sqrt_domain() {
        let ctx = GridContext::default();
        assert_eq!(call_function(&ctx, "SQRT", &[num(9.0)]), CellValue::Number(3.0));
        assert_eq!(
            call_function(&ctx, "SQRT", &[num(-1.0)]).error_kind(),
            Some(ErrorValue::Num)
        );
    }

    #[test]
    fn power_and_mod() {
        let ctx = GridContext::default();
        assert_eq!(
            call_function(&ctx, "POWER", &[num(2.0), num(10.0)]),
            CellValue::Number(1024.0)
        );
        assert_eq!(
            call_function(&ctx, "MOD", &[num(7.0), num(3.0)]),
            CellValue::Number(1.0)
        );
        // Result takes the dividend's sign.
        assert_eq!(
            call_function(&ctx, "MOD", &[num(-7.0), num(3.0)]),
            CellValue::Number(-1.0)
        );
        assert_eq!(
            call_function(&ctx, "MOD", &[num(7.0), num(0.0)]).error_kind(),
            Some(ErrorValue::Div0)
        );
    }

    #[test]
    fn pi_is_nullary() {
        let ctx = GridContext::default();
        assert_eq!(
            call_function(&ctx, "PI", &[]),
            CellValue::Number(std::f64::consts::PI)
        );
    }

    #[test]
    fn type_mismatches_are_value_errors() {
        let ctx = GridContext::default();
        assert_eq!(
            call_function(&ctx, "ABS", &[text("abc")]).error_kind(),
            Some(ErrorValue::Value)
        );
        // Coercible direct arguments are fine.
        assert_eq!(call_function(&ctx, "ABS", &[text("-3")]), CellValue::Number(3.0));
        assert_eq!(call_function(&ctx, "ABS", &[boolean(true)]), CellValue::Number(1.0));
        // Errors win over type mismatches.
        assert_eq!(
            call_function(&ctx, "POWER", &[text("abc"), error(ErrorValue::Ref)]).error_kind(),
            Some(ErrorValue::Ref)
        );
    }
}
