//! Aggregation builtins.
//!
//! Type selectivity: numeric aggregation considers only numeric values.
//! Booleans and numeric-looking strings coerce when passed as direct
//! arguments but not when found inside a range. Errors in direct arguments
//! propagate first, in argument order; range-borne errors propagate for every
//! function except `COUNT` and `COUNTA`, which skip them.

use sheet_model::{CellError, CellValue, ErrorValue};

use crate::functions::{
    na_error, num_error, scalar_error, ArgValue, FunctionContext, FunctionSpec, RangeValues,
    Volatility, VAR_ARGS,
};

/// Collect the numeric contributions of the argument list under the standard
/// selectivity rules. NaN never contributes.
fn collect_numbers(
    ctx: &dyn FunctionContext,
    args: &[ArgValue],
) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            ArgValue::Scalar(v) => {
                if let CellValue::Error(e) = v {
                    return Err(e.clone());
                }
                if let Some(n) = v.coerce_to_number() {
                    if !n.is_nan() {
                        out.push(n);
                    }
                }
            }
            ArgValue::Range(range) => {
                for value in RangeValues::new(ctx, *range) {
                    match value {
                        CellValue::Error(e) => return Err(e),
                        CellValue::Number(n) if !n.is_nan() => out.push(n),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(out)
}

inventory::submit! {
    FunctionSpec {
        name: "SUM",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: sum,
    }
}

fn sum(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let numbers = match collect_numbers(ctx, args) {
        Ok(numbers) => numbers,
        Err(e) => return CellValue::Error(e),
    };

    let total: f64 = numbers.iter().sum();
    // Shave accumulated binary noise so decimal-looking inputs produce
    // decimal-looking sums (0.1 + 0.2 is 0.3).
    let rounded = format!("{total:.15}").parse().unwrap_or(total);
    CellValue::Number(rounded)
}

inventory::submit! {
    FunctionSpec {
        name: "AVERAGE",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: average,
    }
}

fn average(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let numbers = match collect_numbers(ctx, args) {
        Ok(numbers) => numbers,
        Err(e) => return CellValue::Error(e),
    };

    if numbers.is_empty() {
        return CellValue::Error(CellError::new(ErrorValue::Div0, "division by zero"));
    }
    CellValue::Number(numbers.iter().sum::<f64>() / numbers.len() as f64)
}

inventory::submit! {
    FunctionSpec {
        name: "AVERAGEA",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: average_a,
    }
}

fn average_a(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let mut sum = 0.0;
    let mut count = 0u64;

    // Every non-empty value joins the denominator; only numbers and booleans
    // contribute to the numerator (text counts as 0).
    let mut tally = |value: &CellValue| -> Result<(), CellError> {
        match value {
            CellValue::Error(e) => return Err(e.clone()),
            CellValue::Number(n) => {
                sum += n;
                count += 1;
            }
            CellValue::Bool(b) => {
                if *b {
                    sum += 1.0;
                }
                count += 1;
            }
            CellValue::Text(_) => count += 1,
            CellValue::Empty => {}
        }
        Ok(())
    };

    for arg in args {
        let outcome = match arg {
            ArgValue::Scalar(v) => tally(v),
            ArgValue::Range(range) => {
                RangeValues::new(ctx, *range).try_for_each(|v| tally(&v))
            }
        };
        if let Err(e) = outcome {
            return CellValue::Error(e);
        }
    }

    if count == 0 {
        return CellValue::Error(CellError::new(ErrorValue::Ref, "AVERAGEA has no values"));
    }
    CellValue::Number(sum / count as f64)
}

inventory::submit! {
    FunctionSpec {
        name: "COUNT",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: count,
    }
}

fn count(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let mut total = 0u64;

    for arg in args {
        if let Some(e) = scalar_error(arg) {
            return CellValue::Error(e);
        }

        match arg {
            // Only genuine numbers count; booleans and numeric-looking text
            // do not.
            ArgValue::Scalar(CellValue::Number(_)) => total += 1,
            ArgValue::Scalar(_) => {}
            ArgValue::Range(range) => {
                for value in RangeValues::new(ctx, *range) {
                    // Range-borne errors are skipped, not propagated.
                    if matches!(value, CellValue::Number(_)) {
                        total += 1;
                    }
                }
            }
        }
    }

    CellValue::Number(total as f64)
}

inventory::submit! {
    FunctionSpec {
        name: "COUNTA",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: count_a,
    }
}

fn count_a(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let mut total = 0u64;

    for arg in args {
        if let Some(e) = scalar_error(arg) {
            return CellValue::Error(e);
        }

        match arg {
            ArgValue::Scalar(CellValue::Empty) => {}
            ArgValue::Scalar(_) => total += 1,
            ArgValue::Range(range) => {
                // Everything non-empty counts, errors included.
                for value in RangeValues::new(ctx, *range) {
                    if !value.is_empty() {
                        total += 1;
                    }
                }
            }
        }
    }

    CellValue::Number(total as f64)
}

inventory::submit! {
    FunctionSpec {
        name: "MAX",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: max,
    }
}

fn max(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let numbers = match collect_numbers(ctx, args) {
        Ok(numbers) => numbers,
        Err(e) => return CellValue::Error(e),
    };

    if numbers.is_empty() {
        return CellValue::Number(0.0);
    }
    CellValue::Number(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

inventory::submit! {
    FunctionSpec {
        name: "MIN",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: min,
    }
}

fn min(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let numbers = match collect_numbers(ctx, args) {
        Ok(numbers) => numbers,
        Err(e) => return CellValue::Error(e),
    };

    if numbers.is_empty() {
        return CellValue::Number(0.0);
    }
    CellValue::Number(numbers.iter().copied().fold(f64::INFINITY, f64::min))
}

inventory::submit! {
    FunctionSpec {
        name: "MEDIAN",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: median,
    }
}

fn median(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let mut numbers = match collect_numbers(ctx, args) {
        Ok(numbers) => numbers,
        Err(e) => return CellValue::Error(e),
    };

    if numbers.is_empty() {
        return num_error("MEDIAN has no numeric values");
    }

    numbers.sort_by(f64::total_cmp);
    let mid = numbers.len() / 2;
    if numbers.len() % 2 == 0 {
        CellValue::Number((numbers[mid - 1] + numbers[mid]) / 2.0)
    } else {
        CellValue::Number(numbers[mid])
    }
}

inventory::submit! {
    FunctionSpec {
        name: "MODE",
        min_args: 0,
        max_args: VAR_ARGS,
        volatility: Volatility::NonVolatile,
        implementation: mode,
    }
}

fn mode(ctx: &dyn FunctionContext, args: &[ArgValue]) -> CellValue {
    let numbers = match collect_numbers(ctx, args) {
        Ok(numbers) => numbers,
        Err(e) => return CellValue::Error(e),
    };

    if numbers.is_empty() {
        return num_error("MODE has no numeric values");
    }

    // Key by bit pattern, with -0.0 folded into 0.0 so the two zeros share a
    // bucket.
    let mut frequencies: std::collections::HashMap<u64, (f64, usize)> =
        std::collections::HashMap::new();
    for n in numbers {
        let n = if n == 0.0 { 0.0 } else { n };
        let entry = frequencies.entry(n.to_bits()).or_insert((n, 0));
        entry.1 += 1;
    }

    let max_freq = frequencies.values().map(|&(_, f)| f).max().unwrap_or(0);
    if max_freq <= 1 {
        return na_error("MODE: no value appears more than once");
    }

    // Ties resolve to the smallest value.
    let smallest = frequencies
        .values()
        .filter(|&&(_, f)| f == max_freq)
        .map(|&(n, _)| n)
        .fold(f64::INFINITY, f64::min);
    CellValue::Number(smallest)
}
