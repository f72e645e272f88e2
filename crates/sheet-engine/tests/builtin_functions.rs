//! Builtin coverage through the full formula surface.

mod common;

use common::{get_number, sheet};
use pretty_assertions::assert_eq;
use sheet_engine::{CellValue, ErrorValue, Spreadsheet};

fn eval(sheet: &mut Spreadsheet, formula: &str) -> CellValue {
    sheet.set("Sheet1!Z99", formula).unwrap();
    sheet.calculate().unwrap();
    sheet.get("Sheet1!Z99").unwrap()
}

#[test]
fn aggregation_over_ranges() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", 10.0).unwrap();
    sheet.set("Sheet1!A2", 20.0).unwrap();
    sheet.set("Sheet1!A3", 30.0).unwrap();
    sheet.set("Sheet1!A4", "note").unwrap();
    sheet.set("Sheet1!A5", true).unwrap();

    assert_eq!(eval(&mut sheet, "=SUM(A1:A5)"), CellValue::Number(60.0));
    assert_eq!(eval(&mut sheet, "=AVERAGE(A1:A5)"), CellValue::Number(20.0));
    assert_eq!(eval(&mut sheet, "=MAX(A1:A5)"), CellValue::Number(30.0));
    assert_eq!(eval(&mut sheet, "=MIN(A1:A5)"), CellValue::Number(10.0));
    assert_eq!(eval(&mut sheet, "=COUNT(A1:A5)"), CellValue::Number(3.0));
    assert_eq!(eval(&mut sheet, "=COUNTA(A1:A5)"), CellValue::Number(5.0));
    assert_eq!(eval(&mut sheet, "=MEDIAN(A1:A3)"), CellValue::Number(20.0));

    // AVERAGEA folds the text and boolean into the denominator:
    // (10+20+30+0+1) / 5.
    assert_eq!(eval(&mut sheet, "=AVERAGEA(A1:A5)"), CellValue::Number(12.2));

    // Direct arguments and ranges can mix.
    assert_eq!(
        eval(&mut sheet, "=SUM(A1:A3, 40, \"50\")"),
        CellValue::Number(150.0)
    );
}

#[test]
fn mode_and_median_edge_cases() {
    let mut sheet = sheet();
    sheet.set("Sheet1!B1", 5.0).unwrap();
    sheet.set("Sheet1!B2", 3.0).unwrap();
    sheet.set("Sheet1!B3", 5.0).unwrap();
    sheet.set("Sheet1!B4", 3.0).unwrap();
    sheet.set("Sheet1!B5", 1.0).unwrap();

    // Tie between 3 and 5: the smallest wins.
    assert_eq!(eval(&mut sheet, "=MODE(B1:B5)"), CellValue::Number(3.0));

    assert_eq!(
        eval(&mut sheet, "=MODE(1, 2, 3)").error_kind(),
        Some(ErrorValue::NA)
    );
    assert_eq!(
        eval(&mut sheet, "=MEDIAN(C1:C9)").error_kind(),
        Some(ErrorValue::Num)
    );
    assert_eq!(eval(&mut sheet, "=MEDIAN(1, 2, 3, 4)"), CellValue::Number(2.5));
}

#[test]
fn logic_functions() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", 5.0).unwrap();

    assert_eq!(
        eval(&mut sheet, r#"=IF(A1>3, "big", "small")"#),
        CellValue::Text("big".into())
    );
    assert_eq!(
        eval(&mut sheet, r#"=IF(A1>10, "big", "small")"#),
        CellValue::Text("small".into())
    );
    assert_eq!(eval(&mut sheet, "=IF(A1>10, 1)"), CellValue::Bool(false));
    assert_eq!(eval(&mut sheet, "=AND(A1>0, A1<10)"), CellValue::Bool(true));
    assert_eq!(eval(&mut sheet, "=OR(A1>10, A1<0)"), CellValue::Bool(false));
    assert_eq!(eval(&mut sheet, "=NOT(A1=5)"), CellValue::Bool(false));

    // Nested conditionals.
    sheet.set("Sheet1!A2", -5.0).unwrap();
    assert_eq!(
        eval(
            &mut sheet,
            r#"=IF(A2<0, "ERROR: Negative", IF(A2>100, "ERROR: Too large", "OK"))"#
        ),
        CellValue::Text("ERROR: Negative".into())
    );
}

#[test]
fn text_functions() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", "world").unwrap();

    assert_eq!(
        eval(&mut sheet, r#"=CONCATENATE("hello ", A1, "!")"#),
        CellValue::Text("hello world!".into())
    );
    assert_eq!(
        eval(&mut sheet, r#"=CONCATENATE("n=", 5, " ", TRUE)"#),
        CellValue::Text("n=5 true".into())
    );
    assert_eq!(eval(&mut sheet, r#"=LEN("hello")"#), CellValue::Number(5.0));
    assert_eq!(eval(&mut sheet, "=LEN(A1)"), CellValue::Number(5.0));
    assert_eq!(
        eval(&mut sheet, r#"=UPPER("mixed Case")"#),
        CellValue::Text("MIXED CASE".into())
    );
    assert_eq!(
        eval(&mut sheet, r#"=LOWER("MIXED Case")"#),
        CellValue::Text("mixed case".into())
    );
    assert_eq!(
        eval(&mut sheet, r#"=TRIM("  spaced  ")"#),
        CellValue::Text("spaced".into())
    );

    // The concatenation operator agrees with CONCATENATE.
    assert_eq!(
        eval(&mut sheet, r#"="a" & "b" & 1"#),
        CellValue::Text("ab1".into())
    );
}

#[test]
fn math_functions() {
    let mut sheet = sheet();

    assert_eq!(eval(&mut sheet, "=ABS(-4.5)"), CellValue::Number(4.5));
    assert_eq!(eval(&mut sheet, "=ROUND(2.567, 2)"), CellValue::Number(2.57));
    assert_eq!(eval(&mut sheet, "=ROUND(2.5)"), CellValue::Number(3.0));
    assert_eq!(eval(&mut sheet, "=FLOOR(2.9)"), CellValue::Number(2.0));
    assert_eq!(eval(&mut sheet, "=CEILING(2.1)"), CellValue::Number(3.0));
    assert_eq!(eval(&mut sheet, "=SQRT(16)"), CellValue::Number(4.0));
    assert_eq!(
        eval(&mut sheet, "=SQRT(-1)").error_kind(),
        Some(ErrorValue::Num)
    );
    assert_eq!(eval(&mut sheet, "=POWER(2, 8)"), CellValue::Number(256.0));
    assert_eq!(eval(&mut sheet, "=MOD(10, 3)"), CellValue::Number(1.0));
    assert_eq!(
        eval(&mut sheet, "=MOD(10, 0)").error_kind(),
        Some(ErrorValue::Div0)
    );

    let pi = eval(&mut sheet, "=PI()");
    assert!((common::number(&pi) - std::f64::consts::PI).abs() < 1e-15);
    assert_eq!(
        eval(&mut sheet, "=PI(1)").error_kind(),
        Some(ErrorValue::NA)
    );
}

#[test]
fn unknown_functions_are_name_errors() {
    let mut sheet = sheet();
    assert_eq!(
        eval(&mut sheet, "=DEFINITELYNOTAFUNCTION(1)").error_kind(),
        Some(ErrorValue::Name)
    );
}

#[test]
fn error_first_argument_policy() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", "=1/0").unwrap();
    sheet.set("Sheet1!A2", "=SQRT(-1)").unwrap();

    // The first error in argument order wins.
    assert_eq!(
        eval(&mut sheet, "=SUM(A1, A2)").error_kind(),
        Some(ErrorValue::Div0)
    );
    assert_eq!(
        eval(&mut sheet, "=SUM(A2, A1)").error_kind(),
        Some(ErrorValue::Num)
    );
    // IF hands branch errors through as values.
    assert_eq!(
        eval(&mut sheet, "=IF(TRUE, A1, 1)").error_kind(),
        Some(ErrorValue::Div0)
    );
}

#[test]
fn financial_style_compound_expression() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", 1000.0).unwrap();
    sheet.set("Sheet1!A2", 0.05).unwrap();
    sheet.set("Sheet1!A3", 12.0).unwrap();
    sheet.set("Sheet1!B1", "=A1*(1+A2/A3)^(A3*2)").unwrap();

    sheet.calculate().unwrap();
    let b1 = get_number(&sheet, "Sheet1!B1");
    assert!((b1 - 1104.9413355583).abs() < 1e-6, "got {b1}");
}

#[test]
fn conditional_aggregation() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", 10.0).unwrap();
    sheet.set("Sheet1!A2", 20.0).unwrap();
    sheet.set("Sheet1!A3", 30.0).unwrap();
    sheet.set("Sheet1!A4", 40.0).unwrap();

    assert_eq!(
        eval(
            &mut sheet,
            "=IF(SUM(A1:A4)>50, AVERAGE(A1:A4), MAX(A1:A4))"
        ),
        CellValue::Number(25.0)
    );
}

#[test]
fn rolling_averages() {
    let mut sheet = sheet();
    for (row, value) in [(1, 10.0), (2, 20.0), (3, 30.0), (4, 40.0), (5, 50.0)] {
        sheet.set(&format!("Sheet1!A{row}"), value).unwrap();
    }
    sheet.set("Sheet1!B3", "=AVERAGE(A1:A3)").unwrap();
    sheet.set("Sheet1!B4", "=AVERAGE(A2:A4)").unwrap();
    sheet.set("Sheet1!B5", "=AVERAGE(A3:A5)").unwrap();

    sheet.calculate().unwrap();
    assert_eq!(get_number(&sheet, "Sheet1!B3"), 20.0);
    assert_eq!(get_number(&sheet, "Sheet1!B4"), 30.0);
    assert_eq!(get_number(&sheet, "Sheet1!B5"), 40.0);
}

#[test]
fn formula_results_feed_other_aggregates() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", 3.0).unwrap();
    sheet.set("Sheet1!A2", "=A1*2").unwrap();
    sheet.set("Sheet1!A3", "=A2*2").unwrap();
    sheet.set("Sheet1!B1", "=SUM(A1:A3)").unwrap();

    sheet.calculate().unwrap();
    // 3 + 6 + 12: the range observed the freshly computed results.
    assert_eq!(get_number(&sheet, "Sheet1!B1"), 21.0);
}
