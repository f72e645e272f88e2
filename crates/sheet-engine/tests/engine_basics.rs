//! Basic API behavior: literal round-trips, addressing, error storage, and
//! intern bookkeeping.

mod common;

use common::{get_number, sheet};
use pretty_assertions::assert_eq;
use sheet_engine::{CellValue, ErrorCode, ErrorValue};

#[test]
fn literal_round_trips() {
    let mut sheet = sheet();

    sheet.set("Sheet1!A1", 42.0).unwrap();
    sheet.set("Sheet1!A2", "plain text").unwrap();
    sheet.set("Sheet1!A3", true).unwrap();

    assert_eq!(sheet.get("Sheet1!A1").unwrap(), CellValue::Number(42.0));
    assert_eq!(
        sheet.get("Sheet1!A2").unwrap(),
        CellValue::Text("plain text".into())
    );
    assert_eq!(sheet.get("Sheet1!A3").unwrap(), CellValue::Bool(true));

    // Addresses are case-insensitive in the column letters.
    assert_eq!(sheet.get("Sheet1!a1").unwrap(), CellValue::Number(42.0));

    sheet.remove("Sheet1!A1").unwrap();
    assert_eq!(sheet.get("Sheet1!A1").unwrap(), CellValue::Empty);
}

#[test]
fn set_text_routes_through_the_value_grammars() {
    let mut sheet = sheet();

    sheet.set_text("Sheet1!A1", "42").unwrap();
    sheet.set_text("Sheet1!A2", "-2.5").unwrap();
    sheet.set_text("Sheet1!A3", "true").unwrap();
    sheet.set_text("Sheet1!A4", r#""quoted""#).unwrap();
    sheet.set_text("Sheet1!A5", "just words").unwrap();
    sheet.set_text("Sheet1!A6", "=1+1").unwrap();

    assert_eq!(sheet.get("Sheet1!A1").unwrap(), CellValue::Number(42.0));
    assert_eq!(sheet.get("Sheet1!A2").unwrap(), CellValue::Number(-2.5));
    assert_eq!(sheet.get("Sheet1!A3").unwrap(), CellValue::Bool(true));
    assert_eq!(
        sheet.get("Sheet1!A4").unwrap(),
        CellValue::Text("quoted".into())
    );
    assert_eq!(
        sheet.get("Sheet1!A5").unwrap(),
        CellValue::Text("just words".into())
    );

    sheet.calculate().unwrap();
    assert_eq!(get_number(&sheet, "Sheet1!A6"), 2.0);
}

#[test]
fn unknown_worksheets() {
    let mut sheet = sheet();

    // Reading through an unknown worksheet yields a #VALUE! error value,
    // not an application error.
    assert_eq!(
        sheet.get("Nowhere!A1").unwrap().error_kind(),
        Some(ErrorValue::Value)
    );

    // Writing is host misuse.
    let err = sheet.set("Nowhere!A1", 1.0).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    // Unqualified addresses have no worksheet to land on.
    let err = sheet.set("A1", 1.0).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    // Removal is a silent no-op.
    sheet.remove("Nowhere!A1").unwrap();
}

#[test]
fn malformed_addresses_are_invalid_arguments() {
    let mut sheet = sheet();

    for address in ["", "123", "Sheet1!", "Sheet1!12", "!!", "Sheet1!A0"] {
        let err = sheet.set(address, 1.0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument, "{address:?}");
    }
}

#[test]
fn formula_text_failures_are_stored_as_error_values() {
    let mut sheet = sheet();

    // Lexer and parser failures both land in the cell as #VALUE!.
    for (address, formula) in [
        ("Sheet1!A1", "="),
        ("Sheet1!A2", "=SUM("),
        ("Sheet1!A3", "=A1:"),
        ("Sheet1!A4", r#"="open"#),
        ("Sheet1!A5", "=1 2"),
        ("Sheet1!A6", "=1+"),
    ] {
        sheet.set(address, formula).unwrap();
        assert_eq!(
            sheet.get(address).unwrap().error_kind(),
            Some(ErrorValue::Value),
            "{formula}"
        );
    }

    // A cross-worksheet range attempt is the one parse failure stored as
    // #REF!.
    sheet.set("Sheet1!B1", "=Sheet1!A1:Sheet2!B2").unwrap();
    assert_eq!(
        sheet.get("Sheet1!B1").unwrap().error_kind(),
        Some(ErrorValue::Ref)
    );
}

#[test]
fn formula_source_survives_as_its_evaluated_kinds() {
    let mut sheet = sheet();

    sheet.set("Sheet1!A1", "=1+2").unwrap();
    sheet.set("Sheet1!A2", r#"="hello""#).unwrap();
    sheet.set("Sheet1!A3", "=true").unwrap();
    sheet.set("Sheet1!A4", "=1/0").unwrap();
    sheet.calculate().unwrap();

    assert_eq!(sheet.get("Sheet1!A1").unwrap(), CellValue::Number(3.0));
    assert_eq!(
        sheet.get("Sheet1!A2").unwrap(),
        CellValue::Text("hello".into())
    );
    assert_eq!(sheet.get("Sheet1!A3").unwrap(), CellValue::Bool(true));
    assert_eq!(
        sheet.get("Sheet1!A4").unwrap().error_kind(),
        Some(ErrorValue::Div0)
    );
}

#[test]
fn identical_formula_trees_share_one_interned_id() {
    let mut sheet = sheet();

    sheet.set("Sheet1!B1", "=A1*2").unwrap();
    // Same tree: the reference offsets match even though the text differs.
    sheet.set("Sheet1!B2", "=A2*2").unwrap();
    assert_eq!(sheet.formula_table().count(), 1);

    // A different tree interns separately.
    sheet.set("Sheet1!B3", "=A3*3").unwrap();
    assert_eq!(sheet.formula_table().count(), 2);

    // Whitespace is insignificant to the canonical key.
    sheet.set("Sheet1!B4", "= A4 * 2").unwrap();
    assert_eq!(sheet.formula_table().count(), 2);
}

#[test]
fn interned_formulas_are_released_eagerly() {
    let mut sheet = sheet();

    sheet.set("Sheet1!C1", "=1+1").unwrap();
    sheet.set("Sheet1!C2", "=1+1").unwrap();
    assert_eq!(sheet.formula_table().count(), 1);

    sheet.remove("Sheet1!C1").unwrap();
    assert_eq!(sheet.formula_table().count(), 1);

    sheet.remove("Sheet1!C2").unwrap();
    assert_eq!(sheet.formula_table().count(), 0);

    // Replacing a formula with a literal also releases it.
    sheet.set("Sheet1!C3", "=2+2").unwrap();
    assert_eq!(sheet.formula_table().count(), 1);
    sheet.set("Sheet1!C3", 4.0).unwrap();
    assert_eq!(sheet.formula_table().count(), 0);
}

#[test]
fn interned_strings_are_released_eagerly() {
    let mut sheet = sheet();

    sheet.set("Sheet1!A1", "shared").unwrap();
    sheet.set("Sheet1!A2", "shared").unwrap();
    assert_eq!(sheet.string_table().len(), 1);

    sheet.remove("Sheet1!A1").unwrap();
    assert_eq!(sheet.string_table().len(), 1);

    sheet.set("Sheet1!A2", "different").unwrap();
    assert_eq!(sheet.string_table().len(), 1);

    sheet.remove("Sheet1!A2").unwrap();
    assert_eq!(sheet.string_table().len(), 0);
}

#[test]
fn store_occupancy_tracks_cells_and_chunks() {
    let mut sheet = sheet();

    sheet.set("Sheet1!A1", 1.0).unwrap();
    sheet.set("Sheet1!B2", "two").unwrap();
    sheet.set("Sheet1!C3", "=A1+1").unwrap();

    let store = sheet.worksheet_store("Sheet1").unwrap();
    assert_eq!(store.total_cells(), 3);
    assert_eq!(store.chunk_count(), 1);

    // A far-away cell materializes a second chunk; clearing it removes the
    // chunk again.
    sheet.set("Sheet1!ZZ9999", 9.0).unwrap();
    let store = sheet.worksheet_store("Sheet1").unwrap();
    assert_eq!(store.chunk_count(), 2);

    sheet.remove("Sheet1!ZZ9999").unwrap();
    let store = sheet.worksheet_store("Sheet1").unwrap();
    assert_eq!(store.chunk_count(), 1);
    assert_eq!(store.total_cells(), 3);
}

#[test]
fn setting_empty_removes_the_cell() {
    let mut sheet = sheet();

    sheet.set("Sheet1!A1", 5.0).unwrap();
    sheet.set("Sheet1!A1", CellValue::Empty).unwrap();
    assert_eq!(sheet.get("Sheet1!A1").unwrap(), CellValue::Empty);
    assert_eq!(sheet.worksheet_store("Sheet1").unwrap().total_cells(), 0);
}

#[test]
fn quoted_worksheet_names_parse_in_addresses_and_formulas() {
    let mut sheet = sheet();
    sheet.add_worksheet("My Data").unwrap();

    sheet.set("'My Data'!A1", 7.0).unwrap();
    sheet.set("Sheet1!B1", "='My Data'!A1*3").unwrap();
    sheet.calculate().unwrap();

    assert_eq!(get_number(&sheet, "'My Data'!A1"), 7.0);
    assert_eq!(get_number(&sheet, "Sheet1!B1"), 21.0);
}

#[test]
fn get_is_pure() {
    let mut sheet = sheet();
    sheet.set("Sheet1!A1", 1.0).unwrap();
    sheet.set("Sheet1!B1", "=A1").unwrap();
    sheet.calculate().unwrap();

    let before = sheet.dependency_graph().dirty_len();
    let _ = sheet.get("Sheet1!B1").unwrap();
    let _ = sheet.get("Sheet1!Z99").unwrap();
    assert_eq!(sheet.dependency_graph().dirty_len(), before);
}
