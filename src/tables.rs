use comfy_table::{Attribute, Cell, CellAlignment, Table, modifiers, presets};

use crate::core::metrics::{MetricRow, Section};

pub const fn section_title(section: Section) -> &'static str {
    match section {
        Section::Amortisation => "Amortisation",
        Section::Energy => "Energy",
        Section::Prices => "Prices",
        Section::Windows => "Today and this month",
        Section::Quota => "Electricity quota",
        Section::Battery => "Battery",
        Section::Benchmark => "Benchmark",
        Section::Strings => "Strings",
    }
}

pub fn build_section_table<'a>(rows: impl IntoIterator<Item = &'a MetricRow>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .enforce_styling();
    table.set_header(vec!["Metric", "Value", "Unit"]);
    for row in rows {
        let value_cell = row.value.as_ref().map_or_else(
            || Cell::new("unavailable").add_attribute(Attribute::Dim),
            |value| Cell::new(value).set_alignment(CellAlignment::Right),
        );
        table.add_row(vec![
            Cell::new(&row.label),
            value_cell,
            Cell::new(row.unit.unwrap_or_default()).add_attribute(Attribute::Dim),
        ]);
    }
    table
}
