use crate::model::ExtractedTable;
use crate::model::RowKind;
use crate::model::TableOrigin;
use crate::model::TableRegion;
use crate::pipeline::RowClassification;
use crate::pipeline::Stage;
use crate::registry::SheetInfo;
use crate::spreadsheet::CellValue;
use crate::telemetry::Event;
use crate::telemetry::EventEmitter;
use serde_json::json;
use tracing::debug;

/// A table being collected: its header row and the data rows seen so far.
struct PendingTable {
    header: usize,
    data: Vec<usize>,
    dropped: usize,
}

/// Carves tables out of classified rows.
///
/// A table starts at a header row and collects the data rows below it until the
/// next header or the end of the sheet. Unknown rows are skipped without ending
/// the table. Data rows above the first header belong to no table.
pub fn segment_tables(
    sheet: &SheetInfo,
    rows: &[Vec<CellValue>],
    classifications: &[RowClassification],
    max_table_rows: Option<usize>,
    events: &dyn EventEmitter,
) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut pending: Option<PendingTable> = None;
    let mut orphans = Vec::new();

    for classification in classifications {
        match classification.kind {
            RowKind::Header => {
                if let Some(table) = pending.take() {
                    tables.push(close(sheet, rows, table, tables.len(), events));
                }
                pending = Some(PendingTable {
                    header: classification.row_index,
                    data: Vec::new(),
                    dropped: 0,
                });
            }
            RowKind::Data => match pending.as_mut() {
                Some(table) if max_table_rows.map(|limit| table.data.len() >= limit).unwrap_or(false) => {
                    table.dropped += 1;
                }
                Some(table) => table.data.push(classification.row_index),
                None => orphans.push(classification.row_index),
            },
            RowKind::Unknown => {}
        }
    }
    if let Some(table) = pending.take() {
        tables.push(close(sheet, rows, table, tables.len(), events));
    }

    if !orphans.is_empty() {
        let payload = json!({"sheet": sheet.name, "rows": orphans});
        events.emit(&Event::warning("segment.orphan_data_rows", Stage::Segment, payload));
    }
    debug!(sheet = %sheet.name, tables = tables.len(), "sheet segmented");
    tables
}

fn close(sheet: &SheetInfo, rows: &[Vec<CellValue>], table: PendingTable, table_index: usize, events: &dyn EventEmitter) -> ExtractedTable {
    if table.dropped > 0 {
        let payload = json!({
            "sheet": sheet.name,
            "table_index": table_index,
            "kept": table.data.len(),
            "dropped": table.dropped,
        });
        events.emit(&Event::warning("table.truncated", Stage::Segment, payload));
    }

    let row = |index: usize| rows.get(index).map(Vec::as_slice).unwrap_or(&[]);
    let occupied = || {
        std::iter::once(table.header)
            .chain(table.data.iter().copied())
            .flat_map(|index| row(index).iter().enumerate())
            .filter(|(_, value)| !value.is_empty())
            .map(|(col, _)| col)
    };
    let min_col = occupied().min().unwrap_or(0);
    let max_col = occupied().max().unwrap_or(0);
    let padded = |index: usize| {
        let mut values = row(index).to_vec();
        values.resize(max_col + 1, CellValue::Empty);
        values
    };

    ExtractedTable {
        origin: TableOrigin {
            source_path: sheet.source_path.to_owned(),
            sheet_name: sheet.name.to_owned(),
            sheet_index: sheet.index,
            table_index,
        },
        region: TableRegion {
            min_row: table.header,
            max_row: table.data.last().copied().unwrap_or(table.header),
            min_col,
            max_col,
        },
        header_row_index: table.header,
        header: padded(table.header),
        rows: table.data.iter().map(|index| padded(*index)).collect(),
        row_indexes: table.data,
    }
}
