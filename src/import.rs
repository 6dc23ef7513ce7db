use std::{
    collections::HashMap,
    io::{Cursor, Read},
    path::Path,
};

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::StringRecord;
use sqlx::{Connection, Sqlite, SqliteConnection, Transaction};

use crate::{
    db,
    errors::AppError,
    structs::{Customer, CustomerData, ImportReport},
    utils::{parse_date_or_now, parse_decimal_or_zero},
    AppState,
};

pub const REQUIRED_COLUMNS: [&str; 15] = [
    "customer_name",
    "phone_number",
    "email",
    "address",
    "state",
    "purchase_date",
    "gold_type",
    "gold_quality",
    "gold_weight",
    "price_per_gram",
    "total_amount",
    "discount_percentage",
    "discount_amount",
    "final_amount",
    "payment_mode",
];

/// Successful rows between commits.
const BATCH_SIZE: usize = 100;

/// Header name to field position. Duplicate headers resolve to the first.
struct ColumnMap {
    positions: HashMap<String, usize>,
    width: usize,
}

impl ColumnMap {
    fn new(headers: &StringRecord) -> Result<Self, AppError> {
        let mut positions = HashMap::new();
        for (index, name) in headers.iter().enumerate() {
            positions.entry(name.trim().to_string()).or_insert(index);
        }
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| !positions.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::MissingColumns(missing));
        }
        Ok(ColumnMap {
            positions,
            width: headers.len(),
        })
    }

    /// Missing cells read as blank text.
    fn text<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.optional(record, name).unwrap_or("")
    }

    fn optional<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.positions
            .get(name)
            .map(|&index| record.get(index).unwrap_or(""))
    }

    fn decimal(&self, record: &StringRecord, name: &str) -> f64 {
        parse_decimal_or_zero(self.text(record, name))
    }
}

/// Source formats accepted by the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    /// xlsx, xlsm, xlsb, xls and ods; the first worksheet is read.
    Spreadsheet,
}

impl ImportFormat {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(ImportFormat::Csv),
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => Ok(ImportFormat::Spreadsheet),
            _ => Err(AppError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Zip (xlsx, ods) and OLE (xls) containers are spreadsheets; anything
    /// else is read as CSV text.
    pub fn sniff(bytes: &[u8]) -> Self {
        const ZIP: &[u8] = b"PK\x03\x04";
        const OLE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        if bytes.starts_with(ZIP) || bytes.starts_with(OLE) {
            ImportFormat::Spreadsheet
        } else {
            ImportFormat::Csv
        }
    }
}

/// Imports a CSV or spreadsheet file from disk, chosen by extension.
pub async fn import_file(state: &AppState, path: &Path) -> Result<ImportReport, AppError> {
    let format = ImportFormat::from_path(path)?;
    let bytes = tokio::fs::read(path).await?;
    log::info!("Importing customers from {}", path.display());
    import_bytes(state, format, bytes).await
}

pub async fn import_bytes(
    state: &AppState,
    format: ImportFormat,
    bytes: Vec<u8>,
) -> Result<ImportReport, AppError> {
    match format {
        ImportFormat::Csv => import_csv(state, bytes.as_slice()).await,
        ImportFormat::Spreadsheet => import_spreadsheet(state, bytes).await,
    }
}

/// Inserts every data row of a CSV document as a new customer.
pub async fn import_csv<R: Read>(state: &AppState, source: R) -> Result<ImportReport, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);
    let headers = reader.headers()?.clone();
    let records = reader
        .into_records()
        .map(|record| record.map_err(AppError::from));
    import_records(state, &headers, records).await
}

/// Inserts every row below the header of the first worksheet.
pub async fn import_spreadsheet(state: &AppState, bytes: Vec<u8>) -> Result<ImportReport, AppError> {
    let (headers, rows) = read_first_sheet(bytes)?;
    import_records(state, &headers, rows.into_iter().map(Ok)).await
}

fn read_first_sheet(bytes: Vec<u8>) -> Result<(StringRecord, Vec<StringRecord>), AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Ok((StringRecord::new(), Vec::new())),
    };
    let mut rows = range
        .rows()
        .map(|cells| cells.iter().map(cell_text).collect::<StringRecord>());
    let headers = rows.next().unwrap_or_default();
    Ok((headers, rows.collect()))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => {
            text.trim().to_string()
        }
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::DateTime(value) => value
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Row pipeline shared by every source format.
///
/// Fails as a whole only when a required column is missing or the database
/// itself fails. A bad row is logged, counted and rolled back on its own;
/// blank or unparseable numbers become 0.0 and bad dates become the current
/// time rather than failing the row.
///
/// Amounts are stored exactly as supplied, even when they disagree with
/// weight, price and discount.
async fn import_records<I>(
    state: &AppState,
    headers: &StringRecord,
    records: I,
) -> Result<ImportReport, AppError>
where
    I: Iterator<Item = Result<StringRecord, AppError>>,
{
    let columns = ColumnMap::new(headers)?;

    let mut report = ImportReport::default();
    let mut committed = 0;
    let mut tx = db::open_session(state).await?;

    for (index, record) in records.enumerate() {
        let row = index + 1;
        let mut savepoint = Connection::begin(&mut *tx).await?;
        match import_row(&mut savepoint, &columns, row, record).await {
            Ok(_) => {
                savepoint.commit().await?;
                report.success_count += 1;
                if report.success_count % BATCH_SIZE == 0 {
                    commit_batch(tx, &report, committed).await?;
                    committed = report.success_count;
                    log::info!("Committed {} records so far...", committed);
                    tx = db::open_session(state).await?;
                }
            }
            Err(e) => {
                savepoint.rollback().await?;
                report.error_count += 1;
                let err = AppError::RowImport {
                    row,
                    message: e.to_string(),
                };
                log::error!("{}", err);
            }
        }
    }

    commit_batch(tx, &report, committed).await?;
    log::info!(
        "Import completed. Successfully imported {} records. Failed: {}",
        report.success_count,
        report.error_count
    );
    Ok(report)
}

/// Commits the pending batch. On failure the batch is rolled back and the
/// records kept by earlier batches are logged before the error propagates.
async fn commit_batch(
    tx: Transaction<'static, Sqlite>,
    report: &ImportReport,
    committed: usize,
) -> Result<(), AppError> {
    tx.commit().await.map_err(|e| {
        log::error!(
            "Import aborted: {} records were committed before the failure, {} pending records were rolled back, {} rows had failed",
            committed,
            report.success_count - committed,
            report.error_count
        );
        AppError::from(e)
    })
}

async fn import_row(
    conn: &mut SqliteConnection,
    columns: &ColumnMap,
    row: usize,
    record: Result<StringRecord, AppError>,
) -> Result<Customer, AppError> {
    let record = record?;
    if record.len() > columns.width {
        return Err(AppError::Validation(format!(
            "expected {} fields, found {}",
            columns.width,
            record.len()
        )));
    }
    let data = row_to_customer(columns, &record);
    data.validate()?;
    if !data.amounts_consistent() {
        log::warn!(
            "Row {}: amounts do not match weight, price and discount; stored as imported",
            row
        );
    }
    Ok(db::insert_customer(conn, &data).await?)
}

fn row_to_customer(columns: &ColumnMap, record: &StringRecord) -> CustomerData {
    let text = |name: &str| Some(columns.text(record, name).to_string());
    CustomerData {
        customer_name: columns.text(record, "customer_name").to_string(),
        phone_number: text("phone_number"),
        email: text("email"),
        address: text("address"),
        state: text("state"),
        purchase_date: parse_date_or_now(columns.text(record, "purchase_date")),
        gold_type: text("gold_type"),
        gold_quality: text("gold_quality"),
        gold_weight: columns.decimal(record, "gold_weight"),
        price_per_gram: columns.decimal(record, "price_per_gram"),
        total_amount: columns.decimal(record, "total_amount"),
        discount_percentage: columns.decimal(record, "discount_percentage"),
        discount_amount: columns.decimal(record, "discount_amount"),
        final_amount: columns.decimal(record, "final_amount"),
        payment_mode: text("payment_mode"),
        notes: columns.optional(record, "notes").map(str::to_string),
    }
}
