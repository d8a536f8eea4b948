// src/csv_export.rs
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{QuoteStyle, WriterBuilder};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;

use crate::error::AppError;
use crate::report::ReportRow;

pub const CSV_HEADERS: [&str; 8] = [
    "Nombre",
    "Email",
    "Horas Ganadas",
    "Horas Usadas",
    "Saldo",
    "Días Vacaciones",
    "Días Licencia Médica",
    "Días Permiso Personal",
];

pub fn report_filename(date: NaiveDate) -> String {
    format!("reporte-horas-{}.csv", date.format("%Y-%m-%d"))
}

fn one_decimal(hours: Decimal) -> String {
    let rounded = hours.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.1}", rounded)
}

/// Renders the report with every cell quoted.
pub fn render_report_csv(rows: &[ReportRow]) -> Result<String, AppError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    writer
        .write_record(CSV_HEADERS)
        .map_err(|e| AppError::Export(e.to_string()))?;

    for row in rows {
        writer
            .write_record([
                row.user_name.clone(),
                row.email.clone(),
                one_decimal(row.total_earned),
                one_decimal(row.total_used),
                one_decimal(row.balance),
                row.vacation_days.to_string(),
                row.medical_days.to_string(),
                row.personal_days.to_string(),
            ])
            .map_err(|e| AppError::Export(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AppError::Export(e.to_string()))
}

/// Writes the report into `dir` under the dated file name.
pub fn write_report_file(
    rows: &[ReportRow],
    dir: &Path,
    date: NaiveDate,
) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(report_filename(date));
    std::fs::write(&path, render_report_csv(rows)?)?;
    info!("Report written to {}", path.display());
    Ok(path)
}
