use crate::error::Error;
use chrono::Utc;
use datafusion::arrow::csv::reader::Format;
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::config::CsvOptions;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::{ident, lit, CsvReadOptions, Expr, SessionContext};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const INSERT_TIME_COLUMN: &str = "_insert_time";

const INPUT_SUFFIX: &str = "_input.csv";
const OUTPUT_SUFFIX: &str = "_output.csv";
const BYTE_ORDER_MARK: [u8; 3] = [0xef, 0xbb, 0xbf];

/// Ingestion timestamp shared by every row staged in one run.
pub fn insert_time_now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Stages every downloaded report in `directory` for loading.
///
/// Each `*_input.csv` is rewritten as `*_output.csv` with an `_insert_time` column
/// prepended. Empty inputs, i.e. reports without data, are skipped.
///
/// # Returns
/// The paths of the written output files, in file name order.
pub async fn append_insert_time(directory: &Path, insert_time: &str) -> Result<Vec<PathBuf>, Error> {
    let mut inputs: Vec<PathBuf> = fs::read_dir(directory)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    inputs.retain(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(INPUT_SUFFIX))
    });
    inputs.sort();

    let ctx = SessionContext::new();
    let mut outputs = vec![];

    for input in inputs {
        let Some(schema) = text_schema(&input)? else {
            debug!("{} has no header, skipping", input.display());
            continue;
        };

        let output = output_path(&input);
        add_insert_time_column(&ctx, &input, &output, schema, insert_time).await?;
        info!("staged {}", output.display());
        outputs.push(output);
    }

    Ok(outputs)
}

/// Removes every file left in the staging directory.
pub fn remove_staged_files(directory: &Path) -> Result<usize, Error> {
    let mut removed = 0;

    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }

    Ok(removed)
}

fn output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    input.with_file_name(name.replace(INPUT_SUFFIX, OUTPUT_SUFFIX))
}

/// Reads the header of a report as an all-text schema.
/// Values are copied as they were downloaded, never re-typed.
fn text_schema(input: &Path) -> Result<Option<Schema>, Error> {
    if fs::metadata(input)?.len() == 0 {
        return Ok(None);
    }

    let mut file = File::open(input)?;
    let mut prefix = [0u8; 3];
    let header_start = match file.read_exact(&mut prefix) {
        Ok(()) if prefix == BYTE_ORDER_MARK => 3,
        _ => 0,
    };
    file.seek(SeekFrom::Start(header_start))?;

    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(file, Some(1))?;

    if inferred.fields().is_empty() {
        return Ok(None);
    }

    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| Field::new(field.name(), DataType::Utf8, true))
        .collect();

    Ok(Some(Schema::new(fields)))
}

async fn add_insert_time_column(
    ctx: &SessionContext,
    input: &Path,
    output: &Path,
    schema: Schema,
    insert_time: &str,
) -> Result<(), Error> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();

    let df = ctx
        .read_csv(
            input.as_ref(),
            CsvReadOptions::new().has_header(true).schema(&schema),
        )
        .await?;

    let mut columns: Vec<Expr> = vec![lit(insert_time).alias(INSERT_TIME_COLUMN)];
    columns.extend(schema.fields().iter().map(|field| ident(field.name())));

    df.select(columns)?
        .write_csv(
            output.as_ref(),
            DataFrameWriteOptions::new().with_single_file_output(true),
            Some(CsvOptions::default().with_has_header(true)),
        )
        .await?;

    Ok(())
}
