use crate::error::Error;
use log::debug;
use serde_json::Value;
use std::fmt;

/// Nested layouts the remote service uses to report structured errors, in matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultShape {
    ApiOperationErrors,
    AdApiErrors,
    BatchErrors,
    OperationErrors,
    EditorialBatchErrors,
    EditorialErrors,
    EditorialOperationErrors,
}

impl FaultShape {
    pub const ALL: [FaultShape; 7] = [
        FaultShape::ApiOperationErrors,
        FaultShape::AdApiErrors,
        FaultShape::BatchErrors,
        FaultShape::OperationErrors,
        FaultShape::EditorialBatchErrors,
        FaultShape::EditorialErrors,
        FaultShape::EditorialOperationErrors,
    ];

    pub fn path(self) -> [&'static str; 3] {
        match self {
            FaultShape::ApiOperationErrors => ["ApiFault", "OperationErrors", "OperationError"],
            FaultShape::AdApiErrors => ["AdApiFaultDetail", "Errors", "AdApiError"],
            FaultShape::BatchErrors => ["ApiFaultDetail", "BatchErrors", "BatchError"],
            FaultShape::OperationErrors => ["ApiFaultDetail", "OperationErrors", "OperationError"],
            FaultShape::EditorialBatchErrors => {
                ["EditorialApiFaultDetail", "BatchErrors", "BatchError"]
            }
            FaultShape::EditorialErrors => {
                ["EditorialApiFaultDetail", "EditorialErrors", "EditorialError"]
            }
            FaultShape::EditorialOperationErrors => {
                ["EditorialApiFaultDetail", "OperationErrors", "OperationError"]
            }
        }
    }
}

const EXCEPTION_DETAIL: &str = "ExceptionDetail";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultRecord {
    pub error_code: Option<String>,
    pub code: Option<String>,
    pub details: Option<String>,
    pub field_path: Option<String>,
    pub message: Option<String>,
}

impl FaultRecord {
    fn from_value(value: &Value) -> Self {
        FaultRecord {
            error_code: field_text(value, "ErrorCode"),
            code: field_text(value, "Code"),
            details: field_text(value, "Details"),
            field_path: field_text(value, "FieldPath"),
            message: field_text(value, "Message"),
        }
    }
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("ErrorCode", &self.error_code),
            ("Code", &self.code),
            ("Details", &self.details),
            ("FieldPath", &self.field_path),
            ("Message", &self.message),
        ];

        let rendered: Vec<String> = parts
            .iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
            .collect();

        write!(f, "{}", rendered.join(", "))
    }
}

pub fn describe_records(records: &[FaultRecord]) -> String {
    records
        .iter()
        .map(|record| record.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFault {
    Structured {
        shape: FaultShape,
        records: Vec<FaultRecord>,
    },
    Serialization {
        messages: Vec<String>,
    },
}

impl From<DecodedFault> for Error {
    fn from(decoded: DecodedFault) -> Self {
        match decoded {
            DecodedFault::Structured { shape, records } => {
                debug!("decoded {} {:?} record(s)", records.len(), shape);
                Error::RemoteStructuredFault { records }
            }
            DecodedFault::Serialization { messages } => Error::RemoteSerializationFault { messages },
        }
    }
}

/// Decodes a fault detail tree into flat records.
///
/// The first shape whose full path resolves to a non-null value wins and later shapes are
/// not consulted. Payloads matching no shape fall back to the generic `ExceptionDetail`
/// messages, and anything else is reported as [`Error::UnknownFault`].
pub fn decode(detail: &Value) -> Result<DecodedFault, Error> {
    for shape in FaultShape::ALL {
        if let Some(errors) = resolve(detail, &shape.path()) {
            let records = flatten(errors).map(FaultRecord::from_value).collect();
            return Ok(DecodedFault::Structured { shape, records });
        }
    }

    if let Some(exception_detail) = resolve(detail, &[EXCEPTION_DETAIL]) {
        let messages = flatten(exception_detail)
            .filter_map(|exception| field_text(exception, "Message"))
            .collect();
        return Ok(DecodedFault::Serialization { messages });
    }

    Err(Error::UnknownFault {
        payload: detail.to_string(),
    })
}

fn resolve<'a>(detail: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(detail, |node, field| node.get(*field))
        .filter(|value| !value.is_null())
}

fn flatten(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        single => Box::new(std::iter::once(single)),
    }
}

fn field_text(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
