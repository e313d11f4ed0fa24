//! CSV decoder (spec §4.2). Requires a header row; a single data row
//! decodes to a single `Map`, multiple rows decode to a `List` of `Map`s.
//! Blank lines are skipped and fields are trimmed.

use crate::error::DecodeError;
use crate::value::{Value, ValueMap};

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .has_headers(true)
        .from_reader(body);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| malformed(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| malformed(e.to_string()))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let mut map = ValueMap::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            map.insert(header.clone(), Value::Str(field.to_string()));
        }
        rows.push(Value::Map(map));
    }

    match rows.len() {
        0 => Err(malformed("no data rows".to_string())),
        1 => Ok(rows.into_iter().next().unwrap()),
        _ => Ok(Value::List(rows)),
    }
}

fn malformed(reason: String) -> DecodeError {
    DecodeError::Malformed {
        media_type: "text/csv".to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_row_decodes_to_map() {
        let v = decode(b"name,age\nA,30\n").unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get("name").unwrap().as_str(), Some("A"));
    }

    #[test]
    fn multiple_rows_decode_to_list() {
        let v = decode(b"name,age\nA,30\nB,40\n").unwrap();
        let list = v.as_list().unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let v = decode(b"name,age\nA,30\n\nB,40\n").unwrap();
        let list = v.as_list().unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn header_only_is_error() {
        assert!(decode(b"name,age\n").is_err());
    }
}
