//! DCAT-JSON parser: accepts either a bare array of dataset objects or a
//! catalog object carrying a `dataset` array.

use dch_core::DcatDataset;
use serde_json::Value;

use crate::{content_hash, DatasetFormat, Extracted, ParseError, SplitRecord};

/// In tolerant mode a dataset lacking both `identifier` and `uri` is keyed
/// by a hash of its own content instead of failing the whole document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat {
    pub tolerant: bool,
}

impl JsonFormat {
    pub fn tolerant() -> Self {
        Self { tolerant: true }
    }
}

impl DatasetFormat for JsonFormat {
    fn split(&self, raw: &[u8]) -> Result<Vec<SplitRecord>, ParseError> {
        let doc: Value =
            serde_json::from_slice(raw).map_err(|e| ParseError::Json(e.to_string()))?;

        let datasets: Vec<&Value> = match &doc {
            Value::Array(items) => {
                // catalog-vs-garbage heuristic: a real dataset array leads
                // with an object carrying a publisher
                match items.first() {
                    None => Vec::new(),
                    Some(Value::Object(first)) => {
                        if !first.contains_key("publisher") {
                            return Err(ParseError::Structure(
                                "first array element has no 'publisher' key".to_string(),
                            ));
                        }
                        items.iter().collect()
                    }
                    Some(_) => {
                        return Err(ParseError::Structure(
                            "array element is not an object".to_string(),
                        ))
                    }
                }
            }
            Value::Object(map) => {
                if let Some(dataset) = map.get("dataset") {
                    match dataset {
                        Value::Array(items) => items.iter().collect(),
                        _ => {
                            return Err(ParseError::Structure(
                                "'dataset' value is not an array".to_string(),
                            ))
                        }
                    }
                } else if map.contains_key("publisher") {
                    // a single dataset object rather than a catalog
                    vec![&doc]
                } else {
                    return Err(ParseError::Structure(
                        "object has neither 'dataset' nor 'publisher' key".to_string(),
                    ));
                }
            }
            _ => {
                return Err(ParseError::Structure(
                    "top-level JSON value is neither an array nor an object".to_string(),
                ))
            }
        };

        let mut out = Vec::with_capacity(datasets.len());
        for (index, dataset) in datasets.iter().enumerate() {
            let Value::Object(fields) = dataset else {
                return Err(ParseError::Structure(format!(
                    "dataset at index {index} is not an object"
                )));
            };
            if !fields.contains_key("title") {
                return Err(ParseError::Structure(format!(
                    "dataset at index {index} has no 'title'"
                )));
            }
            let fragment = serde_json::to_string(dataset)
                .map_err(|e| ParseError::Json(e.to_string()))?;
            let guid = match key_field(fields, "identifier").or_else(|| key_field(fields, "uri"))
            {
                Some(guid) => guid,
                None if self.tolerant => content_hash(fragment.as_bytes()),
                None => {
                    return Err(ParseError::Structure(format!(
                        "dataset at index {index} has neither 'identifier' nor 'uri'"
                    )))
                }
            };
            out.push(SplitRecord { guid, fragment });
        }
        Ok(out)
    }

    fn extract(&self, fragment: &str) -> Result<Extracted, ParseError> {
        let dataset: DcatDataset =
            serde_json::from_str(fragment).map_err(|e| ParseError::Json(e.to_string()))?;
        Ok(Extracted::Record(Box::new(dataset)))
    }
}

/// Identifier-ish fields are occasionally published as numbers.
fn key_field(fields: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(json: &str) -> Result<Vec<SplitRecord>, ParseError> {
        JsonFormat::default().split(json.as_bytes())
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(split("fdfd"), Err(ParseError::Json(_))));
    }

    #[test]
    fn rejects_scalar_document() {
        assert!(matches!(split("42"), Err(ParseError::Structure(_))));
    }

    #[test]
    fn rejects_list_with_non_object_item() {
        assert!(matches!(
            split(r#"["not a dataset"]"#),
            Err(ParseError::Structure(_))
        ));
    }

    #[test]
    fn rejects_list_whose_first_item_lacks_publisher() {
        assert!(matches!(split("[{}]"), Err(ParseError::Structure(_))));
    }

    #[test]
    fn rejects_object_that_is_not_a_catalog() {
        assert!(matches!(split("{}"), Err(ParseError::Structure(_))));
    }

    #[test]
    fn rejects_catalog_with_non_array_dataset() {
        assert!(matches!(
            split(r#"{"dataset": {"not": "a dataset"}}"#),
            Err(ParseError::Structure(_))
        ));
    }

    #[test]
    fn rejects_dataset_without_title() {
        let err = split(r#"[{"identifier": "d1", "publisher": "CO"}]"#).unwrap_err();
        assert!(err.to_string().contains("title"), "{err}");
    }

    #[test]
    fn rejects_dataset_without_identifier_or_uri() {
        let err = split(r#"[{"title": "T", "publisher": "CO"}]"#).unwrap_err();
        assert!(err.to_string().contains("identifier"), "{err}");
    }

    #[test]
    fn tolerant_mode_hashes_keyless_datasets() {
        let records = JsonFormat::tolerant()
            .split(br#"[{"title": "T", "publisher": "CO"}]"#)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].guid.len(), 64);
    }

    #[test]
    fn splits_bare_dataset_array() {
        let records =
            split(r#"[{"identifier": "d1", "title": "T", "publisher": "CO"}]"#).unwrap();
        assert_eq!(records[0].guid, "d1");
    }

    #[test]
    fn splits_catalog_object() {
        let records = split(
            r#"{"dataset": [{"identifier": "d1", "title": "T", "publisher": "CO"},
                            {"uri": "http://example.org/d2", "title": "U"}]}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].guid, "http://example.org/d2");
    }

    #[test]
    fn extract_returns_identifier_matching_split_guid() {
        let doc = r#"{"dataset": [{"identifier": "d1", "title": "T", "publisher": "CO"}]}"#;
        let format = JsonFormat::default();
        let records = format.split(doc.as_bytes()).unwrap();
        let Extracted::Record(dataset) = format.extract(&records[0].fragment).unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(dataset.identifier.as_deref(), Some(records[0].guid.as_str()));
        assert_eq!(dataset.title.as_deref(), Some("T"));
    }
}
