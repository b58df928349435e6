use super::stub::StubKind;
use super::*;
use crate::stores::{InMemoryPayloadStore, PayloadStore};
use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;

fn default_compressor() -> ContentCompressor<InMemoryPayloadStore> {
    ContentCompressor::with_defaults(Arc::new(InMemoryPayloadStore::new()))
}

/// Rebuild an array whose trailing elements were replaced by chunk stubs.
fn expand_array(store: &InMemoryPayloadStore, items: &[Value]) -> Result<Vec<Value>> {
    let mut rebuilt = Vec::new();
    for item in items {
        match item.as_str() {
            Some(text) if text.starts_with(&StubKind::JsonArrayChunk.marker()) => {
                let key = stub::extract_keys(text).remove(0);
                let stored = store.retrieve(&key)?.expect("chunk is stored");
                rebuilt.extend(serde_json::from_str::<Vec<Value>>(&stored)?);
            }
            _ => rebuilt.push(item.clone()),
        }
    }
    Ok(rebuilt)
}

#[test]
fn test_threshold_boundary() {
    let compressor = default_compressor();

    // 16000 chars is exactly 4000 tokens
    let at_limit = "a".repeat(16_000);
    assert_eq!(compressor.compress_content(&at_limit, ""), at_limit);

    let over = "a".repeat(16_001);
    let compressed = compressor.compress_content(&over, "");
    assert_ne!(compressed, over);
    assert!(TokenEstimator::estimate_text(&compressed) <= 4_000);
}

#[test]
fn test_large_data_property_round_trips() -> Result<()> {
    let compressor = default_compressor();
    let data = "x".repeat(40_000);
    let content = serde_json::to_string(&json!({ "data": data }))?;

    let compressed = compressor.compress_content(&content, "");
    let value: Value = serde_json::from_str(&compressed)?;

    let stub_text = value["data"].as_str().unwrap();
    assert!(stub_text.starts_with("[COMPRESSED_JSON_PROPERTY - 10000 tokens]"));
    assert!(value[stub::SCHEMA_KEY_FIELD].is_string());

    let key = stub::extract_keys(stub_text).remove(0);
    assert_eq!(compressor.store().retrieve(&key)?, Some(data));
    Ok(())
}

#[test]
fn test_large_array_keeps_order_and_items() -> Result<()> {
    let compressor = default_compressor();
    let items: Vec<Value> = (0..15)
        .map(|i| json!(format!("{i:02}{}", "e".repeat(2_198))))
        .collect();
    let content = serde_json::to_string(&items)?;

    let compressed = compressor.compress_content(&content, "");
    let result: Vec<Value> = serde_json::from_str(&compressed)?;

    let chunk_stubs = result
        .iter()
        .filter_map(Value::as_str)
        .filter(|text| text.starts_with("[COMPRESSED_JSON_ARRAY_CHUNK"))
        .count();
    assert!(chunk_stubs >= 1);
    assert!(compressed.contains("items 7-14"));

    let rebuilt = expand_array(compressor.store(), &result)?;
    assert_eq!(rebuilt.len(), 15);
    assert_eq!(rebuilt, items);
    Ok(())
}

#[test]
fn test_text_chunk_chain_reconstructs() -> Result<()> {
    let compressor = default_compressor();
    let content: String = (0..5_000).map(|i| format!("{i:>9}\n")).collect();

    let compressed = compressor.compress_content(&content, "");
    assert!(compressed.starts_with("[COMPRESSED_STRING - 12500 tokens, 4 chunks]"));

    let key = stub::extract_keys(&compressed).remove(0);
    assert_eq!(reassemble_chain(compressor.store().as_ref(), &key)?, Some(content));
    Ok(())
}

#[test]
fn test_multibyte_text_over_threshold_is_chunked() -> Result<()> {
    let compressor = default_compressor();
    // 10000 chars, 20000 bytes = 5000 tokens
    let content = "é".repeat(10_000);

    let compressed = compressor.compress_content(&content, "");
    assert!(compressed.starts_with("[COMPRESSED_STRING - 5000 tokens, 2 chunks]"));
    assert!(TokenEstimator::estimate_text(&compressed) <= 4_000);

    let key = stub::extract_keys(&compressed).remove(0);
    assert_eq!(reassemble_chain(compressor.store().as_ref(), &key)?, Some(content));
    Ok(())
}

#[test]
fn test_compression_is_idempotent() {
    let compressor = default_compressor();
    let inputs = [
        "plain ".repeat(5_000),
        serde_json::to_string(&json!({ "data": "x".repeat(40_000), "n": 1 })).unwrap(),
        serde_json::to_string(&vec!["y".repeat(2_200); 15]).unwrap(),
    ];

    for input in inputs {
        let once = compressor.compress_content(&input, "");
        assert_ne!(once, input);
        let store_size = compressor.store().len().unwrap();

        let twice = compressor.compress_content(&once, "");
        assert_eq!(twice, once);
        assert_eq!(compressor.store().len().unwrap(), store_size);
    }
}

#[test]
fn test_schema_referencing_object_returned_verbatim() {
    let compressor = default_compressor();
    let content = format!(
        r#"{{"_schema_key":"schema_1_abcdef012","rows":"{}"}}"#,
        "r".repeat(20_000)
    );
    assert_eq!(compressor.compress_content(&content, ""), content);
    assert!(compressor.store().is_empty().unwrap());
}

#[test]
fn test_try_parse_json_only_accepts_containers() {
    assert!(try_parse_json(r#"{"a": 1}"#).is_some());
    assert!(try_parse_json("  [1, 2]").is_some());
    assert!(try_parse_json("12345678901234567890").is_none());
    assert!(try_parse_json(r#""quoted""#).is_none());
    assert!(try_parse_json("{not json").is_none());
}

#[test]
fn test_is_compressed() {
    assert!(is_compressed("[COMPRESSED_STRING - 1 tokens]\nKey: k"));
    assert!(is_compressed("part\n[NEXT_CHUNK_KEY: chunk_1]"));
    assert!(is_compressed(r#"{"_schema_key": "s"}"#));
    assert!(!is_compressed(r#"{"schema": "s"}"#));
    assert!(!is_compressed("hello"));
}
