//! XML request deserialization.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{AccessPolicy, BlockListEntry, BlockSource, SignedIdentifier};

fn invalid_xml() -> StorageError {
    StorageError::new(ErrorCode::InvalidXmlDocument)
}

/// Parses a `BlockList` request body. Entries keep document order, which is
/// the order of the committed content.
pub fn parse_block_list(xml: &str) -> StorageResult<Vec<BlockListEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<BlockSource> = None;
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "BlockList" {
                    seen_root = true;
                } else {
                    current = Some(BlockSource::from_str(&name).ok_or_else(invalid_xml)?);
                }
            }
            Ok(Event::Empty(e)) => {
                // <Latest/> names the empty block id, which never validates.
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "BlockList" {
                    seen_root = true;
                } else {
                    let source = BlockSource::from_str(&name).ok_or_else(invalid_xml)?;
                    entries.push(BlockListEntry::new(String::new(), source));
                }
            }
            Ok(Event::End(_)) => {
                current = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(source) = current {
                    let block_id = e.unescape().map_err(|_| invalid_xml())?.to_string();
                    entries.push(BlockListEntry::new(block_id, source));
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(invalid_xml()),
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(invalid_xml());
    }
    Ok(entries)
}

/// Parses signed identifiers (access policy) XML.
pub fn parse_signed_identifiers(xml: &str) -> StorageResult<Vec<SignedIdentifier>> {
    if xml.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut identifiers = Vec::new();
    let mut buf = Vec::new();
    let mut current_text = String::new();

    let mut current_id = String::new();
    let mut current_start: Option<DateTime<Utc>> = None;
    let mut current_expiry: Option<DateTime<Utc>> = None;
    let mut current_permission = String::new();

    let parse_date = |text: &str| -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| invalid_xml())
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                current_text.clear();
            }
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"Id" => current_id = current_text.clone(),
                    b"Start" => current_start = Some(parse_date(&current_text)?),
                    b"Expiry" => current_expiry = Some(parse_date(&current_text)?),
                    b"Permission" => current_permission = current_text.clone(),
                    b"SignedIdentifier" => {
                        if current_id.is_empty() || current_id.len() > 64 {
                            return Err(invalid_xml());
                        }
                        identifiers.push(SignedIdentifier {
                            id: std::mem::take(&mut current_id),
                            access_policy: AccessPolicy {
                                start: current_start.take(),
                                expiry: current_expiry.take(),
                                permission: std::mem::take(&mut current_permission),
                            },
                        });
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text = e.unescape().map_err(|_| invalid_xml())?.to_string();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(invalid_xml()),
            _ => {}
        }
        buf.clear();
    }

    Ok(identifiers)
}

/// Parses blob tags XML.
pub fn parse_tags(xml: &str) -> StorageResult<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut tags = HashMap::new();
    let mut buf = Vec::new();
    let mut current_text = String::new();
    let mut current_key = String::new();
    let mut in_key = false;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Key" => in_key = true,
                b"Value" => in_value = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"Key" => {
                    current_key = std::mem::take(&mut current_text);
                    in_key = false;
                }
                b"Value" => {
                    if tags
                        .insert(std::mem::take(&mut current_key), std::mem::take(&mut current_text))
                        .is_some()
                    {
                        return Err(StorageError::with_message(
                            ErrorCode::InvalidTag,
                            "Tag keys must be unique.",
                        ));
                    }
                    in_value = false;
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"Value" => {
                if tags.insert(std::mem::take(&mut current_key), String::new()).is_some() {
                    return Err(StorageError::with_message(
                        ErrorCode::InvalidTag,
                        "Tag keys must be unique.",
                    ));
                }
            }
            Ok(Event::Text(e)) => {
                if in_key || in_value {
                    current_text = e.unescape().map_err(|_| invalid_xml())?.to_string();
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(invalid_xml()),
            _ => {}
        }
        buf.clear();
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_list_keeps_document_order() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
            <BlockList>
              <Latest>QUFB</Latest>
              <Committed>QkJC</Committed>
              <Uncommitted>Q0ND</Uncommitted>
              <Latest>QUFB</Latest>
            </BlockList>"#;
        let entries = parse_block_list(xml).unwrap();
        let pairs: Vec<_> = entries
            .iter()
            .map(|e| (e.block_id.as_str(), e.source))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("QUFB", BlockSource::Latest),
                ("QkJC", BlockSource::Committed),
                ("Q0ND", BlockSource::Uncommitted),
                ("QUFB", BlockSource::Latest),
            ]
        );
    }

    #[test]
    fn test_empty_block_list() {
        assert!(parse_block_list("<BlockList></BlockList>").unwrap().is_empty());
        assert!(parse_block_list("<BlockList/>").unwrap().is_empty());
        assert!(parse_block_list("").is_err());
        assert!(parse_block_list("<BlockList><Bogus>x</Bogus></BlockList>").is_err());
    }

    #[test]
    fn test_signed_identifiers() {
        let xml = r#"<SignedIdentifiers>
            <SignedIdentifier>
              <Id>policy-1</Id>
              <AccessPolicy>
                <Start>2024-01-01T00:00:00Z</Start>
                <Expiry>2024-02-01T00:00:00Z</Expiry>
                <Permission>rw</Permission>
              </AccessPolicy>
            </SignedIdentifier>
          </SignedIdentifiers>"#;
        let ids = parse_signed_identifiers(xml).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id, "policy-1");
        assert_eq!(ids[0].access_policy.permission, "rw");
        assert!(ids[0].access_policy.expiry.is_some());
        assert!(parse_signed_identifiers("").unwrap().is_empty());
    }

    #[test]
    fn test_tags() {
        let xml = "<Tags><TagSet><Tag><Key>env</Key><Value>prod</Value></Tag>\
                   <Tag><Key>empty</Key><Value></Value></Tag></TagSet></Tags>";
        let tags = parse_tags(xml).unwrap();
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(tags.get("empty").map(String::as_str), Some(""));
    }
}
