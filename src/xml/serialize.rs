//! XML response serialization.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::context::format_http_date;
use crate::engine::TaggedBlobPage;
use crate::error::xml_escape;
use crate::lease::Lease;
use crate::listing::{ListEntry, Page};
use crate::models::{BlobModel, BlockInfo, BlockList, ContainerModel, PublicAccessLevel, SignedIdentifier};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Request parameters echoed back in listing responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingEcho<'a> {
    pub service_endpoint: &'a str,
    pub prefix: Option<&'a str>,
    pub marker: Option<&'a str>,
    pub delimiter: Option<&'a str>,
    pub max_results: Option<usize>,
}

impl ListingEcho<'_> {
    fn write(&self, xml: &mut String) {
        if let Some(p) = self.prefix {
            xml.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(p)));
        }
        if let Some(m) = self.marker {
            xml.push_str(&format!("<Marker>{}</Marker>", xml_escape(m)));
        }
        if let Some(max) = self.max_results {
            xml.push_str(&format!("<MaxResults>{}</MaxResults>", max));
        }
        if let Some(d) = self.delimiter {
            xml.push_str(&format!("<Delimiter>{}</Delimiter>", xml_escape(d)));
        }
    }
}

fn write_lease(xml: &mut String, lease: &Lease, now: DateTime<Utc>) {
    xml.push_str(&format!(
        "<LeaseStatus>{}</LeaseStatus>",
        lease.status(now).as_str()
    ));
    xml.push_str(&format!("<LeaseState>{}</LeaseState>", lease.state(now).as_str()));
    if let Some(duration) = lease.duration(now) {
        xml.push_str(&format!(
            "<LeaseDuration>{}</LeaseDuration>",
            duration.as_str()
        ));
    }
}

fn write_metadata(xml: &mut String, metadata: &HashMap<String, String>) {
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort();
    xml.push_str("<Metadata>");
    for (key, value) in entries {
        xml.push_str(&format!(
            "<{}>{}</{}>",
            xml_escape(key),
            xml_escape(value),
            xml_escape(key)
        ));
    }
    xml.push_str("</Metadata>");
}

fn write_tag_set(xml: &mut String, tags: &HashMap<String, String>) {
    let mut entries: Vec<_> = tags.iter().collect();
    entries.sort();
    xml.push_str("<TagSet>");
    for (key, value) in entries {
        xml.push_str(&format!(
            "<Tag><Key>{}</Key><Value>{}</Value></Tag>",
            xml_escape(key),
            xml_escape(value)
        ));
    }
    xml.push_str("</TagSet>");
}

/// Serializes a page of containers.
pub fn serialize_container_list(
    page: &Page<ContainerModel>,
    echo: &ListingEcho<'_>,
    include_metadata: bool,
    now: DateTime<Utc>,
) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(&format!(
        r#"<EnumerationResults ServiceEndpoint="{}">"#,
        xml_escape(echo.service_endpoint)
    ));
    echo.write(&mut xml);

    xml.push_str("<Containers>");
    for container in page.items() {
        serialize_container(&mut xml, container, include_metadata, now);
    }
    xml.push_str("</Containers>");
    xml.push_str(&format!(
        "<NextMarker>{}</NextMarker>",
        xml_escape(&page.next_marker)
    ));
    xml.push_str("</EnumerationResults>");
    xml
}

fn serialize_container(
    xml: &mut String,
    container: &ContainerModel,
    include_metadata: bool,
    now: DateTime<Utc>,
) {
    xml.push_str("<Container>");
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(&container.name)));
    xml.push_str("<Properties>");
    xml.push_str(&format!(
        "<Last-Modified>{}</Last-Modified>",
        format_http_date(&container.properties.last_modified)
    ));
    xml.push_str(&format!(
        "<Etag>{}</Etag>",
        xml_escape(&container.properties.etag)
    ));
    write_lease(xml, &container.lease, now);
    if container.properties.public_access != PublicAccessLevel::None {
        xml.push_str(&format!(
            "<PublicAccess>{}</PublicAccess>",
            container.properties.public_access.as_str()
        ));
    }
    xml.push_str("</Properties>");
    if include_metadata {
        write_metadata(xml, &container.metadata);
    }
    xml.push_str("</Container>");
}

/// What to include for each blob of a listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobListIncludes {
    pub metadata: bool,
    pub tags: bool,
}

/// Serializes a page of blobs. Items and prefixes keep page order.
pub fn serialize_blob_list(
    page: &Page<BlobModel>,
    echo: &ListingEcho<'_>,
    container: &str,
    includes: BlobListIncludes,
    now: DateTime<Utc>,
) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(&format!(
        r#"<EnumerationResults ServiceEndpoint="{}" ContainerName="{}">"#,
        xml_escape(echo.service_endpoint),
        xml_escape(container)
    ));
    echo.write(&mut xml);

    xml.push_str("<Blobs>");
    for entry in &page.entries {
        match entry {
            ListEntry::Item(blob) => serialize_blob(&mut xml, blob, includes, now),
            ListEntry::Prefix(prefix) => xml.push_str(&format!(
                "<BlobPrefix><Name>{}</Name></BlobPrefix>",
                xml_escape(prefix)
            )),
        }
    }
    xml.push_str("</Blobs>");
    xml.push_str(&format!(
        "<NextMarker>{}</NextMarker>",
        xml_escape(&page.next_marker)
    ));
    xml.push_str("</EnumerationResults>");
    xml
}

fn serialize_blob(xml: &mut String, blob: &BlobModel, includes: BlobListIncludes, now: DateTime<Utc>) {
    xml.push_str("<Blob>");
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(&blob.name)));
    if blob.is_snapshot() {
        xml.push_str(&format!("<Snapshot>{}</Snapshot>", xml_escape(&blob.snapshot)));
    }

    let props = &blob.properties;
    xml.push_str("<Properties>");
    xml.push_str(&format!(
        "<Creation-Time>{}</Creation-Time>",
        format_http_date(&props.created_on)
    ));
    xml.push_str(&format!(
        "<Last-Modified>{}</Last-Modified>",
        format_http_date(&props.last_modified)
    ));
    xml.push_str(&format!("<Etag>{}</Etag>", xml_escape(&props.etag)));
    xml.push_str(&format!(
        "<Content-Length>{}</Content-Length>",
        props.content_length
    ));
    xml.push_str(&format!(
        "<Content-Type>{}</Content-Type>",
        xml_escape(props.content_type())
    ));

    let headers = &props.http_headers;
    let optional = [
        ("Content-Encoding", &headers.content_encoding),
        ("Content-Language", &headers.content_language),
        ("Content-MD5", &headers.content_md5),
        ("Content-Disposition", &headers.content_disposition),
        ("Cache-Control", &headers.cache_control),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            xml.push_str(&format!("<{0}>{1}</{0}>", name, xml_escape(value)));
        }
    }

    xml.push_str(&format!("<BlobType>{}</BlobType>", props.blob_type.as_str()));
    if !blob.is_snapshot() {
        write_lease(xml, &blob.lease, now);
    }
    xml.push_str("<ServerEncrypted>true</ServerEncrypted>");
    if !blob.tags.is_empty() {
        xml.push_str(&format!("<TagCount>{}</TagCount>", blob.tags.len()));
    }
    xml.push_str("</Properties>");

    if includes.metadata {
        write_metadata(xml, &blob.metadata);
    }
    if includes.tags && !blob.tags.is_empty() {
        xml.push_str("<Tags>");
        write_tag_set(xml, &blob.tags);
        xml.push_str("</Tags>");
    }
    xml.push_str("</Blob>");
}

/// Serializes a block list.
pub fn serialize_block_list(list: &BlockList) -> String {
    fn blocks(xml: &mut String, tag: &str, blocks: &[BlockInfo]) {
        xml.push_str(&format!("<{}>", tag));
        for block in blocks {
            xml.push_str("<Block>");
            xml.push_str(&format!("<Name>{}</Name>", xml_escape(&block.block_id)));
            xml.push_str(&format!("<Size>{}</Size>", block.size));
            xml.push_str("</Block>");
        }
        xml.push_str(&format!("</{}>", tag));
    }

    let mut xml = String::from(XML_DECLARATION);
    xml.push_str("<BlockList>");
    blocks(&mut xml, "CommittedBlocks", &list.committed);
    blocks(&mut xml, "UncommittedBlocks", &list.uncommitted);
    xml.push_str("</BlockList>");
    xml
}

/// Serializes signed identifiers (access policy) to XML.
pub fn serialize_signed_identifiers(identifiers: &[SignedIdentifier]) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str("<SignedIdentifiers>");
    for id in identifiers {
        xml.push_str("<SignedIdentifier>");
        xml.push_str(&format!("<Id>{}</Id>", xml_escape(&id.id)));
        xml.push_str("<AccessPolicy>");
        if let Some(ref start) = id.access_policy.start {
            xml.push_str(&format!(
                "<Start>{}</Start>",
                start.format("%Y-%m-%dT%H:%M:%SZ")
            ));
        }
        if let Some(ref expiry) = id.access_policy.expiry {
            xml.push_str(&format!(
                "<Expiry>{}</Expiry>",
                expiry.format("%Y-%m-%dT%H:%M:%SZ")
            ));
        }
        xml.push_str(&format!(
            "<Permission>{}</Permission>",
            xml_escape(&id.access_policy.permission)
        ));
        xml.push_str("</AccessPolicy>");
        xml.push_str("</SignedIdentifier>");
    }
    xml.push_str("</SignedIdentifiers>");
    xml
}

/// Serializes blob tags to XML.
pub fn serialize_tags(tags: &HashMap<String, String>) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str("<Tags>");
    write_tag_set(&mut xml, tags);
    xml.push_str("</Tags>");
    xml
}

/// Serializes the result of a find-by-tags query.
pub fn serialize_filter_blobs(page: &TaggedBlobPage, service_endpoint: &str, expression: &str) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(&format!(
        r#"<EnumerationResults ServiceEndpoint="{}">"#,
        xml_escape(service_endpoint)
    ));
    xml.push_str(&format!("<Where>{}</Where>", xml_escape(expression)));
    xml.push_str("<Blobs>");
    for blob in &page.blobs {
        xml.push_str("<Blob>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&blob.name)));
        xml.push_str(&format!(
            "<ContainerName>{}</ContainerName>",
            xml_escape(&blob.container)
        ));
        xml.push_str("<Tags>");
        write_tag_set(&mut xml, &blob.tags);
        xml.push_str("</Tags>");
        xml.push_str("</Blob>");
    }
    xml.push_str("</Blobs>");
    xml.push_str(&format!(
        "<NextMarker>{}</NextMarker>",
        xml_escape(&page.next_marker)
    ));
    xml.push_str("</EnumerationResults>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlobRef, BlobType};

    #[test]
    fn test_blob_list_keeps_page_order() {
        let now = Utc::now();
        let blob = BlobModel::new(&BlobRef::new("acct", "c", "a.txt"), BlobType::BlockBlob, now);
        let page = Page {
            entries: vec![
                ListEntry::Item(blob),
                ListEntry::Prefix("dir/".to_string()),
            ],
            next_marker: "dir/z".to_string(),
        };
        let echo = ListingEcho {
            service_endpoint: "http://127.0.0.1:10000/acct",
            delimiter: Some("/"),
            max_results: Some(2),
            ..Default::default()
        };
        let xml = serialize_blob_list(&page, &echo, "c", BlobListIncludes::default(), now);

        let item = xml.find("<Name>a.txt</Name>").unwrap();
        let prefix = xml.find("<BlobPrefix><Name>dir/</Name></BlobPrefix>").unwrap();
        assert!(item < prefix);
        assert!(xml.contains("<NextMarker>dir/z</NextMarker>"));
        assert!(xml.contains("<LeaseState>available</LeaseState>"));
        assert!(xml.contains("<Delimiter>/</Delimiter>"));
    }

    #[test]
    fn test_block_list_xml() {
        let list = BlockList {
            committed: vec![BlockInfo {
                block_id: "QUFB".into(),
                size: 3,
            }],
            uncommitted: vec![],
        };
        let xml = serialize_block_list(&list);
        assert!(xml.contains(
            "<CommittedBlocks><Block><Name>QUFB</Name><Size>3</Size></Block></CommittedBlocks>"
        ));
        assert!(xml.contains("<UncommittedBlocks></UncommittedBlocks>"));
    }
}
