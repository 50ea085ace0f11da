//! Block blob and append blob operation tests.

mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{header, TestServer};
use rand::RngCore;
use reqwest::Method;

/// Block ids whose base64 form needs no padding.
fn block_ids(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| BASE64.encode(format!("block-{:03}", i)))
        .collect()
}

fn block_list_xml(ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in ids {
        xml.push_str(&format!("<Latest>{}</Latest>", id));
    }
    xml.push_str("</BlockList>");
    xml
}

async fn stage(server: &TestServer, url: &str, block_id: &str, content: &str) -> reqwest::Response {
    server
        .request(Method::PUT, &format!("{}?comp=block&blockid={}", url, block_id))
        .body(content.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_stage_and_commit_blocks() {
    let server = TestServer::start().await;
    server.create_container("blockcontainer").await;
    let url = server.blob_url("blockcontainer", "multipartblob.txt");
    let ids = block_ids(3);

    for (i, id) in ids.iter().enumerate() {
        let response = stage(&server, &url, id, &format!("part{};", i)).await;
        assert_eq!(response.status(), 201, "Failed to stage block {}", i);
        assert!(response.headers().contains_key("content-md5"));
    }

    // Nothing is visible before the commit.
    let response = server.request(Method::GET, &url).send().await.unwrap();
    assert_eq!(response.status(), 404);

    let response = server
        .request(Method::PUT, &format!("{}?comp=blocklist", url))
        .body(block_list_xml(&ids))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = server.request(Method::GET, &url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "part0;part1;part2;");
}

#[tokio::test]
async fn test_get_block_list() {
    let server = TestServer::start().await;
    server.create_container("blockcontainer").await;
    let url = server.blob_url("blockcontainer", "listed.bin");
    let ids = block_ids(2);

    stage(&server, &url, &ids[0], "aaa").await;
    stage(&server, &url, &ids[1], "bbbbb").await;

    let response = server
        .request(Method::PUT, &format!("{}?comp=blocklist", url))
        .body(block_list_xml(&ids[..1]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = server
        .request(Method::GET, &format!("{}?comp=blocklist&blocklisttype=all", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(header(&response, "x-ms-blob-content-length"), Some("3"));

    let body = response.text().await.unwrap();
    let committed = format!(
        "<CommittedBlocks><Block><Name>{}</Name><Size>3</Size></Block></CommittedBlocks>",
        ids[0]
    );
    let uncommitted = format!(
        "<UncommittedBlocks><Block><Name>{}</Name><Size>5</Size></Block></UncommittedBlocks>",
        ids[1]
    );
    assert!(body.contains(&committed), "{}", body);
    assert!(body.contains(&uncommitted), "{}", body);

    let response = server
        .request(Method::GET, &format!("{}?comp=blocklist&blocklisttype=bogus", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_commit_unknown_block_fails() {
    let server = TestServer::start().await;
    server.create_container("blockcontainer").await;
    let url = server.blob_url("blockcontainer", "broken.bin");
    let ids = block_ids(2);

    stage(&server, &url, &ids[0], "data").await;

    let response = server
        .request(Method::PUT, &format!("{}?comp=blocklist", url))
        .body(block_list_xml(&ids))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(header(&response, "x-ms-error-code"), Some("InvalidBlockList"));
}

#[tokio::test]
async fn test_stage_block_requires_block_id() {
    let server = TestServer::start().await;
    server.create_container("blockcontainer").await;
    let url = server.blob_url("blockcontainer", "noid.bin");

    let response = server
        .request(Method::PUT, &format!("{}?comp=block", url))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(
        header(&response, "x-ms-error-code"),
        Some("MissingRequiredQueryParameter")
    );
}

#[tokio::test]
async fn test_large_blob_multipart() {
    let server = TestServer::start().await;
    server.create_container("blockcontainer").await;
    let url = server.blob_url("blockcontainer", "large.bin");

    let mut rng = rand::thread_rng();
    let ids = block_ids(4);
    let mut expected = Vec::new();
    for id in &ids {
        let mut chunk = vec![0u8; 1024 * 1024];
        rng.fill_bytes(&mut chunk);
        expected.extend_from_slice(&chunk);

        let response = server
            .request(Method::PUT, &format!("{}?comp=block&blockid={}", url, id))
            .body(chunk)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
    }

    let response = server
        .request(Method::PUT, &format!("{}?comp=blocklist", url))
        .body(block_list_xml(&ids))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = server.request(Method::HEAD, &url).send().await.unwrap();
    let length = expected.len().to_string();
    assert_eq!(header(&response, "content-length"), Some(length.as_str()));

    let body = server
        .request(Method::GET, &url)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_append_blob() {
    let server = TestServer::start().await;
    server.create_container("appendcontainer").await;
    let url = server.blob_url("appendcontainer", "log.txt");

    let response = server
        .request(Method::PUT, &url)
        .header("x-ms-blob-type", "AppendBlob")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    for (i, line) in ["first\n", "second\n"].iter().enumerate() {
        let response = server
            .request(Method::PUT, &format!("{}?comp=appendblock", url))
            .body(line.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let count = (i + 1).to_string();
        assert_eq!(
            header(&response, "x-ms-blob-committed-block-count"),
            Some(count.as_str())
        );
    }

    let response = server
        .request(Method::PUT, &format!("{}?comp=appendblock", url))
        .header("x-ms-blob-condition-appendpos", "0")
        .body("late")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);
    assert_eq!(
        header(&response, "x-ms-error-code"),
        Some("AppendPositionConditionNotMet")
    );

    let response = server.request(Method::GET, &url).send().await.unwrap();
    assert_eq!(header(&response, "x-ms-blob-type"), Some("AppendBlob"));
    assert_eq!(response.text().await.unwrap(), "first\nsecond\n");
}

#[tokio::test]
async fn test_page_blob_is_rejected() {
    let server = TestServer::start().await;
    server.create_container("pagecontainer").await;

    let response = server
        .request(Method::PUT, &server.blob_url("pagecontainer", "disk.vhd"))
        .header("x-ms-blob-type", "PageBlob")
        .header("x-ms-blob-content-length", "512")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
