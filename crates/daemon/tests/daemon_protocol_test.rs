//! End-to-end tests of the daemon protocol over in-memory and TCP connections

use asset_analysis_storage::{FileLocalizer, StorageError, StorageResult};
use asset_pipeline_core::{Context, Dispatcher};
use asset_pipeline_daemon::{builtin_registry, serve_connection, Channel, ProtocolError, Server};
use image::{Rgb, RgbImage};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const PLUTO: &str = "gs://bucket/pluto.png";

/// Maps one remote URI to a local file; plain local paths pass through
struct MappedLocalizer {
    uri: String,
    path: PathBuf,
}

#[async_trait::async_trait]
impl FileLocalizer for MappedLocalizer {
    async fn localize(&self, uri: &str) -> StorageResult<PathBuf> {
        if uri == self.uri {
            Ok(self.path.clone())
        } else if Path::new(uri).is_file() {
            Ok(PathBuf::from(uri))
        } else {
            Err(StorageError::NotFound(uri.to_string()))
        }
    }
}

fn write_png(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([30, 90, 200]))
        .save(path)
        .unwrap();
}

fn pluto_dispatcher(root: &Path) -> Dispatcher {
    let png = root.join("pluto.png");
    write_png(&png, 64, 32);
    let ctx = Context::local(root).with_localizer(Arc::new(MappedLocalizer {
        uri: PLUTO.to_string(),
        path: png,
    }));
    Dispatcher::new(Arc::new(builtin_registry(None)), ctx)
}

fn execute(class_name: &str, args: Value, document: Value) -> String {
    json!({
        "type": "execute",
        "payload": {
            "ref": {"className": class_name, "args": args},
            "asset": {"id": "12345", "document": document}
        }
    })
    .to_string()
}

/// Send every line, close the write side and collect the responses
async fn converse(dispatcher: &Dispatcher, lines: &[String]) -> (Result<usize, ProtocolError>, Vec<Value>) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let (server_read, server_write) = tokio::io::split(server);
    let (client_read, mut client_write) = tokio::io::split(client);

    for line in lines {
        client_write.write_all(line.as_bytes()).await.unwrap();
        client_write.write_all(b"\n").await.unwrap();
    }
    client_write.shutdown().await.unwrap();

    let served = serve_connection(dispatcher, Channel::new(server_read, server_write)).await;

    let mut responses = Vec::new();
    let mut reader = BufReader::new(client_read).lines();
    while let Some(line) = reader.next_line().await.unwrap() {
        responses.push(serde_json::from_str(&line).unwrap());
    }
    (served, responses)
}

#[tokio::test]
async fn test_image_importer_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let request = execute(
        "pkg.ImageImporter",
        json!({}),
        json!({"source": {"path": PLUTO}}),
    );

    let (served, responses) = converse(&dispatcher, &[request]).await;
    assert_eq!(served.unwrap(), 1);
    assert_eq!(responses.len(), 1);

    let response = &responses[0];
    assert_eq!(response["type"], json!("asset"));
    let payload = &response["payload"];
    assert_eq!(payload["id"], json!("12345"));
    assert_eq!(payload["document"]["source"], json!({"path": PLUTO}));
    assert_eq!(payload["document"]["media"]["type"], json!("image"));
    assert_eq!(payload["document"]["media"]["width"], json!(64));
    assert_eq!(payload["document"]["media"]["height"], json!(32));
    assert_eq!(payload["document"]["media"]["orientation"], json!("landscape"));
    assert_eq!(payload["errors"], json!([]));
    assert_eq!(payload["warnings"], json!([]));
}

#[tokio::test]
async fn test_unknown_class_does_not_close_connection() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let lines = [
        execute("pkg.DoesNotExist", json!({}), json!({"source": {"path": PLUTO}})),
        execute("pkg.ImageImporter", json!({}), json!({"source": {"path": PLUTO}})),
    ];

    let (served, responses) = converse(&dispatcher, &lines).await;
    assert_eq!(served.unwrap(), 2);

    assert_eq!(responses[0]["type"], json!("error"));
    assert_eq!(responses[0]["payload"]["errorKind"], json!("ResolutionError"));
    assert_eq!(responses[0]["payload"]["assetId"], json!("12345"));

    assert_eq!(responses[1]["type"], json!("asset"));
    assert_eq!(responses[1]["payload"]["document"]["media"]["width"], json!(64));
}

#[tokio::test]
async fn test_unrecognized_argument_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let request = execute(
        "pkg.ImageImporter",
        json!({"colour": "blue"}),
        json!({"source": {"path": PLUTO}}),
    );

    let (_, responses) = converse(&dispatcher, &[request]).await;
    assert_eq!(responses[0]["type"], json!("error"));
    assert_eq!(responses[0]["payload"]["errorKind"], json!("ConfigurationError"));
}

#[tokio::test]
async fn test_malformed_envelope_ends_connection() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let lines = [
        execute("pkg.ImageImporter", json!({}), json!({"source": {"path": PLUTO}})),
        "{\"type\": \"execute\", \"payload\": ".to_string(),
        execute("pkg.ImageImporter", json!({}), json!({"source": {"path": PLUTO}})),
    ];

    let (served, responses) = converse(&dispatcher, &lines).await;
    assert!(matches!(served, Err(ProtocolError::Malformed(_))));
    assert_eq!(responses.len(), 1);
}

#[tokio::test]
async fn test_length_gate_skips_without_touching_document() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let document = json!({"source": {"path": PLUTO}, "media": {"length": 10000}});
    let request = execute("pkg.ClipSegmenter", json!({"max_length_sec": 7200}), document.clone());

    let (_, responses) = converse(&dispatcher, &[request]).await;
    let payload = &responses[0]["payload"];
    assert_eq!(responses[0]["type"], json!("asset"));
    assert_eq!(payload["document"], document);
    assert_eq!(payload["errors"], json!([]));

    let warnings = payload["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().starts_with("pkg.ClipSegmenter skipped"));
}

#[tokio::test]
async fn test_image_proxy_lands_in_ofs() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let request = execute(
        "pkg.ImageProxy",
        json!({"size": 512}),
        json!({"source": {"path": PLUTO}}),
    );

    let (_, responses) = converse(&dispatcher, &[request]).await;
    let proxy = &responses[0]["payload"]["document"]["proxies"]["image"];
    assert_eq!(proxy["width"], json!(64));
    assert_eq!(proxy["height"], json!(32));
    assert_eq!(proxy["mediaType"], json!("image/jpeg"));
    assert!(dir
        .path()
        .join("ofs/assets/12345/proxy/image_64x32.jpg")
        .is_file());
}

#[tokio::test]
async fn test_fatal_fault_is_reported_in_asset_response() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let request = execute(
        "pkg.ImageImporter",
        json!({}),
        json!({"source": {"path": "gs://bucket/missing.png"}}),
    );

    let (served, responses) = converse(&dispatcher, &[request]).await;
    assert_eq!(served.unwrap(), 1);
    assert_eq!(responses[0]["type"], json!("asset"));
    let errors = responses[0]["payload"]["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["processor"], json!("pkg.ImageImporter"));
    assert_eq!(errors[0]["assetId"], json!("12345"));
    assert_eq!(errors[0]["fatal"], json!(true));
}

#[tokio::test]
async fn test_generate_over_directory() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let library = dir.path().join("library");
    std::fs::create_dir_all(&library).unwrap();
    write_png(&library.join("a.png"), 10, 20);
    write_png(&library.join("b.png"), 20, 20);
    std::fs::write(library.join("notes.txt"), b"not an image").unwrap();

    let request = json!({
        "type": "generate",
        "payload": {
            "ref": {"className": "pkg.ListingGenerator", "args": {"uri": library.to_str().unwrap()}},
            "execute": [{"className": "pkg.ImageImporter"}],
            "settings": {"fileTypes": ["png"]}
        }
    })
    .to_string();

    let (served, responses) = converse(&dispatcher, &[request]).await;
    assert_eq!(served.unwrap(), 1);
    assert_eq!(responses[0]["type"], json!("batch"));

    let payload = &responses[0]["payload"];
    assert_eq!(payload["count"], json!(2));
    let assets = payload["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 2);
    // listing order: a.png then b.png
    assert!(assets[0]["document"]["source"]["path"].as_str().unwrap().ends_with("a.png"));
    assert_eq!(assets[0]["document"]["media"]["orientation"], json!("portrait"));
    assert_eq!(assets[0]["document"]["media"]["width"], json!(10));
    assert_eq!(assets[0]["document"]["media"]["height"], json!(20));
    assert!(assets[1]["document"]["source"]["path"].as_str().unwrap().ends_with("b.png"));
    assert_eq!(assets[1]["document"]["media"]["orientation"], json!("square"));
}

#[tokio::test]
async fn test_generate_without_file_types_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let library = dir.path().join("library");
    std::fs::create_dir_all(&library).unwrap();
    write_png(&library.join("a.png"), 10, 20);

    let generate = |settings: Value| {
        json!({
            "type": "generate",
            "payload": {
                "ref": {"className": "pkg.ListingGenerator", "args": {"uri": library.to_str().unwrap()}},
                "execute": [{"className": "pkg.ImageImporter"}],
                "settings": settings
            }
        })
        .to_string()
    };

    let (served, responses) =
        converse(&dispatcher, &[generate(json!({"fileTypes": []})), generate(json!({}))]).await;
    assert_eq!(served.unwrap(), 2);
    for response in &responses {
        assert_eq!(response["type"], json!("error"));
        assert_eq!(response["payload"]["errorKind"], json!("ConfigurationError"));
    }
}

#[tokio::test]
async fn test_execute_records_pipeline_metric() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let request = json!({
        "type": "execute",
        "payload": {
            "ref": {"className": "pkg.ImageImporter", "checksum": 1234},
            "asset": {"id": "12345", "document": {"source": {"path": PLUTO}}}
        }
    })
    .to_string();

    let (_, responses) = converse(&dispatcher, &[request]).await;
    let metrics = responses[0]["payload"]["document"]["metrics"]["pipeline"]
        .as_array()
        .unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0]["processor"], json!("pkg.ImageImporter"));
    assert_eq!(metrics[0]["checksum"], json!(1234));
    assert!(metrics[0]["executionTime"].is_number());
    assert!(metrics[0].get("error").is_none());
}

#[tokio::test]
async fn test_already_processed_asset_is_returned_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let document = json!({
        "source": {"path": PLUTO},
        "metrics": {"pipeline": [{"processor": "pkg.ImageImporter", "checksum": 0, "executionTime": 0.12}]}
    });
    let skipped = execute("pkg.ImageImporter", json!({}), document.clone());
    let forced = json!({
        "type": "execute",
        "payload": {
            "ref": {"className": "pkg.ImageImporter", "force": true},
            "asset": {"id": "12345", "document": document.clone()}
        }
    })
    .to_string();

    let (_, responses) = converse(&dispatcher, &[skipped, forced]).await;
    assert_eq!(responses[0]["payload"]["document"], document);
    assert_eq!(responses[0]["payload"]["warnings"], json!([]));
    assert_eq!(responses[1]["payload"]["document"]["media"]["width"], json!(64));
}

#[tokio::test]
async fn test_teardown_retires_kept_instance() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let teardown = json!({
        "type": "teardown",
        "payload": {"ref": {"className": "pkg.ImageImporter"}}
    })
    .to_string();
    let lines = [
        execute("pkg.ImageImporter", json!({}), json!({"source": {"path": PLUTO}})),
        execute("pkg.ImageImporter", json!({}), json!({"source": {"path": PLUTO}})),
        teardown.clone(),
        teardown,
    ];

    let (served, responses) = converse(&dispatcher, &lines).await;
    assert_eq!(served.unwrap(), 4);
    assert_eq!(
        responses[2],
        json!({"type": "teardown", "payload": {"className": "pkg.ImageImporter", "tornDown": true}})
    );
    assert_eq!(responses[3]["payload"]["tornDown"], json!(false));
    assert_eq!(dispatcher.instance_count(), 0);
}

#[tokio::test]
async fn test_generate_with_unknown_generator() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = pluto_dispatcher(dir.path());
    let request = json!({
        "type": "generate",
        "payload": {"ref": {"className": "pkg.NoSuchGenerator"}}
    })
    .to_string();

    let (_, responses) = converse(&dispatcher, &[request]).await;
    assert_eq!(responses[0]["type"], json!("error"));
    assert_eq!(responses[0]["payload"]["errorKind"], json!("ResolutionError"));
}

#[tokio::test]
async fn test_tcp_server_answers_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::bind("127.0.0.1:0", pluto_dispatcher(dir.path()), false)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(server.run());

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let request = execute("pkg.ImageImporter", json!({}), json!({"source": {"path": PLUTO}}));
    write_half
        .write_all(format!("{request}\n").as_bytes())
        .await
        .unwrap();

    let mut lines = BufReader::new(read_half).lines();
    let response: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(response["payload"]["document"]["media"]["height"], json!(32));

    drop(write_half);
    drop(lines);
    handle.await.unwrap().unwrap();
}
