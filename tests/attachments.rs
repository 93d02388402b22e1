mod support;

use bytes::Bytes;
use proptest::prelude::*;
use raft_portal_core::{
    errors::RaftError,
    models::attachment::{AttachmentValue, InlineContent, RemoteReference},
    services::{
        attachment_service::AttachmentResolver, credentials::StaticToken,
        transfer_service::TransferClient,
    },
};
use std::sync::Arc;
use support::{MockServer, TOKEN};

const DATA_DIR: &str = "rafts/RAFTS-7/data";

fn resolver(server: &MockServer, memoize: bool) -> AttachmentResolver {
    let cfg = server.config();
    let transfer = TransferClient::new(
        cfg.http_client().unwrap(),
        &cfg,
        Arc::new(StaticToken::new(TOKEN)),
    );
    AttachmentResolver::new(transfer, memoize)
}

fn png_bytes() -> Bytes {
    let mut bytes = vec![0x89, b'P', b'N', b'G'];
    bytes.extend((0u8..96).collect::<Vec<_>>());
    Bytes::from(bytes)
}

#[tokio::test]
async fn upload_returns_reference_and_resolves_to_same_bytes() {
    let server = MockServer::start().await;
    let resolver = resolver(&server, true);
    let payload = png_bytes();
    assert_eq!(payload.len(), 100);

    let reference = resolver
        .upload(DATA_DIR, "figure.png", payload.clone(), "image/png")
        .await
        .unwrap();
    assert_eq!(reference.filename, "figure.png");
    assert_eq!(reference.size, 100);
    assert_eq!(reference.mime_type, "image/png");

    {
        let store = server.store();
        assert_eq!(store.node_creates, 1);
        assert_eq!(store.puts, 1);
        assert!(store.files.contains_key("rafts/RAFTS-7/data/figure.png"));
    }

    let value = AttachmentValue::RemoteReference(reference);
    let content = resolver
        .resolve(Some(&value), Some(DATA_DIR))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(content.bytes, payload);
    assert_eq!(content.mime_type, "image/png");
}

#[tokio::test]
async fn repeated_resolve_is_served_from_memo() {
    let server = MockServer::start().await;
    server.seed_file("rafts/RAFTS-7/data/orbital.txt", b"a e i", "text/plain");
    let resolver = resolver(&server, true);
    let value = AttachmentValue::RemoteReference(RemoteReference {
        filename: "orbital.txt".into(),
        mime_type: "text/plain".into(),
        size: 5,
        uploaded_at: chrono::Utc::now(),
    });

    let first = resolver.resolve(Some(&value), Some(DATA_DIR)).await.unwrap();
    let second = resolver.resolve(Some(&value), Some(DATA_DIR)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(server.store().reads, 1);
}

#[tokio::test]
async fn memo_is_keyed_by_filename_and_dropped_on_upload() {
    let server = MockServer::start().await;
    server.seed_file("rafts/RAFTS-7/data/a.txt", b"first", "text/plain");
    let resolver = resolver(&server, true);
    let reference = |name: &str| {
        AttachmentValue::RemoteReference(RemoteReference {
            filename: name.into(),
            mime_type: "text/plain".into(),
            size: 0,
            uploaded_at: chrono::Utc::now(),
        })
    };

    resolver
        .resolve(Some(&reference("a.txt")), Some(DATA_DIR))
        .await
        .unwrap();
    resolver
        .upload(DATA_DIR, "a.txt", Bytes::from_static(b"second"), "text/plain")
        .await
        .unwrap();
    let refreshed = resolver
        .resolve(Some(&reference("a.txt")), Some(DATA_DIR))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.as_text(), Some("second"));
    assert_eq!(server.store().reads, 2);
}

#[tokio::test]
async fn disabled_memo_always_reads() {
    let server = MockServer::start().await;
    server.seed_file("rafts/RAFTS-7/data/a.txt", b"x", "text/plain");
    let resolver = resolver(&server, false);
    let value = AttachmentValue::RemoteReference(RemoteReference {
        filename: "a.txt".into(),
        mime_type: "text/plain".into(),
        size: 1,
        uploaded_at: chrono::Utc::now(),
    });

    resolver.resolve(Some(&value), Some(DATA_DIR)).await.unwrap();
    resolver.resolve(Some(&value), Some(DATA_DIR)).await.unwrap();
    assert_eq!(server.store().reads, 2);
}

#[tokio::test]
async fn failed_negotiation_leaves_field_unchanged() {
    let server = MockServer::start().await;
    server.store().job_error = Some("storage offline".into());
    let resolver = resolver(&server, true);

    let previous = AttachmentValue::Inline(InlineContent::text("old ephemeris"));
    let mut slot = Some(previous.clone());
    let err = resolver
        .upload_into(
            &mut slot,
            DATA_DIR,
            "ephemeris.txt",
            Bytes::from_static(b"new ephemeris"),
            "text/plain",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RaftError::TransferNegotiationFailed { .. }));
    assert_eq!(slot, Some(previous));
    let store = server.store();
    assert_eq!(store.node_creates, 1);
    assert_eq!(store.puts, 0);
}

#[tokio::test]
async fn unavailable_node_does_not_stop_the_upload() {
    let server = MockServer::start().await;
    server.store().fail_node_create = true;
    let resolver = resolver(&server, true);

    let mut slot = None;
    let reference = resolver
        .upload_into(
            &mut slot,
            DATA_DIR,
            "spectrum.txt",
            Bytes::from_static(b"4000 1.0"),
            "text/plain",
        )
        .await
        .unwrap();
    assert_eq!(
        slot,
        Some(AttachmentValue::RemoteReference(reference.clone()))
    );
    assert_eq!(server.store().puts, 1);
}

#[tokio::test]
async fn filenames_are_sanitized_before_upload() {
    let server = MockServer::start().await;
    let reference = resolver(&server, true)
        .upload(DATA_DIR, "my figure (v2).png", png_bytes(), "image/png")
        .await
        .unwrap();
    assert_eq!(reference.filename, "my_figure_v2_.png");
    assert!(
        server
            .store()
            .files
            .contains_key("rafts/RAFTS-7/data/my_figure_v2_.png")
    );
}

#[tokio::test]
async fn remove_deletes_remote_file_and_clears_field() {
    let server = MockServer::start().await;
    server.seed_file("rafts/RAFTS-7/data/figure.png", b"png", "image/png");
    let resolver = resolver(&server, true);

    let mut slot = Some(AttachmentValue::RemoteReference(RemoteReference {
        filename: "figure.png".into(),
        mime_type: "image/png".into(),
        size: 3,
        uploaded_at: chrono::Utc::now(),
    }));
    let outcome = resolver.remove(&mut slot, Some(DATA_DIR)).await;
    assert!(outcome.is_clean());
    assert!(slot.is_none());
    assert!(server.store().files.is_empty());
}

#[tokio::test]
async fn failed_remote_delete_is_a_warning() {
    let server = MockServer::start().await;
    server.seed_file("rafts/RAFTS-7/data/figure.png", b"png", "image/png");
    server.store().fail_delete = true;
    let resolver = resolver(&server, true);

    let mut slot = Some(AttachmentValue::RemoteReference(RemoteReference {
        filename: "figure.png".into(),
        mime_type: "image/png".into(),
        size: 3,
        uploaded_at: chrono::Utc::now(),
    }));
    let outcome = resolver.remove(&mut slot, Some(DATA_DIR)).await;
    assert!(slot.is_none());
    let warning = outcome.warning.unwrap();
    assert_eq!(warning.filename, "figure.png");
    assert!(matches!(
        warning.error,
        RaftError::RemoteDeleteFailed { status: 500, .. }
    ));
}

#[tokio::test]
async fn upload_file_streams_from_disk() {
    let server = MockServer::start().await;
    let local = std::env::temp_dir().join(format!("{}-Obs Report.mpc", uuid::Uuid::new_v4()));
    tokio::fs::write(&local, b"     K24A00A  C2024 01 01.0\n")
        .await
        .unwrap();

    let reference = resolver(&server, true)
        .upload_file(DATA_DIR, &local, Some("Obs Report.mpc"), None)
        .await
        .unwrap();
    tokio::fs::remove_file(&local).await.unwrap();

    assert_eq!(reference.filename, "Obs_Report.mpc");
    assert_eq!(reference.mime_type, "text/plain");
    assert_eq!(reference.size, 28);
    let store = server.store();
    let (bytes, content_type) = &store.files["rafts/RAFTS-7/data/Obs_Report.mpc"];
    assert_eq!(bytes.as_ref(), b"     K24A00A  C2024 01 01.0\n");
    assert_eq!(content_type, "text/plain");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_non_empty_payload_round_trips(
        payload in proptest::collection::vec(any::<u8>(), 1..4096),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let resolved = runtime.block_on(async {
            let server = MockServer::start().await;
            let resolver = resolver(&server, false);
            let reference = resolver
                .upload(DATA_DIR, "payload.bin", Bytes::from(payload.clone()), "application/octet-stream")
                .await
                .unwrap();
            let value = AttachmentValue::RemoteReference(reference);
            resolver
                .resolve(Some(&value), Some(DATA_DIR))
                .await
                .unwrap()
                .unwrap()
        });
        prop_assert_eq!(resolved.bytes.as_ref(), payload.as_slice());
    }
}

#[tokio::test]
async fn edge_payloads_round_trip() {
    let server = MockServer::start().await;
    let resolver = resolver(&server, true);
    let payloads: [(&str, &[u8]); 4] = [
        ("one.bin", &[0x00]),
        ("invalid-utf8.bin", &[0xff, 0xfe, 0xc3, 0x28, 0x80]),
        ("crlf.txt", b"line\r\nline\r\n"),
        ("nul-in-text.txt", b"a\0b"),
    ];

    for (name, bytes) in payloads {
        let reference = resolver
            .upload(DATA_DIR, name, Bytes::copy_from_slice(bytes), "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(reference.size, bytes.len() as u64);
        let value = AttachmentValue::RemoteReference(reference);
        let content = resolver
            .resolve(Some(&value), Some(DATA_DIR))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.bytes.as_ref(), bytes, "{}", name);
    }
}
