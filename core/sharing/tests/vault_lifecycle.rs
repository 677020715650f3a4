mod common;

use common::{client, password, restart, server, signed_up};
use sealshare_common::Error;

#[tokio::test]
async fn close_all_reports_every_failure() {
    let server = server();
    let alice = signed_up(&server, "alice").await;

    let mut files = Vec::new();
    for name in ["one.txt", "two.txt", "three.txt"] {
        files.push(alice.add(name, name.as_bytes()).await);
    }
    let mut paths = Vec::new();
    for file in &files {
        paths.push(alice.client.open(file).await.unwrap());
    }

    // Closing the second file fails because its plaintext is gone.
    std::fs::remove_file(&paths[1]).unwrap();

    let err = alice.client.close_all().await.unwrap_err();
    match err {
        Error::Aggregate(agg) => assert_eq!(agg.len(), 1),
        other => panic!("expected aggregate error, got {other}"),
    }

    let status = alice.client.list().await;
    assert!(status.iter().all(|s| !s.open));
    assert_eq!(alice.read_open(&files[0]).await, b"one.txt");
    assert_eq!(alice.read_open(&files[2]).await, b"three.txt");
}

#[tokio::test]
async fn state_machine_preconditions() {
    let server = server();
    let alice = signed_up(&server, "alice").await;
    let file = alice.add("notes.txt", b"notes").await;

    assert!(matches!(alice.client.close(&file).await, Err(Error::FileState(_))));
    alice.client.open(&file).await.unwrap();
    assert!(matches!(alice.client.open(&file).await, Err(Error::FileState(_))));
    alice.client.close(&file).await.unwrap();
    assert!(matches!(alice.client.close(&file).await, Err(Error::FileState(_))));
}

#[tokio::test]
async fn fresh_client_can_read_after_relogin() {
    let server = server();
    let alice = signed_up(&server, "alice").await;
    let bob = signed_up(&server, "bob").await;

    let report = alice.add("report.pdf", b"shared content").await;
    let notes = alice.add("notes.txt", b"private content").await;
    alice.orchestrator.share(&report, &bob.name).await.unwrap();
    bob.poller.poll_once().await.unwrap();

    alice.client.logout().await.unwrap();
    bob.client.logout().await.unwrap();

    // New client instances with empty vault directories.
    let alice2 = client(&server, "alice", server.trust_anchor());
    alice2.client.login(alice2.name.clone(), password()).await.unwrap();
    let bob2 = client(&server, "bob", server.trust_anchor());
    bob2.client.login(bob2.name.clone(), password()).await.unwrap();

    assert_eq!(alice2.read_open(&notes).await, b"private content");
    assert_eq!(alice2.read_open(&report).await, b"shared content");
    assert_eq!(bob2.read_open(&report).await, b"shared content");
}

#[tokio::test]
async fn logout_closes_open_files() {
    let server = server();
    let alice = signed_up(&server, "alice").await;
    let file = alice.add("notes.txt", b"plaintext").await;
    let path = alice.client.open(&file).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"plaintext");

    alice.client.shutdown().await.unwrap();

    assert!(!alice.client.session().is_logged_in().await);
    assert_ne!(std::fs::read(&path).unwrap(), b"plaintext");
    assert!(matches!(alice.client.open(&file).await, Err(Error::NotLoggedIn)));
}

#[tokio::test]
async fn plaintext_left_by_a_crash_is_open_after_relogin() {
    let server = server();
    let alice = signed_up(&server, "alice").await;
    let file = alice.add("notes.txt", b"secret plaintext").await;
    let path = alice.client.open(&file).await.unwrap();

    let alice = restart(&server, alice);
    alice.client.login(alice.name.clone(), password()).await.unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"secret plaintext");
    let status = alice.client.list().await;
    assert_eq!(status.len(), 1);
    assert!(status[0].open);
    assert!(matches!(alice.client.open(&file).await, Err(Error::FileState(_))));

    std::fs::write(&path, b"edited after restart").unwrap();
    alice.client.logout().await.unwrap();
    assert_ne!(std::fs::read(&path).unwrap(), b"edited after restart");

    alice.client.login(alice.name.clone(), password()).await.unwrap();
    assert!(alice.client.list().await.iter().all(|s| !s.open));
    assert_eq!(alice.read_open(&file).await, b"edited after restart");
}

#[tokio::test]
async fn closed_files_stay_closed_after_a_crash() {
    let server = server();
    let alice = signed_up(&server, "alice").await;
    let file = alice.add("notes.txt", b"notes").await;
    assert_eq!(alice.read_open(&file).await, b"notes");

    let alice = restart(&server, alice);
    alice.client.login(alice.name.clone(), password()).await.unwrap();

    assert!(alice.client.list().await.iter().all(|s| !s.open));
    assert_eq!(alice.read_open(&file).await, b"notes");
}
